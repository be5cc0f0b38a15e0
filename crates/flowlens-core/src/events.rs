//! IPC wire messages and the shared event queue.
//!
//! All messages are single-line JSON objects discriminated by a `type`
//! field. Commands flow from clients to the sidecar; events are broadcast
//! from the sidecar to every connected client. Commands are fire-and-forget
//! with no response correlation.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::record::FlowRecord;

/// Commands accepted from IPC clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Begin or resume capture on (or near) the given port.
    Start {
        /// Requested engine port; the service may bind a nearby candidate.
        /// Defaults to 8080 when the client omits it.
        #[serde(default = "default_start_port")]
        port: u16,
    },
    /// Stop the engine and disable capture.
    Stop,
    /// Suspend capture, keeping the engine alive.
    Pause,
    /// Resume capture.
    Resume,
}

fn default_start_port() -> u16 {
    8080
}

/// Derived lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    /// Engine alive and capture enabled.
    Running,
    /// Engine alive, capture suspended.
    Paused,
    /// No engine thread alive.
    Stopped,
}

impl ProxyStatus {
    /// Returns the status as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events broadcast to IPC clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// Lifecycle transition (also sent as a snapshot on connect).
    Status {
        /// Derived status.
        status: ProxyStatus,
        /// Human-readable summary.
        message: String,
        /// Engine port, when one is bound or was requested.
        port: Option<u16>,
    },
    /// A captured exchange.
    Flow {
        /// The flow record.
        record: FlowRecord,
    },
    /// Fatal start failure or engine exception.
    Error {
        /// Failure description.
        message: String,
    },
}

/// Producer half of the shared event queue.
///
/// Cloneable and usable from plain threads; the collector and the lifecycle
/// service both push through this.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Consumer half of the shared event queue, drained by the relay pump.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Creates the shared event queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
