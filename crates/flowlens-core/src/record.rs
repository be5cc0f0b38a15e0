//! Flow records: the structured, display-safe representation of one
//! intercepted exchange.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// One header name/value pair.
///
/// Headers are kept as an ordered list; duplicates are preserved exactly as
/// the engine observed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name as sent on the wire.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Creates a new header pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A captured exchange, ready for broadcast to IPC clients.
///
/// Immutable once constructed: built entirely inside the collector at the
/// moment an exchange completes or errors, then handed off to the event
/// queue. Body fields hold display text (see [`crate::body`]); the
/// `*_body_size` fields report the untruncated byte counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Engine-assigned flow identifier.
    pub id: String,
    /// Request start, epoch seconds.
    pub started: f64,
    /// Exchange end, epoch seconds.
    pub ended: f64,
    /// Duration in milliseconds, clamped at zero.
    pub duration_ms: u64,
    /// Request method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Target host.
    pub host: String,
    /// Request path.
    pub path: String,
    /// URL scheme (`http` or `https`).
    pub scheme: String,
    /// Response status code; 0 when the exchange errored before a response.
    pub status_code: u16,
    /// Ordered request headers.
    pub request_headers: Vec<Header>,
    /// Ordered response headers; `None` when no response was seen.
    pub response_headers: Option<Vec<Header>>,
    /// Untruncated request body size in bytes.
    pub request_body_size: usize,
    /// Untruncated response body size in bytes.
    pub response_body_size: usize,
    /// Displayable request body.
    pub request_body: String,
    /// Displayable response body; empty on error flows.
    pub response_body: String,
    /// Whether the request body was cut at the capture cap.
    pub request_body_truncated: bool,
    /// Whether the response body was cut at the capture cap.
    pub response_body_truncated: bool,
    /// Engine error message; empty when the exchange completed normally.
    pub error: String,
    /// `started` as an ISO-8601 timestamp.
    pub started_iso: String,
}

/// Returns the current time as epoch seconds.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Formats epoch seconds as an ISO-8601 UTC timestamp.
///
/// Out-of-range timestamps format as the epoch origin rather than failing;
/// records always carry a parseable timestamp string.
pub fn iso_time(epoch_secs: f64) -> String {
    let secs = epoch_secs.floor() as i64;
    let nanos = ((epoch_secs - epoch_secs.floor()) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
        .unwrap_or_default()
        .to_rfc3339()
}

/// Computes a non-negative duration in milliseconds between two epoch
/// timestamps. Clock skew that makes `ended` precede `started` clamps to 0.
pub fn duration_ms(started: f64, ended: f64) -> u64 {
    let ms = (ended - started) * 1000.0;
    if ms.is_finite() && ms > 0.0 {
        ms as u64
    } else {
        0
    }
}
