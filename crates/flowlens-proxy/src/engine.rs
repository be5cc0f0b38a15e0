//! The engine seam: how the lifecycle service launches, watches, and stops
//! an interception engine instance.
//!
//! Each engine instance runs on its own dedicated OS thread. The service
//! talks to it only through [`EngineHandle`] (shutdown signal plus bounded
//! join) and [`EngineMonitor`] (failure reporting for one start attempt),
//! so fakes can stand in for the bundled engine in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use flowlens_core::{Event, EventSender, FlowCollector, ProxyStatus};

use crate::error::Result;

/// Poll interval for the bounded thread join.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Launches interception engine instances.
///
/// Implementations must spawn the engine on a dedicated thread and return
/// without waiting for it to bind; the service verifies readiness by
/// probing the port.
pub trait EngineLauncher: Send + Sync {
    /// Spawns an engine bound to `127.0.0.1:port`, feeding observed
    /// exchanges to `collector` and failures to `monitor`.
    fn launch(
        &self,
        port: u16,
        collector: FlowCollector,
        monitor: EngineMonitor,
    ) -> Result<EngineHandle>;
}

/// Failure channel for one engine start attempt.
///
/// Before the service confirms the attempt (readiness probe succeeded),
/// failures are only recorded so the start-failure path can report them.
/// After confirmation, a failure is a genuine post-start crash and is
/// always published to clients.
#[derive(Debug, Clone)]
pub struct EngineMonitor {
    port: u16,
    confirmed: Arc<AtomicBool>,
    last_error: Arc<Mutex<String>>,
    events: EventSender,
}

impl EngineMonitor {
    /// Creates a monitor for an attempt on the given port.
    pub fn new(port: u16, events: EventSender) -> Self {
        Self {
            port,
            confirmed: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(String::new())),
            events,
        }
    }

    /// Marks the attempt as confirmed running.
    pub fn confirm_started(&self) {
        self.confirmed.store(true, Ordering::SeqCst);
    }

    /// Records an engine failure.
    ///
    /// Crashes after a confirmed start are published as an `error` event
    /// plus a `stopped` status; failures during the start window stay local
    /// to the attempt.
    pub fn record_failure(&self, message: &str) {
        *self.last_error.lock() = message.to_string();
        if self.confirmed.load(Ordering::SeqCst) {
            tracing::error!(port = self.port, "engine failed after start: {message}");
            let _ = self.events.send(Event::Error {
                message: message.to_string(),
            });
            let _ = self.events.send(Event::Status {
                status: ProxyStatus::Stopped,
                message: "Stopped".into(),
                port: Some(self.port),
            });
        } else {
            tracing::warn!(port = self.port, "engine start attempt failed: {message}");
        }
    }

    /// Returns the last recorded failure message, empty if none.
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }
}

/// Owns a running engine instance: its thread, shutdown channel, and the
/// monitor for the attempt that launched it.
pub struct EngineHandle {
    port: u16,
    shutdown: broadcast::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
    monitor: EngineMonitor,
}

impl EngineHandle {
    /// Wraps a spawned engine thread.
    pub fn new(
        port: u16,
        shutdown: broadcast::Sender<()>,
        thread: thread::JoinHandle<()>,
        monitor: EngineMonitor,
    ) -> Self {
        Self {
            port,
            shutdown,
            thread: Some(thread),
            monitor,
        }
    }

    /// The port this engine was launched on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the engine thread is still running.
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Marks the launch attempt as confirmed running.
    pub fn confirm_started(&self) {
        self.monitor.confirm_started();
    }

    /// Returns the last failure recorded by this engine, empty if none.
    pub fn last_error(&self) -> String {
        self.monitor.last_error()
    }

    /// Signals the engine to stop and waits up to `timeout` for the thread
    /// to exit.
    ///
    /// Best-effort: on timeout the thread is detached and state cleared
    /// anyway; a panicked engine thread is logged, not propagated.
    pub fn shutdown(mut self, timeout: Duration) {
        // Signal may find no receiver if the thread already exited.
        let _ = self.shutdown.send(());

        let Some(thread) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if thread.is_finished() {
            if thread.join().is_err() {
                tracing::warn!(port = self.port, "engine thread panicked during shutdown");
            }
        } else {
            tracing::warn!(
                port = self.port,
                "engine thread did not exit within {timeout:?}; detaching"
            );
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("port", &self.port)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::event_channel;

    fn spawn_handle(port: u16, events: EventSender) -> EngineHandle {
        let monitor = EngineMonitor::new(port, events);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let thread = thread::spawn(move || loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => break,
                Err(broadcast::error::TryRecvError::Empty) => {
                    thread::sleep(Duration::from_millis(5))
                }
            }
        });
        EngineHandle::new(port, shutdown_tx, thread, monitor)
    }

    // ==================== EngineMonitor Tests ====================

    #[test]
    fn failure_before_confirm_stays_local() {
        let (tx, mut rx) = event_channel();
        let monitor = EngineMonitor::new(9000, tx);

        monitor.record_failure("bind refused");
        assert_eq!(monitor.last_error(), "bind refused");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failure_after_confirm_is_published() {
        let (tx, mut rx) = event_channel();
        let monitor = EngineMonitor::new(9000, tx);

        monitor.confirm_started();
        monitor.record_failure("certificate rejected");

        match rx.try_recv().unwrap() {
            Event::Error { message } => assert_eq!(message, "certificate rejected"),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            Event::Status { status, port, .. } => {
                assert_eq!(status, ProxyStatus::Stopped);
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn last_error_tracks_most_recent() {
        let (tx, _rx) = event_channel();
        let monitor = EngineMonitor::new(9000, tx);

        monitor.record_failure("first");
        monitor.record_failure("second");
        assert_eq!(monitor.last_error(), "second");
    }

    // ==================== EngineHandle Tests ====================

    #[test]
    fn handle_reports_liveness_and_stops() {
        let (tx, _rx) = event_channel();
        let handle = spawn_handle(9001, tx);

        assert!(handle.is_alive());
        assert_eq!(handle.port(), 9001);
        handle.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn shutdown_after_thread_exit_is_harmless() {
        let (tx, _rx) = event_channel();
        let monitor = EngineMonitor::new(9002, tx);
        let (shutdown_tx, _) = broadcast::channel(1);
        let thread = thread::spawn(|| {});
        thread::sleep(Duration::from_millis(20));

        let handle = EngineHandle::new(9002, shutdown_tx, thread, monitor);
        assert!(!handle.is_alive());
        handle.shutdown(Duration::from_millis(100));
    }
}
