//! Proxy lifecycle state machine.
//!
//! Owns the interception engine's lifecycle: candidate port search, startup
//! verification by socket probing, pause/resume gating, and best-effort
//! shutdown. All transitions are serialized behind a single lifecycle
//! mutex, so concurrent start/stop/restart requests cannot interleave.
//! Status is derived, never stored: `paused` / `running` / `stopped` fall
//! out of thread liveness plus the capture flags, read without touching the
//! lifecycle mutex so status queries stay responsive during a long start.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use flowlens_core::{CaptureState, Event, EventSender, FlowCollector, ProxyStatus};

use crate::engine::{EngineHandle, EngineLauncher, EngineMonitor};

/// How many ports above the requested one the search will try.
pub const PORT_SEARCH_WINDOW: u16 = 20;

/// Fast probe used to skip candidate ports that are already occupied.
const OCCUPIED_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Per-connect timeout while polling for engine readiness.
const READY_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Ceiling on waiting for a launched engine to become reachable.
const READY_TIMEOUT: Duration = Duration::from_millis(2500);

/// Bound on waiting for an engine thread to exit during shutdown.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sentinel in the port cell meaning "no engine port".
const NO_PORT: u32 = 0;

/// State that only lifecycle transitions touch, guarded by the
/// serialization mutex.
#[derive(Default)]
struct LifecycleState {
    /// Last failure seen during the current start attempt.
    last_start_error: String,
}

/// Lifecycle service for the interception engine.
///
/// Public transition methods block the calling thread for bounded sections
/// (readiness probes, shutdown joins); callers on an async runtime should
/// dispatch them via `spawn_blocking`. Read-side queries ([`current_status`],
/// [`current_port`], [`is_engine_alive`]) never wait on a transition in
/// progress.
///
/// [`current_status`]: ProxyService::current_status
/// [`current_port`]: ProxyService::current_port
/// [`is_engine_alive`]: ProxyService::is_engine_alive
pub struct ProxyService {
    launcher: Arc<dyn EngineLauncher>,
    events: EventSender,
    state: CaptureState,
    /// Serializes start/stop/pause/resume against each other.
    lifecycle: Mutex<LifecycleState>,
    /// Engine slot. Locked only to install, take, or liveness-check the
    /// handle, never across probes or joins.
    engine: Mutex<Option<EngineHandle>>,
    /// Bound (or in-progress) engine port, [`NO_PORT`] when stopped.
    current_port: AtomicU32,
}

impl ProxyService {
    /// Creates a service over the given engine launcher and event queue.
    pub fn new(launcher: Arc<dyn EngineLauncher>, events: EventSender) -> Self {
        Self {
            launcher,
            events,
            state: CaptureState::new(),
            lifecycle: Mutex::new(LifecycleState::default()),
            engine: Mutex::new(None),
            current_port: AtomicU32::new(NO_PORT),
        }
    }

    /// Returns a read handle on the capture flags.
    pub fn capture_state(&self) -> CaptureState {
        self.state.clone()
    }

    /// Returns the engine port, `None` when stopped.
    pub fn current_port(&self) -> Option<u16> {
        match self.current_port.load(Ordering::SeqCst) {
            NO_PORT => None,
            port => Some(port as u16),
        }
    }

    /// Whether an engine thread is currently alive.
    pub fn is_engine_alive(&self) -> bool {
        self.engine.lock().as_ref().is_some_and(|e| e.is_alive())
    }

    /// Derives the current status payload (also sent to clients on connect).
    ///
    /// Does not take the lifecycle mutex: a client connecting while a port
    /// search is in progress gets its snapshot immediately.
    pub fn current_status(&self) -> Event {
        let port = self.current_port();
        if self.is_engine_alive() {
            if self.state.is_paused() {
                return Event::Status {
                    status: ProxyStatus::Paused,
                    message: "Paused".into(),
                    port,
                };
            }
            if self.state.is_capturing() {
                return Event::Status {
                    status: ProxyStatus::Running,
                    message: running_message(port),
                    port,
                };
            }
        }
        Event::Status {
            status: ProxyStatus::Stopped,
            message: "Ready".into(),
            port,
        }
    }

    /// Starts (or resumes) capture on the requested port.
    ///
    /// If the engine is already alive on exactly this port, capture is
    /// re-enabled in place without a restart. If it is alive on a different
    /// port, it is shut down first. Otherwise the service probes
    /// `port..=port+20` in order, skipping occupied candidates, launching
    /// the engine on each free one and waiting for it to become reachable.
    /// Exhausting the window emits a `stopped` status naming the requested
    /// port plus a separate `error` event with the failure detail.
    pub fn start(&self, port: u16) {
        let mut lifecycle = self.lifecycle.lock();

        if self.is_engine_alive() {
            if self.current_port() == Some(port) {
                // Already bound where asked: just resume capture.
                self.state.set_capturing(true);
                self.state.set_paused(false);
                self.emit_status(ProxyStatus::Running, running_message(Some(port)), Some(port));
                return;
            }
            // Restart on a different port.
            self.shutdown_engine();
        }

        self.state.set_capturing(true);
        self.state.set_paused(false);
        lifecycle.last_start_error.clear();

        let mut started = false;
        for candidate in candidate_ports(port) {
            if port_in_use(candidate) {
                tracing::debug!(candidate, "port occupied, skipping");
                continue;
            }

            self.set_port(Some(candidate));
            let collector = FlowCollector::new(self.state.clone(), self.events.clone());
            let monitor = EngineMonitor::new(candidate, self.events.clone());
            let handle = match self.launcher.launch(candidate, collector, monitor) {
                Ok(handle) => handle,
                Err(e) => {
                    lifecycle.last_start_error = e.to_string();
                    continue;
                }
            };

            if wait_for_port(candidate, READY_TIMEOUT) && handle.is_alive() {
                handle.confirm_started();
                tracing::info!(port = candidate, "engine started");
                *self.engine.lock() = Some(handle);
                self.emit_status(
                    ProxyStatus::Running,
                    running_message(Some(candidate)),
                    Some(candidate),
                );
                started = true;
                break;
            }

            // Attempt never became reachable: tear it down and move on.
            let attempt_error = handle.last_error();
            if !attempt_error.is_empty() {
                lifecycle.last_start_error = attempt_error;
            }
            handle.shutdown(SHUTDOWN_JOIN_TIMEOUT);
        }

        if !started {
            self.set_port(None);
            self.emit_status(
                ProxyStatus::Stopped,
                format!("Failed to start proxy near 127.0.0.1:{port}"),
                Some(port),
            );
            let detail = if lifecycle.last_start_error.is_empty() {
                "Port may be busy or blocked.".to_string()
            } else {
                lifecycle.last_start_error.clone()
            };
            let _ = self.events.send(Event::Error {
                message: format!("Proxy failed to start near 127.0.0.1:{port}. {detail}"),
            });
        }
    }

    /// Stops the engine and disables capture.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.state.set_capturing(false);
        self.state.set_paused(false);
        self.shutdown_engine();
        self.emit_status(ProxyStatus::Stopped, "Stopped".into(), self.current_port());
        self.set_port(None);
    }

    /// Suspends capture, keeping the engine alive.
    ///
    /// No-op when no engine thread is alive or capture is already paused.
    pub fn pause(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_engine_alive() || self.state.is_paused() {
            return;
        }
        self.state.set_paused(true);
        self.emit_status(ProxyStatus::Paused, "Paused".into(), self.current_port());
    }

    /// Resumes capture after a pause.
    ///
    /// No-op when no engine thread is alive or capture is not paused.
    pub fn resume(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_engine_alive() || !self.state.is_paused() {
            return;
        }
        self.state.set_paused(false);
        self.emit_status(
            ProxyStatus::Running,
            running_message(self.current_port()),
            self.current_port(),
        );
    }

    fn set_port(&self, port: Option<u16>) {
        self.current_port
            .store(port.map_or(NO_PORT, u32::from), Ordering::SeqCst);
    }

    /// Best-effort engine teardown; always clears the slot. The slot lock
    /// is released before the join so status queries never wait on it.
    fn shutdown_engine(&self) {
        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            engine.shutdown(SHUTDOWN_JOIN_TIMEOUT);
        }
    }

    fn emit_status(&self, status: ProxyStatus, message: String, port: Option<u16>) {
        let _ = self.events.send(Event::Status {
            status,
            message,
            port,
        });
    }
}

impl std::fmt::Debug for ProxyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyService")
            .field("current_port", &self.current_port())
            .field("engine_alive", &self.is_engine_alive())
            .field("capturing", &self.state.is_capturing())
            .field("paused", &self.state.is_paused())
            .finish()
    }
}

fn running_message(port: Option<u16>) -> String {
    match port {
        Some(port) => format!("Proxy Running on 127.0.0.1:{port}"),
        None => "Proxy Running".to_string(),
    }
}

/// The requested port followed by the next twenty above it.
fn candidate_ports(requested: u16) -> impl Iterator<Item = u16> {
    (0..=PORT_SEARCH_WINDOW).filter_map(move |offset| requested.checked_add(offset))
}

fn probe_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Fast TCP probe: is something already listening here?
fn port_in_use(port: u16) -> bool {
    TcpStream::connect_timeout(&probe_addr(port), OCCUPIED_PROBE_TIMEOUT).is_ok()
}

/// Polls until the port accepts connections or the deadline passes.
fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&probe_addr(port), READY_PROBE_TIMEOUT).is_ok() {
            return true;
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
    false
}
