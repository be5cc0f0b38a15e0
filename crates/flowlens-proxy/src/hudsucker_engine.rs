//! The bundled interception engine.
//!
//! Wraps a hudsucker MITM proxy in the [`EngineLauncher`] seam: each launch
//! spins up a dedicated OS thread running its own current-thread tokio
//! runtime, builds the proxy with the root CA authority, and serves until
//! the shutdown signal arrives.

use std::net::SocketAddr;
use std::thread;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;

use flowlens_core::FlowCollector;

use crate::ca::CaManager;
use crate::engine::{EngineHandle, EngineLauncher, EngineMonitor};
use crate::error::{ProxyError, Result};
use crate::handler::RecordingHandler;

/// Launches hudsucker-based interception engine instances.
#[derive(Debug, Clone)]
pub struct HudsuckerEngine {
    ca: CaManager,
}

impl HudsuckerEngine {
    /// Creates an engine launcher signing with the given CA.
    pub fn new(ca: CaManager) -> Self {
        Self { ca }
    }

    /// Creates an engine launcher using the default CA directory.
    pub fn with_default_dir() -> Result<Self> {
        Ok(Self::new(CaManager::with_default_dir()?))
    }

    /// Returns the CA certificate path, for client installation.
    pub fn ca_cert_path(&self) -> std::path::PathBuf {
        self.ca.cert_path()
    }
}

impl EngineLauncher for HudsuckerEngine {
    fn launch(
        &self,
        port: u16,
        collector: FlowCollector,
        monitor: EngineMonitor,
    ) -> Result<EngineHandle> {
        // Load (or generate) the CA before spawning so launch failures
        // surface synchronously.
        let authority = self.ca.ensure_ca()?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let thread_monitor = monitor.clone();

        let thread = thread::Builder::new()
            .name(format!("flowlens-engine-{port}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        thread_monitor.record_failure(&format!("engine runtime failed: {e}"));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let handler = RecordingHandler::new(collector);
                    let proxy = match Proxy::builder()
                        .with_addr(SocketAddr::from(([127, 0, 0, 1], port)))
                        .with_ca(authority)
                        .with_rustls_connector(default_provider())
                        .with_http_handler(handler)
                        .build()
                    {
                        Ok(p) => p,
                        Err(e) => {
                            thread_monitor.record_failure(&e.to_string());
                            return;
                        }
                    };

                    tracing::info!("engine listening on 127.0.0.1:{port}");
                    tokio::select! {
                        result = proxy.start() => {
                            if let Err(e) = result {
                                thread_monitor.record_failure(&e.to_string());
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            tracing::debug!(port, "engine shutdown signal received");
                        }
                    }
                });
            })
            .map_err(ProxyError::Io)?;

        Ok(EngineHandle::new(port, shutdown_tx, thread, monitor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn launcher_exposes_ca_cert_path() {
        let temp_dir = TempDir::new().unwrap();
        let engine = HudsuckerEngine::new(CaManager::new(temp_dir.path().join("ca")));
        assert!(engine
            .ca_cert_path()
            .to_string_lossy()
            .contains("flowlens-ca.crt"));
    }

    #[test]
    fn launch_generates_ca_and_spawns_thread() {
        use flowlens_core::{event_channel, CaptureState};
        use std::time::Duration;

        let temp_dir = TempDir::new().unwrap();
        let engine = HudsuckerEngine::new(CaManager::new(temp_dir.path().join("ca")));

        let (tx, _rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx.clone());
        let monitor = EngineMonitor::new(0, tx);

        // Port 0 lets the OS pick; we only verify spawn/stop mechanics here.
        let handle = engine.launch(0, collector, monitor).unwrap();
        assert!(engine.ca.ca_exists());
        handle.shutdown(Duration::from_secs(2));
    }
}
