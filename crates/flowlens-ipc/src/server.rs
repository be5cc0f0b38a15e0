//! TCP control server speaking newline-delimited JSON.
//!
//! Each accepted client gets its own task. The server writes the current
//! status as the first line so a freshly connected client never has to
//! guess, then interleaves two directions over one socket: inbound command
//! lines are parsed and dispatched to the lifecycle service, outbound event
//! lines arrive from the shared broadcast channel. Malformed input lines
//! are skipped so one buggy client cannot wedge its own connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{tcp::OwnedWriteHalf, TcpListener, TcpStream};
use tokio::sync::broadcast;

use flowlens_core::Command;
use flowlens_proxy::ProxyService;

/// Control server bound to loopback.
pub struct IpcServer {
    listener: TcpListener,
    service: Arc<ProxyService>,
    events: broadcast::Sender<String>,
}

impl IpcServer {
    /// Binds the server on `127.0.0.1:port` (`0` picks a free port).
    pub async fn bind(
        port: u16,
        service: Arc<ProxyService>,
        events: broadcast::Sender<String>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self {
            listener,
            service,
            events,
        })
    }

    /// Address the server actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::info!(%peer, "ipc client connected");
            let service = Arc::clone(&self.service);
            let events = self.events.subscribe();
            tokio::spawn(async move {
                handle_client(stream, service, events).await;
                tracing::info!(%peer, "ipc client disconnected");
            });
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    service: Arc<ProxyService>,
    mut events: broadcast::Receiver<String>,
) {
    let (read_half, mut write_half) = stream.into_split();

    // Status snapshot first, so the client starts from known state.
    match serde_json::to_string(&service.current_status()) {
        Ok(line) => {
            if write_line(&mut write_half, &line).await.is_err() {
                return;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize status snapshot");
            return;
        }
    }

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Command>(line) {
                            Ok(command) => dispatch(&service, command).await,
                            Err(e) => {
                                tracing::debug!(error = %e, "skipping malformed command line");
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(line) => {
                        if write_line(&mut write_half, &line).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "slow ipc client dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Lifecycle methods block on probes and joins, so they run off the
/// reactor. Each command is awaited before the next line is read, keeping
/// per-client commands in order.
async fn dispatch(service: &Arc<ProxyService>, command: Command) {
    let service = Arc::clone(service);
    let done = tokio::task::spawn_blocking(move || match command {
        Command::Start { port } => service.start(port),
        Command::Stop => service.stop(),
        Command::Pause => service.pause(),
        Command::Resume => service.resume(),
    })
    .await;
    if done.is_err() {
        tracing::warn!("command handler panicked");
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use tokio::io::Lines;
    use tokio::net::tcp::OwnedReadHalf;

    use flowlens_core::{event_channel, FlowCollector};
    use flowlens_proxy::{EngineHandle, EngineLauncher, EngineMonitor};

    /// Engine fake that binds a real listener so readiness probes pass.
    struct ListenerEngine;

    impl EngineLauncher for ListenerEngine {
        fn launch(
            &self,
            port: u16,
            _collector: FlowCollector,
            monitor: EngineMonitor,
        ) -> flowlens_proxy::Result<EngineHandle> {
            let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
            let thread_monitor = monitor.clone();
            let thread = thread::spawn(move || {
                let listener = match std::net::TcpListener::bind(("127.0.0.1", port)) {
                    Ok(l) => l,
                    Err(e) => {
                        thread_monitor.record_failure(&e.to_string());
                        return;
                    }
                };
                listener.set_nonblocking(true).unwrap();
                loop {
                    match shutdown_rx.try_recv() {
                        Err(broadcast::error::TryRecvError::Empty) => {}
                        _ => break,
                    }
                    let _ = listener.accept();
                    thread::sleep(Duration::from_millis(10));
                }
            });
            Ok(EngineHandle::new(port, shutdown_tx, thread, monitor))
        }
    }

    type ClientReader = Lines<BufReader<OwnedReadHalf>>;

    /// Spins up relay + server over a fresh service and connects a client.
    async fn connect_client() -> (Arc<ProxyService>, ClientReader, OwnedWriteHalf) {
        let (event_tx, event_rx) = event_channel();
        let (client_tx, _) = broadcast::channel::<String>(64);
        tokio::spawn(crate::relay::relay_events(event_rx, client_tx.clone()));

        let service = Arc::new(ProxyService::new(Arc::new(ListenerEngine), event_tx));
        let server = IpcServer::bind(0, Arc::clone(&service), client_tx)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half).lines();
        (service, reader, write_half)
    }

    async fn next_json(reader: &mut ClientReader) -> serde_json::Value {
        let line = tokio::time::timeout(Duration::from_secs(5), reader.next_line())
            .await
            .expect("timed out waiting for line")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn send_line(writer: &mut OwnedWriteHalf, line: &str) {
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
    }

    // ==================== Server Tests ====================

    #[tokio::test]
    async fn sends_status_snapshot_on_connect() {
        let (_service, mut reader, _writer) = connect_client().await;

        let snapshot = next_json(&mut reader).await;
        assert_eq!(snapshot["type"], "status");
        assert_eq!(snapshot["status"], "stopped");
        assert_eq!(snapshot["message"], "Ready");
        assert!(snapshot["port"].is_null());
    }

    #[tokio::test]
    async fn dispatches_stop_command_and_relays_event() {
        let (_service, mut reader, mut writer) = connect_client().await;
        next_json(&mut reader).await;

        send_line(&mut writer, r#"{"type":"stop"}"#).await;

        let event = next_json(&mut reader).await;
        assert_eq!(event["type"], "status");
        assert_eq!(event["status"], "stopped");
        assert_eq!(event["message"], "Stopped");
    }

    #[tokio::test]
    async fn skips_malformed_lines_without_dropping_client() {
        let (_service, mut reader, mut writer) = connect_client().await;
        next_json(&mut reader).await;

        send_line(&mut writer, "this is not json").await;
        send_line(&mut writer, r#"{"type":"unknown"}"#).await;
        send_line(&mut writer, r#"{"type":"stop"}"#).await;

        let event = next_json(&mut reader).await;
        assert_eq!(event["message"], "Stopped");
    }

    #[tokio::test]
    async fn start_command_runs_port_search() {
        let (service, mut reader, mut writer) = connect_client().await;
        next_json(&mut reader).await;

        let port = std::net::TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        send_line(&mut writer, &format!(r#"{{"type":"start","port":{port}}}"#)).await;

        let event = next_json(&mut reader).await;
        assert_eq!(event["type"], "status");
        assert_eq!(event["status"], "running");
        let bound = event["port"].as_u64().unwrap() as u16;
        assert_eq!(
            event["message"],
            format!("Proxy Running on 127.0.0.1:{bound}")
        );
        assert_eq!(service.current_port(), Some(bound));

        service.stop();
    }

    #[tokio::test]
    async fn broadcasts_events_to_every_client() {
        let (event_tx, event_rx) = event_channel();
        let (client_tx, _) = broadcast::channel::<String>(64);
        tokio::spawn(crate::relay::relay_events(event_rx, client_tx.clone()));

        let service = Arc::new(ProxyService::new(Arc::new(ListenerEngine), event_tx));
        let server = IpcServer::bind(0, Arc::clone(&service), client_tx)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut readers = Vec::new();
        for _ in 0..2 {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, _write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half).lines();
            // Consume the snapshot; keep the write half alive with the reader.
            next_json(&mut reader).await;
            readers.push((reader, _write_half));
        }

        service.stop();

        for (reader, _) in &mut readers {
            let event = next_json(reader).await;
            assert_eq!(event["message"], "Stopped");
        }
    }
}
