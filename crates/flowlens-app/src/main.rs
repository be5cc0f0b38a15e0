//! Flowlens sidecar binary.
//!
//! Wires the pieces together and runs until killed:
//! - the lifecycle service over the bundled hudsucker engine
//! - the event relay from the capture queue to connected clients
//! - the newline-delimited JSON IPC server on loopback

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use flowlens_core::event_channel;
use flowlens_ipc::{relay_events, IpcServer, DEFAULT_IPC_PORT};
use flowlens_proxy::{CaManager, HudsuckerEngine, ProxyService};

/// Room for a burst of flow events while a client catches up.
const CLIENT_QUEUE_CAPACITY: usize = 1024;

/// Flowlens - local HTTPS capture proxy with a JSON IPC control plane
#[derive(Parser, Debug)]
#[command(name = "flowlens", version, about)]
struct Args {
    /// Port for the IPC control server
    #[arg(long, default_value_t = DEFAULT_IPC_PORT)]
    ipc_port: u16,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the root CA certificate and key
    #[arg(long)]
    ca_dir: Option<PathBuf>,
}

fn init_logging(args: &Args) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowlens={},warn", args.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let engine = match &args.ca_dir {
        Some(dir) => HudsuckerEngine::new(CaManager::new(dir.clone())),
        None => HudsuckerEngine::with_default_dir().context("failed to resolve CA directory")?,
    };
    tracing::info!(ca_cert = %engine.ca_cert_path().display(), "using root CA");

    let (event_tx, event_rx) = event_channel();
    let service = Arc::new(ProxyService::new(Arc::new(engine), event_tx));

    let (client_tx, _) = broadcast::channel::<String>(CLIENT_QUEUE_CAPACITY);
    let relay = tokio::spawn(relay_events(event_rx, client_tx.clone()));

    let server = IpcServer::bind(args.ipc_port, Arc::clone(&service), client_tx)
        .await
        .with_context(|| format!("failed to bind IPC server on 127.0.0.1:{}", args.ipc_port))?;
    tracing::info!(addr = %server.local_addr()?, "ipc server listening");

    tokio::select! {
        result = server.run() => {
            result.context("ipc server failed")?;
        }
        _ = relay => {
            tracing::warn!("event relay exited");
        }
    }

    service.stop();
    Ok(())
}
