//! Control plane for the Flowlens sidecar.
//!
//! A UI process connects to a local TCP socket and exchanges
//! newline-delimited JSON: commands in (`start` / `stop` / `pause` /
//! `resume`), status and flow events out. [`relay_events`] bridges the
//! single event queue to a broadcast channel; [`IpcServer`] fans that
//! broadcast out to every connected client.

pub mod relay;
pub mod server;

pub use relay::relay_events;
pub use server::IpcServer;

/// Default control port the sidecar listens on.
pub const DEFAULT_IPC_PORT: u16 = 8787;
