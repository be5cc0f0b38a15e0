//! Interception engine lifecycle and HTTPS capture.
//!
//! This crate hosts the proxy side of the sidecar:
//!
//! - [`ProxyService`]: the lifecycle state machine (start with port search,
//!   stop, pause, resume) that drives any [`EngineLauncher`].
//! - [`EngineLauncher`] / [`EngineHandle`] / [`EngineMonitor`]: the seam
//!   between the lifecycle and a concrete interception engine.
//! - [`HudsuckerEngine`]: the bundled engine, a hudsucker MITM proxy that
//!   feeds captured exchanges into a [`flowlens_core::FlowCollector`].
//! - [`CaManager`]: root CA generation and persistence for TLS interception.

pub mod ca;
pub mod engine;
pub mod error;
pub mod handler;
pub mod hudsucker_engine;
pub mod service;

pub use ca::CaManager;
pub use engine::{EngineHandle, EngineLauncher, EngineMonitor};
pub use error::{CaError, ProxyError, Result};
pub use handler::RecordingHandler;
pub use hudsucker_engine::HudsuckerEngine;
pub use service::{ProxyService, PORT_SEARCH_WINDOW};
