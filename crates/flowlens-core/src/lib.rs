//! Flowlens core - capture pipeline for the traffic-recording sidecar.
//!
//! This crate turns raw intercepted exchanges into structured, size-bounded,
//! display-safe flow records and defines the IPC wire messages shared by the
//! proxy lifecycle service and the IPC server.
//!
//! ## Pipeline
//!
//! ```text
//! Engine thread → FlowCollector → event queue → relay → IPC clients
//!                      │
//!               CaptureState gate (capturing && !paused)
//! ```
//!
//! Body handling never fails: decompression and UTF-8 decoding degrade to
//! raw/lossy output, and a control-character heuristic decides when to
//! substitute a binary placeholder instead of text.

pub mod body;
pub mod capture;
pub mod collector;
pub mod events;
pub mod exchange;
pub mod record;

pub use body::{decode_for_display, header_value, truncate_body, MAX_BODY_CAPTURE};
pub use capture::CaptureState;
pub use collector::FlowCollector;
pub use events::{event_channel, Command, Event, EventReceiver, EventSender, ProxyStatus};
pub use exchange::{Exchange, ExchangeResponse};
pub use record::{epoch_now, iso_time, FlowRecord, Header};
