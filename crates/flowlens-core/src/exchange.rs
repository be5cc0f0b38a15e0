//! The narrow interface an interception engine must satisfy.
//!
//! The engine observes HTTP exchanges on its own thread and hands them to
//! the collector as plain data. Keeping this a concrete struct (rather than
//! a trait over engine internals) decouples the collector from any specific
//! engine implementation.

use crate::record::Header;

/// One intercepted request and, if completed, its response.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Engine-assigned identifier, unique per flow.
    pub id: String,
    /// Request method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Target host.
    pub host: String,
    /// Request path.
    pub path: String,
    /// URL scheme.
    pub scheme: String,
    /// Ordered request headers.
    pub request_headers: Vec<Header>,
    /// Raw request body bytes.
    pub request_body: Vec<u8>,
    /// Request start, epoch seconds; `None` if the engine did not record it.
    pub started: Option<f64>,
    /// Response parts, present once the exchange completed.
    pub response: Option<ExchangeResponse>,
    /// Engine error message, present when the exchange failed.
    pub error: Option<String>,
}

/// Response half of a completed exchange.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    /// Response status code.
    pub status_code: u16,
    /// Ordered response headers.
    pub headers: Vec<Header>,
    /// Raw response body bytes.
    pub body: Vec<u8>,
    /// Response completion, epoch seconds; `None` if not recorded.
    pub ended: Option<f64>,
}
