//! HTTP handler for the bundled engine.
//!
//! Buffers each request, pairs it with its response (or failure), and
//! feeds the completed exchange to the collector. Traffic is always
//! forwarded unchanged; recording is observation only.

use std::sync::atomic::{AtomicU64, Ordering};

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Request, Response},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;

use flowlens_core::{epoch_now, Exchange, ExchangeResponse, FlowCollector, Header};

/// Process-wide flow id counter.
static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

fn next_flow_id() -> String {
    format!("flow-{}", NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed))
}

/// Helper to convert bytes to Body.
fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// Converts a hyper header map into the ordered wire representation.
/// Duplicates are preserved; non-UTF-8 values are rendered lossily.
fn headers_to_vec(headers: &hyper::HeaderMap) -> Vec<Header> {
    headers
        .iter()
        .map(|(name, value)| {
            Header::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Request half of an in-flight exchange, waiting for its response.
#[derive(Debug, Clone)]
struct PendingExchange {
    id: String,
    method: String,
    url: String,
    host: String,
    path: String,
    scheme: String,
    headers: Vec<Header>,
    body: Vec<u8>,
    started: f64,
}

impl PendingExchange {
    fn into_exchange(
        self,
        response: Option<ExchangeResponse>,
        error: Option<String>,
    ) -> Exchange {
        Exchange {
            id: self.id,
            method: self.method,
            url: self.url,
            host: self.host,
            path: self.path,
            scheme: self.scheme,
            request_headers: self.headers,
            request_body: self.body,
            started: Some(self.started),
            response,
            error,
        }
    }
}

/// Recording handler: one clone per client connection, request/response
/// pairs observed sequentially on it.
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    collector: FlowCollector,
    pending: Option<PendingExchange>,
}

impl RecordingHandler {
    /// Creates a handler feeding the given collector.
    pub fn new(collector: FlowCollector) -> Self {
        Self {
            collector,
            pending: None,
        }
    }

    /// Extracts the target host from the request URI or Host header.
    fn extract_host(req: &Request<Body>) -> String {
        if let Some(host) = req.uri().host() {
            return host.to_string();
        }
        req.headers()
            .get(hyper::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.split(':').next().unwrap_or(s).to_string())
            .unwrap_or_default()
    }
}

impl HttpHandler for RecordingHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        let started = epoch_now();
        let host = Self::extract_host(&req);

        let (parts, body) = req.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("failed to read request body: {e}");
                return RequestOrResponse::Request(Request::from_parts(parts, Body::empty()));
            }
        };

        self.pending = Some(PendingExchange {
            id: next_flow_id(),
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            host,
            path: parts.uri.path().to_string(),
            scheme: parts.uri.scheme_str().unwrap_or("https").to_string(),
            headers: headers_to_vec(&parts.headers),
            body: body_bytes.to_vec(),
            started,
        });

        RequestOrResponse::Request(Request::from_parts(parts, bytes_to_body(body_bytes)))
    }

    async fn handle_response(
        &mut self,
        _ctx: &HttpContext,
        res: Response<Body>,
    ) -> Response<Body> {
        let Some(pending) = self.pending.take() else {
            return res;
        };

        let (parts, body) = res.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                // The upstream died mid-body: record the exchange as failed.
                let exchange = pending
                    .into_exchange(None, Some(format!("failed to read response body: {e}")));
                self.collector.on_error(&exchange);
                return Response::from_parts(parts, Body::empty());
            }
        };

        let response = ExchangeResponse {
            status_code: parts.status.as_u16(),
            headers: headers_to_vec(&parts.headers),
            body: body_bytes.to_vec(),
            ended: Some(epoch_now()),
        };
        let exchange = pending.into_exchange(Some(response), None);
        self.collector.on_response(&exchange);

        Response::from_parts(parts, bytes_to_body(body_bytes))
    }
}
