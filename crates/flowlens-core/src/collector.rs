//! Flow collection: exchange in, flow record out.
//!
//! The collector is the observer the interception engine drives from its
//! own thread. Each callback checks the capture gate once at entry, builds
//! one immutable [`FlowRecord`], and enqueues it. There is no retroactive
//! capture: exchanges observed while paused are gone.

use crate::body::{decode_for_display, truncate_body, MAX_BODY_CAPTURE};
use crate::capture::CaptureState;
use crate::events::{Event, EventSender};
use crate::exchange::Exchange;
use crate::record::{duration_ms, epoch_now, iso_time, FlowRecord};

/// Observer invoked by the interception engine.
#[derive(Debug, Clone)]
pub struct FlowCollector {
    state: CaptureState,
    events: EventSender,
}

impl FlowCollector {
    /// Creates a collector over the given capture gate and event queue.
    pub fn new(state: CaptureState, events: EventSender) -> Self {
        Self { state, events }
    }

    /// Whether exchanges are currently being recorded.
    pub fn should_capture(&self) -> bool {
        self.state.should_capture()
    }

    /// Records a failed exchange.
    ///
    /// Synthesizes a zero status code and empty response fields; duration
    /// runs from the request start to now.
    pub fn on_error(&self, exchange: &Exchange) {
        if !self.state.should_capture() {
            return;
        }

        let started = exchange.started.unwrap_or_else(epoch_now);
        let ended = epoch_now();
        let error = exchange.error.clone().unwrap_or_default();

        let record = FlowRecord {
            status_code: 0,
            response_headers: None,
            response_body_size: 0,
            response_body: String::new(),
            response_body_truncated: false,
            error,
            ..self.base_record(exchange, started, ended)
        };
        self.enqueue(record);
    }

    /// Records a completed exchange.
    ///
    /// Uses the response's own completion timestamp when the engine
    /// recorded one, else now. A call without response parts is ignored.
    pub fn on_response(&self, exchange: &Exchange) {
        if !self.state.should_capture() {
            return;
        }
        let Some(response) = exchange.response.as_ref() else {
            tracing::debug!(id = %exchange.id, "response callback without response parts");
            return;
        };

        let started = exchange.started.unwrap_or_else(epoch_now);
        let ended = response.ended.unwrap_or_else(epoch_now);

        let record = FlowRecord {
            status_code: response.status_code,
            response_headers: Some(response.headers.clone()),
            response_body_size: response.body.len(),
            response_body: decode_for_display(truncate_body(&response.body), &response.headers),
            response_body_truncated: response.body.len() > MAX_BODY_CAPTURE,
            error: String::new(),
            ..self.base_record(exchange, started, ended)
        };
        self.enqueue(record);
    }

    /// Fields shared by error and response records.
    fn base_record(&self, exchange: &Exchange, started: f64, ended: f64) -> FlowRecord {
        FlowRecord {
            id: exchange.id.clone(),
            started,
            ended,
            duration_ms: duration_ms(started, ended),
            method: exchange.method.clone(),
            url: exchange.url.clone(),
            host: exchange.host.clone(),
            path: exchange.path.clone(),
            scheme: exchange.scheme.clone(),
            status_code: 0,
            request_headers: exchange.request_headers.clone(),
            response_headers: None,
            request_body_size: exchange.request_body.len(),
            response_body_size: 0,
            request_body: decode_for_display(
                truncate_body(&exchange.request_body),
                &exchange.request_headers,
            ),
            response_body: String::new(),
            request_body_truncated: exchange.request_body.len() > MAX_BODY_CAPTURE,
            response_body_truncated: false,
            error: String::new(),
            started_iso: iso_time(started),
        }
    }

    fn enqueue(&self, record: FlowRecord) {
        if self.events.send(Event::Flow { record }).is_err() {
            tracing::warn!("event queue closed; dropping flow record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::exchange::ExchangeResponse;
    use crate::record::Header;

    fn sample_exchange() -> Exchange {
        Exchange {
            id: "flow-7".into(),
            method: "POST".into(),
            url: "https://api.example.com/v1/items".into(),
            host: "api.example.com".into(),
            path: "/v1/items".into(),
            scheme: "https".into(),
            request_headers: vec![Header::new("content-type", "application/json")],
            request_body: br#"{"name":"widget"}"#.to_vec(),
            started: Some(1000.0),
            response: Some(ExchangeResponse {
                status_code: 201,
                headers: vec![Header::new("content-type", "application/json")],
                body: br#"{"id":1}"#.to_vec(),
                ended: Some(1000.25),
            }),
            error: None,
        }
    }

    fn recv_flow(rx: &mut crate::events::EventReceiver) -> FlowRecord {
        match rx.try_recv().expect("expected an event") {
            Event::Flow { record } => record,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // ==================== Gating Tests ====================

    #[test]
    fn paused_collector_drops_exchanges() {
        let (tx, mut rx) = event_channel();
        let state = CaptureState::new();
        state.set_paused(true);
        let collector = FlowCollector::new(state, tx);

        collector.on_response(&sample_exchange());
        collector.on_error(&sample_exchange());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_collector_drops_exchanges() {
        let (tx, mut rx) = event_channel();
        let state = CaptureState::new();
        state.set_capturing(false);
        let collector = FlowCollector::new(state, tx);

        collector.on_response(&sample_exchange());
        assert!(rx.try_recv().is_err());
    }

    // ==================== Response Tests ====================

    #[test]
    fn response_builds_complete_record() {
        let (tx, mut rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx);

        collector.on_response(&sample_exchange());
        let record = recv_flow(&mut rx);

        assert_eq!(record.id, "flow-7");
        assert_eq!(record.method, "POST");
        assert_eq!(record.status_code, 201);
        assert_eq!(record.duration_ms, 250);
        assert_eq!(record.request_body, r#"{"name":"widget"}"#);
        assert_eq!(record.response_body, r#"{"id":1}"#);
        assert_eq!(record.request_body_size, 17);
        assert_eq!(record.response_body_size, 8);
        assert!(!record.request_body_truncated);
        assert!(record.error.is_empty());
        assert!(record.response_headers.is_some());
        assert!(record.started_iso.starts_with("1970-01-01T00:16:40"));
    }

    #[test]
    fn oversized_response_body_sets_truncation_flag() {
        let (tx, mut rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx);

        let mut exchange = sample_exchange();
        let big = "x".repeat(MAX_BODY_CAPTURE + 50);
        exchange.response.as_mut().unwrap().body = big.into_bytes();
        exchange.response.as_mut().unwrap().headers =
            vec![Header::new("content-type", "text/plain")];

        collector.on_response(&exchange);
        let record = recv_flow(&mut rx);

        assert!(record.response_body_truncated);
        assert_eq!(record.response_body_size, MAX_BODY_CAPTURE + 50);
        assert_eq!(record.response_body.len(), MAX_BODY_CAPTURE);
    }

    #[test]
    fn response_without_parts_is_ignored() {
        let (tx, mut rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx);

        let mut exchange = sample_exchange();
        exchange.response = None;
        collector.on_response(&exchange);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_timestamps_fall_back_to_now() {
        let (tx, mut rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx);

        let mut exchange = sample_exchange();
        exchange.started = None;
        exchange.response.as_mut().unwrap().ended = None;

        collector.on_response(&exchange);
        let record = recv_flow(&mut rx);
        assert!(record.started > 1_577_836_800.0);
        assert!(record.ended >= record.started);
    }

    // ==================== Error Tests ====================

    #[test]
    fn error_synthesizes_empty_response() {
        let (tx, mut rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx);

        let mut exchange = sample_exchange();
        exchange.response = None;
        exchange.error = Some("connection reset by peer".into());

        collector.on_error(&exchange);
        let record = recv_flow(&mut rx);

        assert_eq!(record.status_code, 0);
        assert!(record.response_headers.is_none());
        assert_eq!(record.response_body, "");
        assert_eq!(record.response_body_size, 0);
        assert_eq!(record.error, "connection reset by peer");
        // Request side is still recorded.
        assert_eq!(record.request_body, r#"{"name":"widget"}"#);
    }

    #[test]
    fn clock_skew_clamps_duration_to_zero() {
        let (tx, mut rx) = event_channel();
        let collector = FlowCollector::new(CaptureState::new(), tx);

        let mut exchange = sample_exchange();
        // Started far in the future relative to "now".
        exchange.started = Some(epoch_now() + 3600.0);
        exchange.error = Some("timeout".into());
        exchange.response = None;

        collector.on_error(&exchange);
        let record = recv_flow(&mut rx);
        assert_eq!(record.duration_ms, 0);
    }
}
