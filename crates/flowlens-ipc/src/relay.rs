//! Event relay: single-consumer queue in, fan-out broadcast out.
//!
//! Producers (the collector and the lifecycle service) push [`Event`]s onto
//! one unbounded queue. The relay serializes each to a JSON line exactly
//! once and republishes it on a broadcast channel, so every connected IPC
//! client gets its own copy without re-serializing per client.

use flowlens_core::EventReceiver;
use tokio::sync::broadcast;

/// Pumps events from the queue into the broadcast channel until every
/// sender handle on the queue has been dropped.
pub async fn relay_events(mut events: EventReceiver, clients: broadcast::Sender<String>) {
    while let Some(event) = events.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                continue;
            }
        };
        // Send errors just mean no client is connected right now.
        let _ = clients.send(line);
    }
    tracing::debug!("event queue closed, relay exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::{event_channel, Event};

    // ==================== Relay Tests ====================

    #[tokio::test]
    async fn relays_events_as_json_lines() {
        let (tx, rx) = event_channel();
        let (clients, mut subscriber) = broadcast::channel::<String>(16);
        tokio::spawn(relay_events(rx, clients));

        tx.send(Event::Error {
            message: "boom".into(),
        })
        .unwrap();

        let line = subscriber.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "boom");
    }

    #[tokio::test]
    async fn exits_when_queue_closes() {
        let (tx, rx) = event_channel();
        let (clients, _subscriber) = broadcast::channel::<String>(16);
        let relay = tokio::spawn(relay_events(rx, clients));

        drop(tx);
        relay.await.unwrap();
    }
}
