//! Typed channel for geofence event egress
//!
//! Ingest must never wait on the writer, so sends use `try_send` and a full
//! or closed channel drops the event and counts it.

use crate::domain::types::GeofenceEvent;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages consumed by the egress writer task
#[derive(Debug, Clone, PartialEq)]
pub enum EgressMessage {
    /// A geofence transition emitted by ingest
    Event(GeofenceEvent),
}

/// Sender side of the egress channel
///
/// Clone this to share across producers.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EgressMessage>,
    metrics: Arc<Metrics>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Queue one event, returns false if it was dropped
    pub fn send_event(&self, event: &GeofenceEvent) -> bool {
        match self.tx.try_send(EgressMessage::Event(event.clone())) {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_egress_dropped();
                debug!(
                    session_id = %event.session_id,
                    poi_id = %event.poi_id,
                    error = %e,
                    "egress_event_dropped"
                );
                false
            }
        }
    }

    /// Queue every event, returns how many were accepted
    pub fn send_events(&self, events: &[GeofenceEvent]) -> usize {
        events.iter().filter(|e| self.send_event(e)).count()
    }
}

/// Create a new egress channel pair
///
/// `buffer_size` bounds how many events can wait for the writer.
pub fn create_egress_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (EventSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (EventSender::new(tx, metrics), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{GeofenceEventType, PoiId, SessionId};

    fn event(poi: &str) -> GeofenceEvent {
        GeofenceEvent {
            session_id: SessionId::from("s1"),
            poi_id: PoiId::from(poi),
            poi_name: poi.to_string(),
            event_type: GeofenceEventType::Enter,
            distance: 10.0,
            timestamp: 1,
            confidence: 0.8,
            sequence: 1,
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let metrics = Arc::new(Metrics::new());
        let (sender, mut rx) = create_egress_channel(4, metrics.clone());
        assert!(sender.send_event(&event("a")));

        let Some(EgressMessage::Event(received)) = rx.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(received.poi_id, PoiId::from("a"));
        assert_eq!(metrics.egress_dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (sender, _rx) = create_egress_channel(2, metrics.clone());
        let accepted = sender.send_events(&[event("a"), event("b"), event("c")]);
        assert_eq!(accepted, 2);
        assert_eq!(metrics.egress_dropped(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_drops() {
        let metrics = Arc::new(Metrics::new());
        let (sender, rx) = create_egress_channel(2, metrics.clone());
        drop(rx);
        assert!(!sender.send_event(&event("a")));
        assert_eq!(metrics.egress_dropped(), 1);
    }
}
