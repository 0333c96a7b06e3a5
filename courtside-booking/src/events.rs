use async_trait::async_trait;
use courtside_shared::DomainEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outbound domain events. Publishing must not fail the operation that
/// produced the event; sinks log their own delivery errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// In-process fan-out to live subscribers (the SSE stream). Events published
/// with nobody listening are dropped.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<DomainEvent> {
        self.tx.clone()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory. Used by tests.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type.topic()).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: DomainEvent) {
        tracing::debug!(event_type = %event.event_type, booking_id = ?event.booking_id, "event recorded");
        self.events.lock().push(event);
    }
}

/// Publishes each event to every inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn publish(&self, event: DomainEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone()).await;
        }
    }
}
