use async_trait::async_trait;
use courtside_booking::EventSink;
use courtside_shared::DomainEvent;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::app_config::KafkaConfig;

/// Exponential backoff between delivery attempts of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Pause before retry number `attempt` (1 for the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&KafkaConfig> for RetryPolicy {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            max_attempts: config.max_send_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

/// Events that exhausted their retries, kept for the next send. Oldest
/// events are dropped once `capacity` is reached.
#[derive(Debug)]
pub struct RedeliveryQueue {
    capacity: usize,
    events: VecDeque<PendingEvent>,
}

impl RedeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::new(),
        }
    }

    /// Queue an event. Returns the event pushed out to make room, if any.
    pub fn push(&mut self, event: PendingEvent) -> Option<PendingEvent> {
        if self.capacity == 0 {
            return Some(event);
        }
        let dropped = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        dropped
    }

    pub fn drain(&mut self) -> Vec<PendingEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Kafka producer for domain events. One topic per event type, keyed by
/// booking so a booking's events stay ordered.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    retry: RetryPolicy,
    backlog: Arc<Mutex<RedeliveryQueue>>,
}

impl EventProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            retry: RetryPolicy::from(config),
            backlog: Arc::new(Mutex::new(RedeliveryQueue::new(config.redelivery_capacity))),
        })
    }

    pub async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "event delivered"
                );
                Ok(())
            }
            Err((e, _msg)) => Err(e),
        }
    }

    /// Send with backoff between attempts.
    pub async fn send_with_retry(&self, event: &PendingEvent) -> Result<(), KafkaError> {
        let mut attempt = 1;
        loop {
            match self.send(&event.topic, &event.key, &event.payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(topic = %event.topic, attempt, ?delay, error = %e, "event delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Resend everything left over from earlier failures, in order.
    async fn flush_backlog(&self) {
        let pending = self.backlog.lock().await.drain();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "redelivering buffered events");
        let mut pending = pending.into_iter();
        while let Some(event) = pending.next() {
            if self.send(&event.topic, &event.key, &event.payload).await.is_err() {
                // Broker still down: put this one and the rest back.
                let mut backlog = self.backlog.lock().await;
                for event in std::iter::once(event).chain(pending) {
                    backlog.push(event);
                }
                return;
            }
        }
    }

    async fn buffer(&self, event: PendingEvent) {
        let mut backlog = self.backlog.lock().await;
        if let Some(dropped) = backlog.push(event) {
            error!(topic = %dropped.topic, key = %dropped.key, "redelivery buffer full, event dropped");
        }
    }

    pub async fn backlog_len(&self) -> usize {
        self.backlog.lock().await.len()
    }
}

#[async_trait]
impl EventSink for EventProducer {
    async fn publish(&self, event: DomainEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "failed to serialize event");
                return;
            }
        };
        self.flush_backlog().await;

        let pending = PendingEvent {
            topic: event.event_type.topic().to_string(),
            key: event.partition_key(),
            payload,
        };
        // The booking operation carries on whatever happens here.
        if let Err(e) = self.send_with_retry(&pending).await {
            error!(event_id = %event.event_id, topic = %pending.topic, error = %e, "failed to deliver event, buffering");
            self.buffer(pending).await;
        }
    }
}
