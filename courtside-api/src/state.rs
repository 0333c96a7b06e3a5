use std::sync::Arc;

use courtside_booking::{BookingOrchestrator, BroadcastSink, EngineDeps, EventSink};
use courtside_catalog::{EquipmentInventory, PricingEngine};
use courtside_core::{Clock, InMemoryCourtDirectory, PaymentProcessor};
use courtside_store::{Config, RedisClient};

use crate::metrics::Metrics;
use crate::middleware::ResiliencyState;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingOrchestrator>,
    /// Rate limiting is skipped when absent.
    pub redis: Option<Arc<RedisClient>>,
    /// Feeds the SSE stream.
    pub live_events: BroadcastSink,
    pub metrics: Arc<Metrics>,
    pub resiliency: Arc<ResiliencyState>,
    pub rate_limit_per_minute: i64,
}

impl AppState {
    pub fn new(
        engine: Arc<BookingOrchestrator>,
        live_events: BroadcastSink,
        redis: Option<Arc<RedisClient>>,
        rate_limit_per_minute: i64,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            engine,
            redis,
            live_events,
            metrics: Arc::new(Metrics::new()?),
            resiliency: Arc::new(ResiliencyState::default()),
            rate_limit_per_minute,
        })
    }
}

/// Wire the engine from configuration seed data.
pub fn build_engine(
    config: &Config,
    clock: Arc<dyn Clock>,
    payments: Arc<dyn PaymentProcessor>,
    events: Arc<dyn EventSink>,
) -> anyhow::Result<Arc<BookingOrchestrator>> {
    let pricing = PricingEngine::new(config.pricing.clone(), config.pricing_rules.clone())?;

    let mut equipment = EquipmentInventory::new();
    for item in &config.equipment {
        equipment.stock(item.clone());
    }

    tracing::info!(
        courts = config.courts.len(),
        pricing_rules = config.pricing_rules.len(),
        equipment = config.equipment.len(),
        "engine seeded"
    );

    Ok(BookingOrchestrator::new(EngineDeps {
        config: config.engine.clone(),
        clock,
        courts: Arc::new(InMemoryCourtDirectory::new(config.courts.clone())),
        pricing,
        equipment,
        payments,
        events,
    }))
}
