use anyhow::Context;
use courtside_api::{app, state::build_engine, worker, AppState};
use courtside_booking::{BroadcastSink, EventSink, FanoutSink};
use courtside_core::{MockPaymentProcessor, SystemClock};
use courtside_store::{Config, EventProducer, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courtside_api=debug,courtside_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    tracing::info!(port = config.server.port, "Starting Courtside API");

    // Live events for SSE subscribers, plus Kafka when configured
    let live_events = BroadcastSink::new(256);
    let mut events = FanoutSink::new(vec![Arc::new(live_events.clone()) as Arc<dyn EventSink>]);
    if let Some(kafka) = &config.kafka {
        let producer = EventProducer::new(kafka).context("failed to create Kafka producer")?;
        events = events.with(Arc::new(producer));
    } else {
        tracing::warn!("no Kafka brokers configured, events stay in-process");
    }

    let redis = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisClient::new(&redis.url).await.context("failed to connect to Redis")?,
        )),
        None => None,
    };

    // TODO: swap in a real processor adapter once a gateway is chosen.
    let payments = Arc::new(MockPaymentProcessor::new());
    let engine = build_engine(&config, Arc::new(SystemClock), payments, Arc::new(events))?;

    worker::spawn_sweeper(
        engine.clone(),
        Duration::from_secs(config.engine.sweep_interval_seconds.max(1)),
    );

    let state = AppState::new(engine, live_events, redis, config.server.rate_limit_per_minute)?;
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
