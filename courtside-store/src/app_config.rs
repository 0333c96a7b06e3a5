use courtside_booking::EngineConfig;
use courtside_catalog::{EquipmentItem, PricingConfig, PricingRule};
use courtside_core::Court;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Rate limiting is disabled without Redis.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Events only reach in-process subscribers without Kafka.
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub courts: Vec<Court>,
    #[serde(default)]
    pub pricing_rules: Vec<PricingRule>,
    #[serde(default)]
    pub equipment: Vec<EquipmentItem>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    /// Delivery attempts per event before it is buffered.
    #[serde(default = "default_send_attempts")]
    pub max_send_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Undelivered events kept for the next send.
    #[serde(default = "default_redelivery_capacity")]
    pub redelivery_capacity: usize,
}

fn default_send_attempts() -> u32 { 3 }
fn default_retry_base_ms() -> u64 { 100 }
fn default_retry_max_ms() -> u64 { 2_000 }
fn default_redelivery_capacity() -> usize { 1_000 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `COURTSIDE__SERVER__PORT=8081`
            .add_source(config::Environment::with_prefix("COURTSIDE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
