pub mod app_config;
pub mod events;
pub mod redis_repo;

pub use app_config::Config;
pub use events::{EventProducer, RedeliveryQueue, RetryPolicy};
pub use redis_repo::RedisClient;
