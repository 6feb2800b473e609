pub mod app_config;
pub mod database;
pub mod explore;
pub mod message_queue;
pub mod observability;
pub mod redis;
pub mod remote;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use explore::{BackoffKind, ExploreConfig, QueryRetryConfig};
pub use message_queue::MessageQueueConfig;
pub use observability::ObservabilityConfig;
pub use redis::RedisConfig;
pub use remote::{MetadataConfig, QueryServiceConfig};
