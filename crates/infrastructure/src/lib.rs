pub mod database;
pub mod memory;
pub mod message_queue;
pub mod observability;
pub mod redis_lock;

pub use database::*;
pub use memory::{
    InMemoryBackend, InMemoryEventPublisher, InMemoryLockService, InMemoryReportStore,
    InMemoryTaskConfigRepository, PublishedMessage, StaticMetadataResolver,
};
pub use message_queue::RabbitMQEventPublisher;
pub use observability::*;
pub use redis_lock::RedisLockService;
