pub mod repository;
pub mod services;

pub use repository::{ReportItemRepository, ReportRepository, TaskConfigRepository};
pub use services::{DistributedLockService, EventPublisher, Lease, MetadataResolver, RemoteQueryService};
