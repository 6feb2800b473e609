pub mod http_clients;
pub mod query_client;
pub mod rule_query_worker;

pub use http_clients::{HttpMetadataResolver, HttpQueryService};
pub use query_client::{backoff_delay, RetryingQueryClient};
pub use rule_query_worker::{BatchOutcome, QueryBatch, RuleQueryWorker};
