pub mod config;
pub mod context;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use context::ExecutionContext;
pub use errors::{ExploreError, ExploreResult};
