pub mod manager;
pub mod postgres;

pub use manager::{DatabaseManager, DbPool};
pub use postgres::{
    PostgresReportItemRepository, PostgresReportRepository, PostgresTaskConfigRepository,
};
