pub mod postgres_report_item_repository;
pub mod postgres_report_repository;
pub mod postgres_task_config_repository;

pub use postgres_report_item_repository::PostgresReportItemRepository;
pub use postgres_report_repository::PostgresReportRepository;
pub use postgres_task_config_repository::PostgresTaskConfigRepository;
