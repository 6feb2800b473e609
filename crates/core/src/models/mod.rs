pub mod event;
pub mod query;
pub mod report;
pub mod task_config;

pub use event::ReportFinishedEvent;
pub use query::{ColumnMeta, QueryPage, Row};
pub use report::{
    Dimension, DimensionScores, ItemStatus, ItemUpdate, Report, ReportItem, ReportOutcome,
    ReportStatus, RuleLevel,
};
pub use task_config::{ExploreMode, TableRef, TaskConfig, TaskExecStatus, TimeRange};
