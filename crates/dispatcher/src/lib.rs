//! Exploration dispatcher
//!
//! 任务拆分、报告准入与协调执行、分布式锁闸门以及报告终态通知。

pub mod group_executor;
pub mod group_manager;
pub mod lifecycle;
pub mod lock_gate;
pub mod task_splitter;

pub use group_executor::{Admission, GroupExecutor};
pub use group_manager::{group_by_sql, CoordinatorDeps, CoordinatorExit, GroupManager};
pub use lifecycle::LifecycleNotifier;
pub use lock_gate::{report_lock_key, split_lock_key, HeldLock, LockGate};
pub use task_splitter::{SplitOutcome, SplitStats, TaskSplitter};
