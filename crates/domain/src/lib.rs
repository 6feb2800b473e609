//! 探查规则领域：规则模型、编译、结果解析与评分

pub mod compiler;
pub mod filter;
pub mod interpret;
pub mod rules;
pub mod scoring;
pub mod sql;

pub use compiler::{CompiledItem, CompiledTask, RuleCompiler, TableInfo, DEFAULT_SAMPLE_SIZE};
pub use filter::{DataType, FilterNode, FilterOp};
pub use interpret::{interpret, RuleOutcome};
pub use rules::{RuleKind, RuleSpec, RuleTag};
pub use scoring::{rule_score, ScoreSummary, ScoringAggregator};
