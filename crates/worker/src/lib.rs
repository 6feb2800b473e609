//! 规则查询执行：远程查询客户端（重试 + 续页）与规则查询工作单元

pub mod components;

pub use components::{
    BatchOutcome, HttpMetadataResolver, HttpQueryService, QueryBatch, RetryingQueryClient,
    RuleQueryWorker,
};
