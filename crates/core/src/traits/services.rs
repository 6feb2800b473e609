//! 外部协作服务接口：远程查询、分布式锁、消息总线与元数据解析

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ExploreResult;
use crate::models::{ColumnMeta, QueryPage, TableRef};

/// 远程查询服务，单次调用返回一页结果
#[async_trait]
pub trait RemoteQueryService: Send + Sync {
    async fn execute(
        &self,
        table: &TableRef,
        sql: &str,
        continuation_token: Option<&str>,
        timeout: Duration,
    ) -> ExploreResult<QueryPage>;
}

/// 已获取的锁，token 用于校验持有者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
}

#[async_trait]
pub trait DistributedLockService: Send + Sync {
    /// 未获取到锁时返回 `Ok(None)`
    async fn acquire(&self, key: &str, ttl: Duration) -> ExploreResult<Option<Lease>>;

    /// 续期；锁已不属于当前持有者时返回 `Ok(false)`
    async fn refresh(&self, lease: &Lease, ttl: Duration) -> ExploreResult<bool>;

    async fn release(&self, lease: &Lease) -> ExploreResult<()>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> ExploreResult<()>;
}

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// 返回 field_id -> 列信息
    async fn resolve_columns(&self, table_id: &str) -> ExploreResult<HashMap<String, ColumnMeta>>;
}
