//! 基于 Redis 的分布式锁
//!
//! 加锁使用 `SET key token NX PX ttl`；续期与释放通过 Lua 脚本先比对
//! token，只有持有者才能操作，过期后被他人抢占的锁不会被误删。

use async_trait::async_trait;
use explorer_core::config::RedisConfig;
use explorer_core::traits::{DistributedLockService, Lease};
use explorer_core::{ExploreError, ExploreResult};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const REFRESH_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis 分布式锁服务
pub struct RedisLockService {
    connection: ConnectionManager,
    key_prefix: String,
    holder_id: String,
    refresh_script: redis::Script,
    release_script: redis::Script,
}

impl RedisLockService {
    /// 连接 Redis 并校验连通性
    pub async fn new(config: &RedisConfig) -> ExploreResult<Self> {
        let client = redis::Client::open(config.build_url())
            .map_err(|e| ExploreError::Lock(format!("创建Redis客户端失败: {e}")))?;

        let connect = client.get_connection_manager();
        let mut connection =
            tokio::time::timeout(Duration::from_secs(config.connection_timeout_seconds), connect)
                .await
                .map_err(|_| ExploreError::Timeout("连接Redis超时".to_string()))?
                .map_err(|e| ExploreError::Lock(format!("连接Redis失败: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| ExploreError::Lock(format!("Redis PING失败: {e}")))?;

        let holder_id = default_holder_id();
        info!(
            redis.host = %config.host,
            redis.port = config.port,
            lock.holder = %holder_id,
            "Redis分布式锁服务已就绪"
        );

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            holder_id,
            refresh_script: redis::Script::new(REFRESH_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    fn new_token(&self) -> String {
        format!("{}:{}", self.holder_id, Uuid::new_v4().simple())
    }
}

/// 主机名加进程内随机后缀，用于在 Redis 中辨认锁的持有者
fn default_holder_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}-{}", host, &Uuid::new_v4().simple().to_string()[..8])
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl DistributedLockService for RedisLockService {
    #[instrument(skip(self), fields(lock.key = %key, lock.ttl_ms = ttl.as_millis() as u64))]
    async fn acquire(&self, key: &str, ttl: Duration) -> ExploreResult<Option<Lease>> {
        let full_key = self.build_key(key);
        let token = self.new_token();
        let mut conn = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| ExploreError::Lock(format!("获取锁 {full_key} 失败: {e}")))?;

        match reply {
            Some(_) => {
                debug!("获取锁成功: {}", full_key);
                Ok(Some(Lease {
                    key: key.to_string(),
                    token,
                }))
            }
            None => {
                debug!("锁已被占用: {}", full_key);
                Ok(None)
            }
        }
    }

    async fn refresh(&self, lease: &Lease, ttl: Duration) -> ExploreResult<bool> {
        let full_key = self.build_key(&lease.key);
        let mut conn = self.connection.clone();

        let refreshed: i64 = self
            .refresh_script
            .key(&full_key)
            .arg(&lease.token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ExploreError::Lock(format!("续期锁 {full_key} 失败: {e}")))?;

        if refreshed == 0 {
            warn!(lock.key = %full_key, "锁已不属于当前持有者，续期失败");
        }
        Ok(refreshed == 1)
    }

    async fn release(&self, lease: &Lease) -> ExploreResult<()> {
        let full_key = self.build_key(&lease.key);
        let mut conn = self.connection.clone();

        let released: i64 = self
            .release_script
            .key(&full_key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ExploreError::Lock(format!("释放锁 {full_key} 失败: {e}")))?;

        if released == 0 {
            debug!("释放时锁已过期或被他人持有: {}", full_key);
        }
        Ok(())
    }
}
