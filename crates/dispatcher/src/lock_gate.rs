use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use explorer_core::traits::{DistributedLockService, Lease};
use explorer_core::ExploreResult;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 报告执行锁的 key
pub fn report_lock_key(code: &str) -> String {
    format!("explore:report:{code}")
}

/// 任务拆分锁的 key
pub fn split_lock_key(task_id: &str, version: i32) -> String {
    format!("explore:split:{task_id}:{version}")
}

/// 分布式锁闸门：获取带自动续期的锁
///
/// 续期间隔为 TTL 的三分之一。续期被拒绝，或连续失败超过一个 TTL，
/// 都视为锁已丢失，立即取消调用方提供的 token。
#[derive(Clone)]
pub struct LockGate {
    locks: Arc<dyn DistributedLockService>,
    ttl: Duration,
}

impl LockGate {
    pub fn new(locks: Arc<dyn DistributedLockService>, ttl: Duration) -> Self {
        Self { locks, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 尝试获取锁；已被其他进程持有时返回 `Ok(None)`
    pub async fn try_lock(
        &self,
        key: &str,
        on_lost: CancellationToken,
    ) -> ExploreResult<Option<HeldLock>> {
        let Some(lease) = self.locks.acquire(key, self.ttl).await? else {
            return Ok(None);
        };

        let stop = CancellationToken::new();
        let lost = Arc::new(AtomicBool::new(false));
        let refresher = tokio::spawn(refresh_loop(
            self.locks.clone(),
            lease.clone(),
            self.ttl,
            stop.clone(),
            on_lost,
            lost.clone(),
        ));

        debug!(lock.key = %key, "获取锁成功，已启动自动续期");
        Ok(Some(HeldLock {
            locks: self.locks.clone(),
            lease,
            stop,
            lost,
            refresher: Some(refresher),
        }))
    }
}

async fn refresh_loop(
    locks: Arc<dyn DistributedLockService>,
    lease: Lease,
    ttl: Duration,
    stop: CancellationToken,
    on_lost: CancellationToken,
    lost: Arc<AtomicBool>,
) {
    let period = (ttl / 3).max(Duration::from_millis(10));
    let mut last_refreshed = Instant::now();

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        match locks.refresh(&lease, ttl).await {
            Ok(true) => last_refreshed = Instant::now(),
            Ok(false) => {
                error!(lock.key = %lease.key, "锁续期被拒绝，锁已丢失");
                break;
            }
            Err(e) if last_refreshed.elapsed() < ttl => {
                warn!(lock.key = %lease.key, error = %e, "锁续期失败，稍后重试");
            }
            Err(e) => {
                error!(lock.key = %lease.key, error = %e, "锁续期持续失败超过TTL，视为锁已丢失");
                break;
            }
        }
    }

    lost.store(true, Ordering::SeqCst);
    on_lost.cancel();
}

/// 已持有的锁；释放前后台任务持续续期
pub struct HeldLock {
    locks: Arc<dyn DistributedLockService>,
    lease: Lease,
    stop: CancellationToken,
    lost: Arc<AtomicBool>,
    refresher: Option<JoinHandle<()>>,
}

impl HeldLock {
    pub fn key(&self) -> &str {
        &self.lease.key
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// 停止续期并释放锁
    pub async fn release(mut self) {
        self.stop.cancel();
        if let Some(refresher) = self.refresher.take() {
            let _ = refresher.await;
        }
        if self.is_lost() {
            return;
        }
        if let Err(e) = self.locks.release(&self.lease).await {
            warn!(lock.key = %self.lease.key, error = %e, "释放锁失败，等待其自然过期");
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use explorer_infrastructure::InMemoryLockService;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let locks = Arc::new(InMemoryLockService::new());
        let gate = LockGate::new(locks.clone(), Duration::from_secs(30));

        let held = gate
            .try_lock("explore:report:a", CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(gate
            .try_lock("explore:report:a", CancellationToken::new())
            .await
            .unwrap()
            .is_none());

        held.release().await;
        assert!(!locks.is_held("explore:report:a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_lock_beyond_ttl() {
        let locks = Arc::new(InMemoryLockService::new());
        let gate = LockGate::new(locks.clone(), Duration::from_secs(3));
        let on_lost = CancellationToken::new();

        let held = gate.try_lock("k", on_lost.clone()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(locks.is_held("k").await);
        assert!(!on_lost.is_cancelled());
        held.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lock_cancels_token() {
        let locks = Arc::new(InMemoryLockService::new());
        let gate = LockGate::new(locks.clone(), Duration::from_secs(3));
        let on_lost = CancellationToken::new();

        let held = gate.try_lock("k", on_lost.clone()).await.unwrap().unwrap();
        locks.force_expire("k").await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(on_lost.is_cancelled());
        assert!(held.is_lost());
        held.release().await;
    }

    #[test]
    fn test_lock_keys() {
        assert_eq!(report_lock_key("abc"), "explore:report:abc");
        assert_eq!(split_lock_key("t1", 3), "explore:split:t1:3");
    }
}
