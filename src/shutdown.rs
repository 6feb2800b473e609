use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 后台循环各自订阅关闭信号；触发后发送端被丢弃，之后的订阅者立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.shutdown_tx.read().await.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭；重复调用无副作用
    pub async fn shutdown(&self) {
        let mut guard = self.shutdown_tx.write().await;
        let Some(tx) = guard.take() else {
            debug!("关闭信号已经发送过");
            return;
        };
        debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
        let _ = tx.send(());
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.read().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
