use async_trait::async_trait;
use explorer_core::config::MessageQueueConfig;
use explorer_core::traits::EventPublisher;
use explorer_core::{ExploreError, ExploreResult};
use lapin::{
    options::*, types::FieldTable, types::ShortString, BasicProperties, Channel, Connection,
    ConnectionProperties,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// 基于 RabbitMQ 的报告完成事件发布器
///
/// topic 对应一个持久化队列，首次发布前声明；消息 id 为业务 key（报告编码），
/// 下游按 key 去重即可满足至少一次投递。
pub struct RabbitMQEventPublisher {
    _connection: Connection,
    channel: Arc<Mutex<Channel>>,
    declared: Mutex<HashSet<String>>,
}

impl RabbitMQEventPublisher {
    /// 连接 RabbitMQ 并声明完成事件队列
    pub async fn new(config: &MessageQueueConfig) -> ExploreResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection =
            tokio::time::timeout(Duration::from_secs(config.connection_timeout_seconds), connect)
                .await
                .map_err(|_| ExploreError::Timeout("连接RabbitMQ超时".to_string()))?
                .map_err(|e| ExploreError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| ExploreError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        let publisher = Self {
            _connection: connection,
            channel: Arc::new(Mutex::new(channel)),
            declared: Mutex::new(HashSet::new()),
        };
        publisher.ensure_queue(&config.completion_topic).await?;
        Ok(publisher)
    }

    async fn ensure_queue(&self, queue_name: &str) -> ExploreResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue_name) {
            return Ok(());
        }

        let channel = self.channel.lock().await;
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ExploreError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        declared.insert(queue_name.to_string());
        debug!("队列 {} 声明成功", queue_name);
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RabbitMQEventPublisher {
    #[instrument(skip(self, payload), fields(topic = %topic, key = %key, payload_len = payload.len()))]
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> ExploreResult<()> {
        self.ensure_queue(topic).await?;

        let channel = self.channel.lock().await;
        channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type(ShortString::from("application/json"))
                    .with_message_id(ShortString::from(key.to_string())),
            )
            .await
            .map_err(|e| ExploreError::MessageQueue(format!("发布消息失败: {e}")))?
            .await
            .map_err(|e| ExploreError::MessageQueue(format!("消息确认失败: {e}")))?;

        debug!("消息已发布到队列 {}: {}", topic, key);
        Ok(())
    }
}
