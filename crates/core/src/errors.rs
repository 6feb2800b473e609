use thiserror::Error;

/// 探查引擎错误类型定义
///
/// 错误分为四类：配置错误（不重试，直接终止任务/报告）、瞬时执行错误
/// （有限次退避重试）、冲突错误（其他进程已持有报告，静默跳过）以及
/// 持久化错误（记录日志并按失败处理）。
#[derive(Debug, Clone, Error)]
pub enum ExploreError {
    #[error("数据库操作错误: {0}")]
    Database(String),

    #[error("规则配置无效: {0}")]
    InvalidRuleConfig(String),

    #[error("操作符 {op} 不支持字段类型 {data_type}")]
    WhereOpNotAllowed { op: String, data_type: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("探查任务未找到: task_id={task_id}, version={version}")]
    TaskConfigNotFound { task_id: String, version: i32 },

    #[error("报告未找到: {code}")]
    ReportNotFound { code: String },

    #[error("任务已拆分: task_id={task_id}, version={version}")]
    AlreadySplit { task_id: String, version: i32 },

    #[error("未获取到分布式锁: {key}")]
    LockNotObtained { key: String },

    #[error("分布式锁错误: {0}")]
    Lock(String),

    #[error("远程查询错误: {0}")]
    RemoteQuery(String),

    #[error("查询被远程服务拒绝: {0}")]
    QueryRejected(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("执行已取消: {0}")]
    Canceled(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type ExploreResult<T> = std::result::Result<T, ExploreError>;

impl ExploreError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }
    pub fn invalid_rule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRuleConfig(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn report_not_found<S: Into<String>>(code: S) -> Self {
        Self::ReportNotFound { code: code.into() }
    }
    pub fn lock_not_obtained<S: Into<String>>(key: S) -> Self {
        Self::LockNotObtained { key: key.into() }
    }
    pub fn canceled<S: Into<String>>(msg: S) -> Self {
        Self::Canceled(msg.into())
    }

    /// 瞬时错误：可以退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExploreError::RemoteQuery(_)
                | ExploreError::Timeout(_)
                | ExploreError::Network(_)
                | ExploreError::MessageQueue(_)
                | ExploreError::Lock(_)
        )
    }

    /// 冲突错误：其他进程正在处理，属于正常并发噪音
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ExploreError::LockNotObtained { .. } | ExploreError::AlreadySplit { .. }
        )
    }

    /// 配置错误：对所属任务/报告总是终态，不重试
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExploreError::InvalidRuleConfig(_)
                | ExploreError::WhereOpNotAllowed { .. }
                | ExploreError::Configuration(_)
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExploreError::Canceled(_))
    }

    /// 写入报告 reason 字段的可读摘要
    pub fn user_message(&self) -> String {
        match self {
            ExploreError::InvalidRuleConfig(msg) => format!("规则配置无效: {msg}"),
            ExploreError::WhereOpNotAllowed { op, data_type } => {
                format!("过滤条件不合法: 操作符 {op} 不支持 {data_type} 类型字段")
            }
            ExploreError::Timeout(_) => "查询超时".to_string(),
            ExploreError::Canceled(msg) => format!("执行已取消: {msg}"),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ExploreError {
    fn from(err: sqlx::Error) -> Self {
        ExploreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ExploreError {
    fn from(err: serde_json::Error) -> Self {
        ExploreError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ExploreError {
    fn from(err: anyhow::Error) -> Self {
        ExploreError::Internal(err.to_string())
    }
}
