//! 内存实现的协作服务
//!
//! 行为与 PostgreSQL / Redis / RabbitMQ 实现保持一致（唯一约束、事务性的
//! 最新标记、按 token 校验的锁），用于单进程运行与测试。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use explorer_core::models::{
    ColumnMeta, ItemStatus, ItemUpdate, Report, ReportItem, ReportOutcome, ReportStatus,
    TaskConfig, TaskExecStatus,
};
use explorer_core::traits::{
    DistributedLockService, EventPublisher, Lease, MetadataResolver, ReportItemRepository,
    ReportRepository, TaskConfigRepository,
};
use explorer_core::{ExploreError, ExploreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// 内存任务配置仓储
#[derive(Default)]
pub struct InMemoryTaskConfigRepository {
    tasks: Mutex<Vec<TaskConfig>>,
    next_id: AtomicI64,
}

impl InMemoryTaskConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个任务版本；同一任务的旧版本取消最新标记
    pub async fn insert(&self, mut task: TaskConfig) -> TaskConfig {
        let mut tasks = self.tasks.lock().await;
        task.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if task.is_latest_version {
            for existing in tasks.iter_mut().filter(|t| t.task_id == task.task_id) {
                existing.is_latest_version = false;
            }
        }
        tasks.push(task.clone());
        task
    }

    pub async fn get(&self, id: i64) -> Option<TaskConfig> {
        self.tasks.lock().await.iter().find(|t| t.id == id).cloned()
    }
}

#[async_trait]
impl TaskConfigRepository for InMemoryTaskConfigRepository {
    async fn get_undone(&self, limit: i64) -> ExploreResult<Vec<TaskConfig>> {
        let tasks = self.tasks.lock().await;
        let mut undone: Vec<TaskConfig> = tasks
            .iter()
            .filter(|t| t.exec_status == TaskExecStatus::Undone && !t.deleted)
            .cloned()
            .collect();
        undone.sort_by_key(|t| t.created_at);
        undone.truncate(limit.max(0) as usize);
        Ok(undone)
    }

    async fn get_by_version(
        &self,
        task_id: &str,
        version: i32,
    ) -> ExploreResult<Option<TaskConfig>> {
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .iter()
            .find(|t| t.task_id == task_id && t.version == version && !t.deleted)
            .cloned())
    }

    async fn update_exec_status(
        &self,
        id: i64,
        status: TaskExecStatus,
        reason: Option<&str>,
    ) -> ExploreResult<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ExploreError::database_error(format!("任务配置 {id} 不存在")))?;
        task.exec_status = status;
        task.exec_reason = reason.map(str::to_string);
        Ok(())
    }
}

#[derive(Default)]
struct ReportTables {
    reports: Vec<Report>,
    items: Vec<ReportItem>,
}

/// 内存报告存储，同时实现报告与报告项仓储
#[derive(Default)]
pub struct InMemoryReportStore {
    tables: Mutex<ReportTables>,
    next_report_id: AtomicI64,
    next_item_id: AtomicI64,
    fail_item_updates: AtomicBool,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续的报告项更新返回数据库错误
    pub fn set_fail_item_updates(&self, fail: bool) {
        self.fail_item_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.tables.lock().await.reports.clone()
    }

    pub async fn items(&self) -> Vec<ReportItem> {
        self.tables.lock().await.items.clone()
    }
}

#[async_trait]
impl ReportRepository for InMemoryReportStore {
    async fn exists_for_version(&self, task_id: &str, version: i32) -> ExploreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reports
            .iter()
            .any(|r| r.task_id == task_id && r.task_version == version))
    }

    async fn create_with_items(
        &self,
        report: &Report,
        items: &[ReportItem],
    ) -> ExploreResult<Report> {
        let mut tables = self.tables.lock().await;
        if tables
            .reports
            .iter()
            .any(|r| r.task_id == report.task_id && r.task_version == report.task_version)
        {
            return Err(ExploreError::AlreadySplit {
                task_id: report.task_id.clone(),
                version: report.task_version,
            });
        }
        if tables.reports.iter().any(|r| r.code == report.code) {
            return Err(ExploreError::database_error(format!(
                "报告编码重复: {}",
                report.code
            )));
        }

        let mut created = report.clone();
        created.id = self.next_report_id.fetch_add(1, Ordering::SeqCst) + 1;
        for item in items {
            let mut stored = item.clone();
            stored.id = self.next_item_id.fetch_add(1, Ordering::SeqCst) + 1;
            stored.code = created.code.clone();
            tables.items.push(stored);
        }
        tables.reports.push(created.clone());
        Ok(created)
    }

    async fn get_by_code(&self, code: &str) -> ExploreResult<Option<Report>> {
        let tables = self.tables.lock().await;
        Ok(tables.reports.iter().find(|r| r.code == code).cloned())
    }

    async fn get_runnable(&self, limit: i64) -> ExploreResult<Vec<Report>> {
        let tables = self.tables.lock().await;
        let mut runnable: Vec<Report> = tables
            .reports
            .iter()
            .filter(|r| matches!(r.status, ReportStatus::Undone | ReportStatus::Executing))
            .cloned()
            .collect();
        runnable.sort_by_key(|r| r.created_at);
        runnable.truncate(limit.max(0) as usize);
        Ok(runnable)
    }

    async fn update_status(&self, code: &str, status: ReportStatus) -> ExploreResult<()> {
        let mut tables = self.tables.lock().await;
        let report = tables
            .reports
            .iter_mut()
            .find(|r| r.code == code)
            .ok_or_else(|| ExploreError::report_not_found(code))?;
        report.status = status;
        Ok(())
    }

    async fn finalize(&self, code: &str, outcome: &ReportOutcome) -> ExploreResult<Report> {
        let mut tables = self.tables.lock().await;
        let report = tables
            .reports
            .iter_mut()
            .find(|r| r.code == code)
            .ok_or_else(|| ExploreError::report_not_found(code))?;
        report.status = outcome.status;
        report.reason = outcome.reason.clone();
        report.scores = outcome.scores.clone();
        report.total_row_count = outcome.total_row_count;
        report.finished_at = Some(outcome.finished_at);
        Ok(report.clone())
    }

    async fn set_latest(&self, task_id: &str, code: &str) -> ExploreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables
            .reports
            .iter()
            .any(|r| r.task_id == task_id && r.code == code)
        {
            return Err(ExploreError::report_not_found(code));
        }
        for report in tables.reports.iter_mut().filter(|r| r.task_id == task_id) {
            report.is_latest = report.code == code;
        }
        Ok(())
    }

    async fn list_by_task(&self, task_id: &str) -> ExploreResult<Vec<Report>> {
        let tables = self.tables.lock().await;
        let mut reports: Vec<Report> = tables
            .reports
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }
}

#[async_trait]
impl ReportItemRepository for InMemoryReportStore {
    async fn list_by_code(&self, code: &str) -> ExploreResult<Vec<ReportItem>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .iter()
            .filter(|i| i.code == code)
            .cloned()
            .collect())
    }

    async fn mark_executing(&self, ids: &[i64], started_at: DateTime<Utc>) -> ExploreResult<()> {
        let mut tables = self.tables.lock().await;
        for item in tables.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            item.status = ItemStatus::Executing;
            item.started_at = Some(started_at);
        }
        Ok(())
    }

    async fn update_items(&self, updates: &[ItemUpdate]) -> ExploreResult<()> {
        if self.fail_item_updates.load(Ordering::SeqCst) {
            return Err(ExploreError::database_error("报告项更新失败（模拟）"));
        }
        let mut tables = self.tables.lock().await;
        for update in updates {
            if let Some(item) = tables.items.iter_mut().find(|i| i.id == update.id) {
                item.status = update.status;
                item.result = update.result.clone();
                item.reason = update.reason.clone();
                if update.status == ItemStatus::Undone {
                    item.started_at = None;
                    item.finished_at = None;
                } else {
                    item.finished_at = Some(update.finished_at);
                }
            }
        }
        Ok(())
    }
}

/// 进程内锁服务，多个执行器共享同一实例即可模拟多进程竞争
#[derive(Default)]
pub struct InMemoryLockService {
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 强制删除锁，模拟锁过期后被其他进程抢占
    pub async fn force_expire(&self, key: &str) {
        self.locks.lock().await.remove(key);
    }

    pub async fn is_held(&self, key: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl DistributedLockService for InMemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> ExploreResult<Option<Lease>> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().simple().to_string();
        locks.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(Lease {
            key: key.to_string(),
            token,
        }))
    }

    async fn refresh(&self, lease: &Lease, ttl: Duration) -> ExploreResult<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get_mut(&lease.key) {
            Some((token, expires_at)) if *token == lease.token && *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &Lease) -> ExploreResult<()> {
        let mut locks = self.locks.lock().await;
        if locks
            .get(&lease.key)
            .is_some_and(|(token, _)| *token == lease.token)
        {
            locks.remove(&lease.key);
        }
        Ok(())
    }
}

/// 已发布的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// 记录所有发布消息的事件总线
#[derive(Default)]
pub struct InMemoryEventPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> ExploreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExploreError::MessageQueue("消息总线不可用（模拟）".to_string()));
        }
        self.messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// 按表 id 返回预置列信息的元数据解析器
#[derive(Default)]
pub struct StaticMetadataResolver {
    tables: HashMap<String, HashMap<String, ColumnMeta>>,
}

impl StaticMetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table_id: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        let columns = columns
            .into_iter()
            .map(|column| (column.field_id.clone(), column))
            .collect();
        self.tables.insert(table_id.into(), columns);
        self
    }
}

#[async_trait]
impl MetadataResolver for StaticMetadataResolver {
    async fn resolve_columns(&self, table_id: &str) -> ExploreResult<HashMap<String, ColumnMeta>> {
        self.tables.get(table_id).cloned().ok_or_else(|| {
            ExploreError::Configuration(format!("元数据服务中不存在表: {table_id}"))
        })
    }
}

/// 一组共享同一存储的内存协作服务
#[derive(Clone)]
pub struct InMemoryBackend {
    pub task_configs: Arc<InMemoryTaskConfigRepository>,
    pub reports: Arc<InMemoryReportStore>,
    pub locks: Arc<InMemoryLockService>,
    pub events: Arc<InMemoryEventPublisher>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            task_configs: Arc::new(InMemoryTaskConfigRepository::new()),
            reports: Arc::new(InMemoryReportStore::new()),
            locks: Arc::new(InMemoryLockService::new()),
            events: Arc::new(InMemoryEventPublisher::new()),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use explorer_core::models::{DimensionScores, RuleLevel, TableRef};

    fn table() -> TableRef {
        TableRef {
            table_id: "t1".to_string(),
            catalog: "hive".to_string(),
            database: "dw".to_string(),
            table: "users".to_string(),
        }
    }

    fn item(code: &str, rule_id: &str) -> ReportItem {
        ReportItem {
            id: 0,
            code: code.to_string(),
            field_id: Some("f1".to_string()),
            column: Some("age".to_string()),
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            rule_kind: "null_count".to_string(),
            level: RuleLevel::Field,
            dimension: None,
            result_key: rule_id.to_string(),
            sql: "SELECT 1".to_string(),
            status: ItemStatus::Undone,
            result: None,
            reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_task_config_versions_and_undone_listing() {
        let repo = InMemoryTaskConfigRepository::new();
        let v1 = repo.insert(TaskConfig::new("task", 1, table(), "{}")).await;
        let v2 = repo.insert(TaskConfig::new("task", 2, table(), "{}")).await;

        assert!(!repo.get(v1.id).await.unwrap().is_latest_version);
        assert!(repo.get(v2.id).await.unwrap().is_latest_version);

        repo.update_exec_status(v1.id, TaskExecStatus::Failed, Some("bad"))
            .await
            .unwrap();
        let undone = repo.get_undone(10).await.unwrap();
        assert_eq!(undone.len(), 1);
        assert_eq!(undone[0].version, 2);
        assert_eq!(
            repo.get(v1.id).await.unwrap().exec_reason.as_deref(),
            Some("bad")
        );
    }

    #[tokio::test]
    async fn test_create_with_items_rejects_second_split() {
        let store = InMemoryReportStore::new();
        let report = Report::new("c1", "task", 1, "system");
        store
            .create_with_items(&report, &[item("c1", "a"), item("c1", "b")])
            .await
            .unwrap();

        let duplicate = Report::new("c2", "task", 1, "system");
        let err = store
            .create_with_items(&duplicate, &[item("c2", "a")])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.reports().await.len(), 1);
        assert_eq!(store.items().await.len(), 2);
        assert!(store.exists_for_version("task", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_latest_keeps_single_flag() {
        let store = InMemoryReportStore::new();
        for (code, version) in [("a", 1), ("b", 2), ("c", 3)] {
            store
                .create_with_items(&Report::new(code, "task", version, "system"), &[])
                .await
                .unwrap();
            store
                .finalize(code, &ReportOutcome::success(DimensionScores::default(), None))
                .await
                .unwrap();
            store.set_latest("task", code).await.unwrap();
        }

        let latest: Vec<_> = store
            .list_by_task("task")
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_latest)
            .collect();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].code, "c");
        assert!(store.set_latest("task", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_lock_exclusion_refresh_and_release() {
        let locks = InMemoryLockService::new();
        let ttl = Duration::from_secs(5);
        let lease = locks.acquire("k", ttl).await.unwrap().unwrap();
        assert!(locks.acquire("k", ttl).await.unwrap().is_none());
        assert!(locks.refresh(&lease, ttl).await.unwrap());

        let stranger = Lease {
            key: "k".to_string(),
            token: "other".to_string(),
        };
        locks.release(&stranger).await.unwrap();
        assert!(locks.is_held("k").await);

        locks.release(&lease).await.unwrap();
        assert!(!locks.is_held("k").await);

        let lease = locks.acquire("k", ttl).await.unwrap().unwrap();
        locks.force_expire("k").await;
        assert!(!locks.refresh(&lease, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_event_publisher_records_and_fails_on_demand() {
        let events = InMemoryEventPublisher::new();
        events.publish("topic", "code", b"{}").await.unwrap();
        events.set_failing(true);
        assert!(events.publish("topic", "code2", b"{}").await.is_err());

        let messages = events.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, "code");
    }
}
