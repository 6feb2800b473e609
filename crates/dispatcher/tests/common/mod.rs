#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use explorer_core::config::{ExploreConfig, QueryRetryConfig};
use explorer_core::models::{ColumnMeta, QueryPage, Row, TableRef, TaskConfig};
use explorer_core::traits::{MetadataResolver, RemoteQueryService};
use explorer_core::{ExecutionContext, ExploreError, ExploreResult};
use explorer_dispatcher::{GroupExecutor, LifecycleNotifier, LockGate, TaskSplitter};
use explorer_infrastructure::{InMemoryBackend, MetricsCollector, StaticMetadataResolver};
use explorer_worker::{RetryingQueryClient, RuleQueryWorker};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "explore_report_finished";

/// 三条合并规则 + 一条统计规则：共两条查询
pub const MERGED_SPEC: &str = r#"{
    "fieldRules": [
        {"fieldId": "f_age", "rules": [
            {"ruleId": "n", "kind": "null_count"},
            {"ruleId": "mx", "kind": "max"}
        ]},
        {"fieldId": "f_status", "rules": [{"ruleId": "d", "kind": "dictionary", "config": {"values": ["active", "closed"]}}]},
        {"fieldId": "f_email", "rules": [{"ruleId": "fmt", "kind": "format", "config": {"preset": "email"}}]}
    ]
}"#;

/// 合并查询、统计查询与两条行级规则：共四条查询
pub const FOUR_QUERY_SPEC: &str = r#"{
    "fieldRules": [
        {"fieldId": "f_age", "rules": [
            {"ruleId": "n", "kind": "null_count"},
            {"ruleId": "mx", "kind": "max"}
        ]}
    ],
    "rowRules": [
        {"ruleId": "adult", "name": "成年", "filter": {"type": "condition", "fieldId": "f_age", "op": "ge", "value": 18}},
        {"ruleId": "senior", "name": "老年", "filter": {"type": "condition", "fieldId": "f_age", "op": "ge", "value": 65}}
    ]
}"#;

pub const METADATA_ONLY_SPEC: &str = r#"{
    "metadataRules": [
        {"ruleId": "cmt", "name": "注释覆盖率", "kind": "column_comment_coverage"}
    ]
}"#;

/// 模拟远程查询服务：按 SQL 中的结果列别名构造一行结果
pub struct FakeQueryService {
    delay: Duration,
    fail_when: Option<String>,
    panic_when: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeQueryService {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_when: None,
            panic_when: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// SQL 包含该片段时返回查询被拒绝
    pub fn failing_when(mut self, fragment: &str) -> Self {
        self.fail_when = Some(fragment.to_string());
        self
    }

    /// SQL 包含该片段时直接 panic
    pub fn panicking_when(mut self, fragment: &str) -> Self {
        self.panic_when = Some(fragment.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteQueryService for FakeQueryService {
    async fn execute(
        &self,
        _table: &TableRef,
        sql: &str,
        _continuation_token: Option<&str>,
        _timeout: Duration,
    ) -> ExploreResult<QueryPage> {
        self.calls.lock().unwrap().push(sql.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(fragment) = &self.panic_when {
            if sql.contains(fragment.as_str()) {
                panic!("remote driver crashed on {fragment}");
            }
        }
        if let Some(fragment) = &self.fail_when {
            if sql.contains(fragment.as_str()) {
                return Err(ExploreError::QueryRejected(format!("line 1: {fragment}")));
            }
        }
        Ok(QueryPage {
            columns: vec![],
            rows: vec![row_for(sql)],
            next_token: None,
        })
    }
}

/// 100 行数据，没有问题行
fn row_for(sql: &str) -> Row {
    let mut row = Row::new();
    for alias in sql.split("AS \"").skip(1).filter_map(|rest| rest.split('"').next()) {
        let value: Value = if alias == "__total" {
            json!(100)
        } else if alias.ends_with("__issues") {
            json!(0)
        } else if alias.ends_with("__matches") {
            json!(100)
        } else {
            json!(42)
        };
        row.insert(alias.to_string(), value);
    }
    row
}

pub fn table() -> TableRef {
    TableRef {
        table_id: "t_users".into(),
        catalog: "hive".into(),
        database: "crm".into(),
        table: "users".into(),
    }
}

pub fn metadata() -> StaticMetadataResolver {
    let columns = [
        ("f_age", "age", "integer", Some("年龄")),
        ("f_status", "status", "varchar", Some("状态")),
        ("f_email", "email", "varchar", None),
    ]
    .into_iter()
    .map(|(id, name, data_type, comment)| ColumnMeta {
        field_id: id.into(),
        name: name.into(),
        data_type: data_type.into(),
        comment: comment.map(str::to_string),
    })
    .collect();
    StaticMetadataResolver::new().with_table("t_users", columns)
}

/// 第一次解析（拆分）正常返回，之后每次调用都 panic
pub struct CrashingMetadata {
    inner: StaticMetadataResolver,
    calls: AtomicUsize,
}

impl CrashingMetadata {
    pub fn new() -> Self {
        Self {
            inner: metadata(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MetadataResolver for CrashingMetadata {
    async fn resolve_columns(&self, table_id: &str) -> ExploreResult<HashMap<String, ColumnMeta>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            panic!("metadata cache corrupted");
        }
        self.inner.resolve_columns(table_id).await
    }
}

pub fn config() -> ExploreConfig {
    ExploreConfig {
        concurrency_limit: 4,
        concurrency_task_limit: 2,
        dispatch_poll_interval_ms: 10,
        report_lock_ttl_seconds: 30,
        query_retry: QueryRetryConfig {
            max_attempts: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn task(version: i32, rule_spec: &str) -> TaskConfig {
    task_for("task-1", version, rule_spec)
}

pub fn task_for(task_id: &str, version: i32, rule_spec: &str) -> TaskConfig {
    TaskConfig::new(task_id, version, table(), rule_spec)
}

/// 一个进程内的完整引擎，基于共享的内存后端
pub struct Harness {
    pub backend: InMemoryBackend,
    pub service: Arc<FakeQueryService>,
    pub splitter: TaskSplitter,
    pub executor: GroupExecutor,
    pub ctx: ExecutionContext,
}

impl Harness {
    pub fn new(service: FakeQueryService) -> Self {
        Self::with_config(InMemoryBackend::new(), Arc::new(service), config())
    }

    pub fn with_config(
        backend: InMemoryBackend,
        service: Arc<FakeQueryService>,
        config: ExploreConfig,
    ) -> Self {
        Self::with_metadata(backend, service, config, Arc::new(metadata()))
    }

    pub fn with_metadata(
        backend: InMemoryBackend,
        service: Arc<FakeQueryService>,
        config: ExploreConfig,
        metadata: Arc<dyn MetadataResolver>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let notifier = Arc::new(LifecycleNotifier::new(
            backend.reports.clone(),
            backend.events.clone(),
            TOPIC,
            metrics.clone(),
        ));
        let client = Arc::new(
            RetryingQueryClient::new(
                service.clone(),
                config.query_retry.clone(),
                Duration::from_secs(60),
            )
            .with_metrics(metrics.clone()),
        );
        let worker = Arc::new(RuleQueryWorker::new(
            backend.reports.clone(),
            client,
            metrics.clone(),
        ));
        let ctx = ExecutionContext::new("system", CancellationToken::new());

        let executor = GroupExecutor::new(
            &config,
            backend.reports.clone(),
            backend.reports.clone(),
            backend.task_configs.clone(),
            metadata.clone(),
            worker,
            LockGate::new(
                backend.locks.clone(),
                Duration::from_secs(config.report_lock_ttl_seconds),
            ),
            notifier.clone(),
            metrics.clone(),
            ctx.clone(),
        );
        let splitter = TaskSplitter::new(
            backend.task_configs.clone(),
            backend.reports.clone(),
            metadata,
            backend.locks.clone(),
            notifier,
            metrics,
            Duration::from_secs(config.split_lock_ttl_seconds),
            config.discovery_batch_size,
            config.default_sample_size,
        );

        Self {
            backend,
            service,
            splitter,
            executor,
            ctx,
        }
    }

    /// 与当前引擎共享存储、锁与远程服务的另一个进程
    pub fn sibling(&self) -> Self {
        Self::with_config(self.backend.clone(), self.service.clone(), config())
    }

    /// 拆分全部待处理任务，执行全部报告直至结束
    pub async fn run_to_completion(&self) {
        self.splitter.run_once(&self.ctx).await.unwrap();
        while self.executor.discover_once().await.unwrap() > 0 {
            self.executor.wait_idle().await;
        }
    }
}
