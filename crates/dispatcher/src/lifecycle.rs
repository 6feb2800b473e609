use std::sync::Arc;

use explorer_core::models::{Report, ReportFinishedEvent, ReportOutcome, ReportStatus};
use explorer_core::traits::{EventPublisher, ReportRepository};
use explorer_core::ExploreResult;
use explorer_infrastructure::MetricsCollector;
use tracing::{debug, error, warn};

/// 报告终态后的收尾：维护最新报告标记并发布数据就绪事件
pub struct LifecycleNotifier {
    reports: Arc<dyn ReportRepository>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    metrics: Arc<MetricsCollector>,
}

impl LifecycleNotifier {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            reports,
            publisher,
            topic: topic.into(),
            metrics,
        }
    }

    /// 写回终态，然后执行收尾
    pub async fn finalize(&self, code: &str, outcome: ReportOutcome) -> ExploreResult<Report> {
        let report = self.reports.finalize(code, &outcome).await?;
        self.on_finalized(&report).await;
        Ok(report)
    }

    /// 对已写入终态的报告执行收尾
    ///
    /// 只有成功的报告会成为最新报告；事件对所有终态都发布，发布失败只记录日志。
    pub async fn on_finalized(&self, report: &Report) {
        self.metrics.record_report_finished(report.status.as_str());

        if report.status == ReportStatus::Success {
            if let Err(e) = self.reports.set_latest(&report.task_id, &report.code).await {
                error!(
                    report.code = %report.code,
                    task.id = %report.task_id,
                    error = %e,
                    "更新最新报告标记失败"
                );
            }
        }

        let event = ReportFinishedEvent::from_report(report);
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(report.code = %report.code, error = %e, "序列化报告完成事件失败");
                return;
            }
        };

        match self.publisher.publish(&self.topic, &report.code, &payload).await {
            Ok(()) => debug!(report.code = %report.code, topic = %self.topic, "报告完成事件已发布"),
            Err(e) => warn!(
                report.code = %report.code,
                topic = %self.topic,
                error = %e,
                "发布报告完成事件失败"
            ),
        }
    }
}
