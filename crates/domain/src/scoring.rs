//! 评分聚合
//!
//! 规则得分 `(inspected - issues) / inspected`，保留4位小数并向下取整；
//! inspected 为 0 时得分为 0。逐级汇总：规则 -> 字段（同一维度取平均）->
//! 报告（各字段、各行级/视图级规则取平均）-> 总分（有得分的维度取平均）。
//! 没有任何规则贡献的维度保持为空，不按 0 计入。

use explorer_core::models::{ColumnMeta, Dimension, DimensionScores, ItemStatus, ReportItem, RuleLevel};
use explorer_core::{ExploreError, ExploreResult};
use std::collections::{BTreeMap, HashMap};

use crate::interpret::RuleOutcome;
use crate::rules::{MetadataRule, MetadataRuleKind};

const SCALE: i128 = 10_000;

/// 单条规则得分，4位小数向下取整
pub fn rule_score(inspected: i64, issues: i64) -> f64 {
    if inspected <= 0 {
        return 0.0;
    }
    let inspected = inspected as i128;
    let issues = (issues as i128).clamp(0, inspected);
    let scaled = (inspected - issues) * SCALE / inspected;
    scaled as f64 / SCALE as f64
}

/// 4位小数向下取整，容忍浮点表示误差
pub fn floor4(value: f64) -> f64 {
    ((value * SCALE as f64) + 1e-9).floor() / SCALE as f64
}

fn average(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(floor4(scores.iter().sum::<f64>() / scores.len() as f64))
}

/// 聚合结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    pub scores: DimensionScores,
    pub total_row_count: Option<i64>,
}

/// 评分单元：一个字段，或一条行级/视图级/元数据规则
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ScoreUnit {
    Field(String),
    Rule(String),
}

pub struct ScoringAggregator;

impl ScoringAggregator {
    /// 汇总一个报告全部成功报告项的得分
    ///
    /// 只应在所有报告项都成功后调用，未成功的报告项视为内部错误。
    pub fn aggregate(
        items: &[ReportItem],
        metadata_rules: &[MetadataRule],
        columns: &HashMap<String, ColumnMeta>,
    ) -> ExploreResult<ScoreSummary> {
        let mut unit_scores: BTreeMap<(Dimension, ScoreUnit), Vec<f64>> = BTreeMap::new();
        let mut total_row_count: Option<i64> = None;

        for item in items {
            if item.status != ItemStatus::Success {
                return Err(ExploreError::Internal(format!(
                    "报告项 {} 未成功，不能参与评分",
                    item.rule_id
                )));
            }
            let outcome = RuleOutcome::from_item(item)?.ok_or_else(|| {
                ExploreError::Internal(format!("报告项 {} 缺少执行结果", item.rule_id))
            })?;

            total_row_count =
                Some(total_row_count.map_or(outcome.inspected, |n| n.max(outcome.inspected)));

            let (Some(dimension), Some(issues)) = (item.dimension, outcome.issues) else {
                continue;
            };
            let unit = match (&item.level, &item.field_id) {
                (RuleLevel::Field, Some(field_id)) => ScoreUnit::Field(field_id.clone()),
                _ => ScoreUnit::Rule(format!("{}:{}", item.level.as_str(), item.rule_id)),
            };
            unit_scores
                .entry((dimension, unit))
                .or_default()
                .push(rule_score(outcome.inspected, issues));
        }

        for rule in metadata_rules {
            let (inspected, issues) = metadata_counts(rule, columns);
            unit_scores
                .entry((rule.dimension(), ScoreUnit::Rule(format!("metadata:{}", rule.rule_id))))
                .or_default()
                .push(rule_score(inspected, issues));
        }

        let mut per_dimension: BTreeMap<Dimension, Vec<f64>> = BTreeMap::new();
        for ((dimension, _), scores) in &unit_scores {
            if let Some(unit_score) = average(scores) {
                per_dimension.entry(*dimension).or_default().push(unit_score);
            }
        }

        let mut scores = DimensionScores::default();
        let mut dimension_scores = Vec::new();
        for dimension in Dimension::ALL {
            let score = per_dimension.get(&dimension).and_then(|s| average(s));
            if let Some(score) = score {
                dimension_scores.push(score);
            }
            scores.set(dimension, score);
        }
        scores.total = average(&dimension_scores);

        Ok(ScoreSummary {
            scores,
            total_row_count,
        })
    }
}

fn metadata_counts(rule: &MetadataRule, columns: &HashMap<String, ColumnMeta>) -> (i64, i64) {
    match rule.kind {
        MetadataRuleKind::ColumnCommentCoverage => {
            let inspected = columns.len() as i64;
            let matches = columns
                .values()
                .filter(|column| {
                    column
                        .comment
                        .as_deref()
                        .is_some_and(|comment| !comment.trim().is_empty())
                })
                .count() as i64;
            (inspected, inspected - matches)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_item(
        field_id: Option<&str>,
        rule_id: &str,
        level: RuleLevel,
        dimension: Option<Dimension>,
        inspected: i64,
        issues: Option<i64>,
    ) -> ReportItem {
        let outcome = RuleOutcome {
            inspected,
            issues,
            values: json!(null),
        };
        ReportItem {
            id: 0,
            code: "c".to_string(),
            field_id: field_id.map(str::to_string),
            column: None,
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            rule_kind: "null_count".to_string(),
            level,
            dimension,
            result_key: rule_id.to_string(),
            sql: String::new(),
            status: ItemStatus::Success,
            result: Some(outcome.to_json().unwrap()),
            reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_rule_score_rounding_is_floor() {
        assert_eq!(rule_score(100, 7), 0.93);
        assert_eq!(rule_score(3, 1), 0.6666);
        assert_eq!(rule_score(7, 0), 1.0);
        assert_eq!(rule_score(10, 25), 0.0);
        assert_eq!(rule_score(10, -3), 1.0);
    }

    #[test]
    fn test_zero_inspected_scores_zero() {
        let score = rule_score(0, 0);
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());

        let items = vec![
            success_item(Some("f1"), "a", RuleLevel::Field, Some(Dimension::Completeness), 0, Some(0)),
            success_item(Some("f2"), "b", RuleLevel::Field, Some(Dimension::Completeness), 10, Some(0)),
        ];
        let summary = ScoringAggregator::aggregate(&items, &[], &HashMap::new()).unwrap();
        assert_eq!(summary.scores.completeness, Some(0.5));
    }

    #[test]
    fn test_roll_up_field_then_report_then_total() {
        let items = vec![
            // f1 completeness: (1.0 + 0.5) / 2 = 0.75
            success_item(Some("f1"), "n1", RuleLevel::Field, Some(Dimension::Completeness), 10, Some(0)),
            success_item(Some("f1"), "n2", RuleLevel::Field, Some(Dimension::Completeness), 10, Some(5)),
            // f2 completeness: 0.25
            success_item(Some("f2"), "n3", RuleLevel::Field, Some(Dimension::Completeness), 100, Some(75)),
            // row rule accuracy: 0.9
            success_item(None, "row1", RuleLevel::Row, Some(Dimension::Accuracy), 10, Some(1)),
            // statistics do not score
            success_item(Some("f1"), "max", RuleLevel::Field, None, 100, None),
        ];

        let summary = ScoringAggregator::aggregate(&items, &[], &HashMap::new()).unwrap();
        assert_eq!(summary.scores.completeness, Some(0.5));
        assert_eq!(summary.scores.accuracy, Some(0.9));
        assert_eq!(summary.scores.uniqueness, None);
        assert_eq!(summary.scores.standardization, None);
        assert_eq!(summary.scores.consistency, None);
        assert_eq!(summary.scores.total, Some(0.7));
        assert_eq!(summary.total_row_count, Some(100));
    }

    #[test]
    fn test_metadata_rules_score_without_items() {
        let columns: HashMap<String, ColumnMeta> = [("a", Some("用户ID")), ("b", None), ("c", Some(" "))]
            .into_iter()
            .map(|(id, comment)| {
                (
                    id.to_string(),
                    ColumnMeta {
                        field_id: id.to_string(),
                        name: id.to_string(),
                        data_type: "varchar".to_string(),
                        comment: comment.map(str::to_string),
                    },
                )
            })
            .collect();
        let rules = vec![MetadataRule {
            rule_id: "cmt".to_string(),
            name: "注释覆盖率".to_string(),
            kind: MetadataRuleKind::ColumnCommentCoverage,
        }];

        let summary = ScoringAggregator::aggregate(&[], &rules, &columns).unwrap();
        assert_eq!(summary.scores.completeness, Some(0.3333));
        assert_eq!(summary.scores.total, Some(0.3333));
        assert_eq!(summary.total_row_count, None);
    }

    #[test]
    fn test_no_rules_yields_empty_scores() {
        let summary = ScoringAggregator::aggregate(&[], &[], &HashMap::new()).unwrap();
        assert_eq!(summary.scores, DimensionScores::default());
    }

    #[test]
    fn test_unfinished_item_is_rejected() {
        let mut item = success_item(Some("f"), "n", RuleLevel::Field, Some(Dimension::Completeness), 1, Some(0));
        item.status = ItemStatus::Canceled;
        assert!(ScoringAggregator::aggregate(&[item], &[], &HashMap::new()).is_err());
    }
}
