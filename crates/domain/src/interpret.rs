//! 查询结果解析：把远程查询返回的原始行转换为单条规则的检查结果

use explorer_core::models::{ReportItem, Row};
use explorer_core::{ExploreError, ExploreResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::compiler::TOTAL_COLUMN;
use crate::rules::{IssuePolicy, QueryFamily, RuleTag};

/// 单条规则的检查结果，序列化后写入报告项的 `result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// 检查行数
    pub inspected: i64,
    /// 问题行数，统计类规则不参与评分时为 None
    pub issues: Option<i64>,
    #[serde(default)]
    pub values: Value,
}

impl RuleOutcome {
    pub fn to_json(&self) -> ExploreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 读取报告项上已保存的结果
    pub fn from_item(item: &ReportItem) -> ExploreResult<Option<Self>> {
        item.result
            .as_deref()
            .map(|raw| serde_json::from_str(raw).map_err(ExploreError::from))
            .transpose()
    }
}

pub fn interpret(item: &ReportItem, rows: &[Row]) -> ExploreResult<RuleOutcome> {
    let tag = RuleTag::parse(&item.rule_kind)?;
    let profile = tag.profile();
    let key = item.result_key.as_str();

    if profile.family == QueryFamily::GroupByTime {
        return interpret_time_distribution(key, rows);
    }

    let row = rows.first().ok_or_else(|| {
        ExploreError::Internal(format!("规则 {} 的查询结果为空", item.rule_id))
    })?;
    let inspected = cell_i64(row, TOTAL_COLUMN)?;

    let outcome = match profile.issue_policy {
        IssuePolicy::RawCount => {
            let issues = cell_i64(row, &format!("{key}__issues"))?;
            RuleOutcome {
                inspected,
                issues: Some(issues),
                values: json!({ "issues": issues }),
            }
        }
        IssuePolicy::InspectedMinusMatches => {
            let matches = cell_i64(row, &format!("{key}__matches"))?;
            RuleOutcome {
                inspected,
                issues: Some(inspected - matches),
                values: json!({ "matches": matches }),
            }
        }
        IssuePolicy::NotScored => {
            let values = if tag == RuleTag::TrueFalseCount {
                json!({
                    "true": cell_i64(row, &format!("{key}__true"))?,
                    "false": cell_i64(row, &format!("{key}__false"))?,
                })
            } else {
                cell(row, key)?.clone()
            };
            RuleOutcome {
                inspected,
                issues: None,
                values,
            }
        }
    };
    Ok(outcome)
}

fn interpret_time_distribution(key: &str, rows: &[Row]) -> ExploreResult<RuleOutcome> {
    let mut buckets = Vec::new();
    let mut inspected = 0;
    for row in rows {
        if cell(row, "rule_key")?.as_str() != Some(key) {
            continue;
        }
        let count = cell_i64(row, "cnt")?;
        inspected += count;
        buckets.push(json!({ "bucket": cell(row, "bucket")?, "count": count }));
    }
    Ok(RuleOutcome {
        inspected,
        issues: None,
        values: Value::Array(buckets),
    })
}

fn cell<'a>(row: &'a Row, column: &str) -> ExploreResult<&'a Value> {
    row.get(column)
        .ok_or_else(|| ExploreError::Internal(format!("查询结果缺少列: {column}")))
}

/// 读取计数列；数值可能以 JSON 数字或数字字符串返回，空表上的 SUM 为 NULL 按 0 处理
fn cell_i64(row: &Row, column: &str) -> ExploreResult<i64> {
    let value = cell(row, column)?;
    let parsed = match value {
        Value::Null => Some(0),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.round() as i64)),
        _ => None,
    };
    parsed.ok_or_else(|| ExploreError::Internal(format!("列 {column} 的取值不是数值: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use explorer_core::models::{ItemStatus, RuleLevel};

    fn item(kind: &str, key: &str) -> ReportItem {
        ReportItem {
            id: 1,
            code: "c".to_string(),
            field_id: Some("f".to_string()),
            column: Some("col".to_string()),
            rule_id: "r".to_string(),
            rule_name: "r".to_string(),
            rule_kind: kind.to_string(),
            level: RuleLevel::Field,
            dimension: None,
            result_key: key.to_string(),
            sql: String::new(),
            status: ItemStatus::Executing,
            result: None,
            reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merged_row_is_split_per_item() {
        let rows = vec![row(json!({
            "__total": 100,
            "r_f_a__issues": "7",
            "r_f_b__matches": 90.0,
            "r_f_c": 42
        }))];

        let null = interpret(&item("null_count", "r_f_a"), &rows).unwrap();
        assert_eq!(null.inspected, 100);
        assert_eq!(null.issues, Some(7));

        let dict = interpret(&item("dictionary", "r_f_b"), &rows).unwrap();
        assert_eq!(dict.issues, Some(10));

        let max = interpret(&item("max", "r_f_c"), &rows).unwrap();
        assert_eq!(max.issues, None);
        assert_eq!(max.values, json!(42));
    }

    #[test]
    fn test_empty_table_sum_is_zero() {
        let rows = vec![row(json!({"__total": 0, "r_x__matches": null}))];
        let outcome = interpret(&item("format", "r_x"), &rows).unwrap();
        assert_eq!(outcome.inspected, 0);
        assert_eq!(outcome.issues, Some(0));
    }

    #[test]
    fn test_group_by_time_rows_filtered_by_rule_key() {
        let rows = vec![
            row(json!({"rule_key": "r_day", "bucket": "2024-01-01", "cnt": 3})),
            row(json!({"rule_key": "r_month", "bucket": "2024-01", "cnt": 5})),
            row(json!({"rule_key": "r_day", "bucket": "2024-01-02", "cnt": "2"})),
        ];
        let outcome = interpret(&item("group_by_time", "r_day"), &rows).unwrap();
        assert_eq!(outcome.inspected, 5);
        assert_eq!(outcome.values.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_column_is_internal_error() {
        let rows = vec![row(json!({"__total": 10}))];
        let err = interpret(&item("unique", "r_u"), &rows).unwrap_err();
        assert!(matches!(err, ExploreError::Internal(_)));

        let err = interpret(&item("unique", "r_u"), &[]).unwrap_err();
        assert!(matches!(err, ExploreError::Internal(_)));
    }

    #[test]
    fn test_true_false_counts() {
        let rows = vec![row(json!({"__total": 9, "r_b__true": 6, "r_b__false": 2}))];
        let outcome = interpret(&item("true_false_count", "r_b"), &rows).unwrap();
        assert_eq!(outcome.values, json!({"true": 6, "false": 2}));
    }

    #[test]
    fn test_outcome_stored_on_item() {
        let mut stored = item("null_count", "r_f_a");
        assert_eq!(RuleOutcome::from_item(&stored).unwrap(), None);

        let outcome = RuleOutcome {
            inspected: 10,
            issues: Some(1),
            values: json!({"issues": 1}),
        };
        stored.result = Some(outcome.to_json().unwrap());
        assert_eq!(RuleOutcome::from_item(&stored).unwrap(), Some(outcome));
    }
}
