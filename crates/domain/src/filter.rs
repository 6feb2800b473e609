//! 行级规则的结构化过滤条件与操作符/字段类型兼容表

use chrono::{NaiveDate, NaiveDateTime};
use explorer_core::models::ColumnMeta;
use explorer_core::{ExploreError, ExploreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::sql::{quote_ident, quote_literal};

/// 列的逻辑类型，由元数据中的物理类型归一化而来
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Other,
}

impl DataType {
    pub fn from_sql_type(sql_type: &str) -> Self {
        let lower = sql_type.trim().to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or_default().trim();
        match base {
            "varchar" | "char" | "string" | "text" => DataType::String,
            "tinyint" | "smallint" | "int" | "integer" | "bigint" => DataType::Integer,
            "real" | "float" | "double" | "decimal" | "numeric" => DataType::Decimal,
            "boolean" | "bool" => DataType::Boolean,
            "date" => DataType::Date,
            _ if base.starts_with("timestamp") => DataType::Timestamp,
            _ => DataType::Other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Null,
    NotNull,
    Include,
    Prefix,
    InList,
    Between,
    Before,
    Current,
}

impl FilterOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Null => "null",
            FilterOp::NotNull => "not null",
            FilterOp::Include => "include",
            FilterOp::Prefix => "prefix",
            FilterOp::InList => "in list",
            FilterOp::Between => "between",
            FilterOp::Before => "before",
            FilterOp::Current => "current",
        }
    }
}

use DataType as T;

const ALL_TYPES: &[DataType] = &[
    T::String,
    T::Integer,
    T::Decimal,
    T::Boolean,
    T::Date,
    T::Timestamp,
    T::Other,
];
const ORDERED: &[DataType] = &[T::Integer, T::Decimal, T::Date, T::Timestamp];
const TEXT: &[DataType] = &[T::String];
const LISTABLE: &[DataType] = &[T::String, T::Integer, T::Decimal];
const TEMPORAL: &[DataType] = &[T::Date, T::Timestamp];

/// 操作符允许作用的字段类型
const OPERATOR_TABLE: &[(FilterOp, &[DataType])] = &[
    (FilterOp::Eq, ALL_TYPES),
    (FilterOp::Ne, ALL_TYPES),
    (FilterOp::Lt, ORDERED),
    (FilterOp::Le, ORDERED),
    (FilterOp::Gt, ORDERED),
    (FilterOp::Ge, ORDERED),
    (FilterOp::Null, ALL_TYPES),
    (FilterOp::NotNull, ALL_TYPES),
    (FilterOp::Include, TEXT),
    (FilterOp::Prefix, TEXT),
    (FilterOp::InList, LISTABLE),
    (FilterOp::Between, ORDERED),
    (FilterOp::Before, TEMPORAL),
    (FilterOp::Current, TEMPORAL),
];

pub fn op_allowed(op: FilterOp, data_type: DataType) -> bool {
    OPERATOR_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == op)
        .is_some_and(|(_, types)| types.contains(&data_type))
}

/// 过滤条件树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterNode {
    And { children: Vec<FilterNode> },
    Or { children: Vec<FilterNode> },
    Condition(Condition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field_id: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

/// 将过滤树渲染为 SQL 谓词
pub fn render_filter(
    node: &FilterNode,
    columns: &HashMap<String, ColumnMeta>,
) -> ExploreResult<String> {
    match node {
        FilterNode::And { children } => render_group(children, " AND ", columns),
        FilterNode::Or { children } => render_group(children, " OR ", columns),
        FilterNode::Condition(condition) => render_condition(condition, columns),
    }
}

fn render_group(
    children: &[FilterNode],
    joiner: &str,
    columns: &HashMap<String, ColumnMeta>,
) -> ExploreResult<String> {
    if children.is_empty() {
        return Err(ExploreError::invalid_rule("过滤条件组不能为空"));
    }
    let parts = children
        .iter()
        .map(|child| render_filter(child, columns))
        .collect::<ExploreResult<Vec<_>>>()?;
    Ok(format!("({})", parts.join(joiner)))
}

fn render_condition(
    condition: &Condition,
    columns: &HashMap<String, ColumnMeta>,
) -> ExploreResult<String> {
    let column = columns.get(&condition.field_id).ok_or_else(|| {
        ExploreError::invalid_rule(format!("过滤条件引用了未知字段: {}", condition.field_id))
    })?;
    let data_type = DataType::from_sql_type(&column.data_type);

    if !op_allowed(condition.op, data_type) {
        return Err(ExploreError::WhereOpNotAllowed {
            op: condition.op.symbol().to_string(),
            data_type: data_type.to_string(),
        });
    }

    let ident = quote_ident(&column.name);
    let value = &condition.value;
    let sql = match condition.op {
        FilterOp::Eq | FilterOp::Ne | FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            format!("{ident} {} {}", condition.op.symbol(), literal(value, data_type)?)
        }
        FilterOp::Null => format!("{ident} IS NULL"),
        FilterOp::NotNull => format!("{ident} IS NOT NULL"),
        FilterOp::Include => format!("strpos({ident}, {}) > 0", literal(value, data_type)?),
        FilterOp::Prefix => format!("starts_with({ident}, {})", literal(value, data_type)?),
        FilterOp::InList => {
            let items = value
                .as_array()
                .filter(|items| !items.is_empty())
                .ok_or_else(|| ExploreError::invalid_rule("in list 操作符需要非空数组"))?;
            let rendered = items
                .iter()
                .map(|item| literal(item, data_type))
                .collect::<ExploreResult<Vec<_>>>()?;
            format!("{ident} IN ({})", rendered.join(", "))
        }
        FilterOp::Between => {
            let bounds = value
                .as_array()
                .filter(|bounds| bounds.len() == 2)
                .ok_or_else(|| ExploreError::invalid_rule("between 操作符需要两个边界值"))?;
            format!(
                "{ident} BETWEEN {} AND {}",
                literal(&bounds[0], data_type)?,
                literal(&bounds[1], data_type)?
            )
        }
        FilterOp::Before => {
            let days = value
                .as_u64()
                .ok_or_else(|| ExploreError::invalid_rule("before 操作符需要非负整数天数"))?;
            format!("{ident} < date_add('day', -{days}, {})", now_expr(data_type))
        }
        FilterOp::Current => {
            let unit = match value.as_str() {
                Some(unit @ ("day" | "month" | "year")) => unit,
                _ => {
                    return Err(ExploreError::invalid_rule(
                        "current 操作符的取值必须是 day、month 或 year",
                    ))
                }
            };
            format!(
                "date_trunc('{unit}', {ident}) = date_trunc('{unit}', {})",
                now_expr(data_type)
            )
        }
    };
    Ok(sql)
}

fn now_expr(data_type: DataType) -> &'static str {
    if data_type == DataType::Date {
        "current_date"
    } else {
        "current_timestamp"
    }
}

/// 按字段类型渲染字面量，非法值属于规则配置错误
fn literal(value: &Value, data_type: DataType) -> ExploreResult<String> {
    let invalid = || {
        ExploreError::invalid_rule(format!("取值 {value} 不是合法的 {data_type} 字面量"))
    };

    match data_type {
        DataType::String | DataType::Other => match value {
            Value::String(s) => Ok(quote_literal(s)),
            Value::Number(n) => Ok(quote_literal(&n.to_string())),
            _ => Err(invalid()),
        },
        DataType::Integer => match value {
            Value::Number(n) => n.as_i64().map(|n| n.to_string()).ok_or_else(invalid),
            Value::String(s) => s.trim().parse::<i64>().map(|n| n.to_string()).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        DataType::Decimal => match value {
            Value::Number(n) => n.as_f64().map(|n| n.to_string()).ok_or_else(invalid),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|n| n.to_string())
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
        DataType::Boolean => match value {
            Value::Bool(true) => Ok("TRUE".to_string()),
            Value::Bool(false) => Ok("FALSE".to_string()),
            _ => Err(invalid()),
        },
        DataType::Date => {
            let s = value.as_str().ok_or_else(invalid)?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
            Ok(format!("DATE {}", quote_literal(s)))
        }
        DataType::Timestamp => {
            let s = value.as_str().ok_or_else(invalid)?;
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map_err(|_| invalid())?;
            Ok(format!("TIMESTAMP {}", quote_literal(s)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> HashMap<String, ColumnMeta> {
        [
            ("f_name", "name", "varchar(64)"),
            ("f_age", "age", "bigint"),
            ("f_score", "score", "decimal(10,2)"),
            ("f_active", "active", "boolean"),
            ("f_birthday", "birthday", "date"),
            ("f_created", "created_at", "timestamp(3)"),
        ]
        .into_iter()
        .map(|(id, name, data_type)| {
            (
                id.to_string(),
                ColumnMeta {
                    field_id: id.to_string(),
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    comment: None,
                },
            )
        })
        .collect()
    }

    fn condition(field_id: &str, op: FilterOp, value: Value) -> FilterNode {
        FilterNode::Condition(Condition {
            field_id: field_id.to_string(),
            op,
            value,
        })
    }

    #[test]
    fn test_data_type_normalization() {
        assert_eq!(DataType::from_sql_type("VARCHAR(255)"), DataType::String);
        assert_eq!(DataType::from_sql_type("decimal(10, 2)"), DataType::Decimal);
        assert_eq!(DataType::from_sql_type("timestamp(3) with time zone"), DataType::Timestamp);
        assert_eq!(DataType::from_sql_type("array(varchar)"), DataType::Other);
    }

    #[test]
    fn test_render_nested_tree() {
        let tree = FilterNode::And {
            children: vec![
                condition("f_age", FilterOp::Between, json!([18, 60])),
                FilterNode::Or {
                    children: vec![
                        condition("f_name", FilterOp::Prefix, json!("O'Brien")),
                        condition("f_active", FilterOp::Eq, json!(true)),
                    ],
                },
            ],
        };

        let sql = render_filter(&tree, &columns()).unwrap();
        assert_eq!(
            sql,
            r#"("age" BETWEEN 18 AND 60 AND (starts_with("name", 'O''Brien') OR "active" = TRUE))"#
        );
    }

    #[test]
    fn test_temporal_operators() {
        let before = render_filter(&condition("f_birthday", FilterOp::Before, json!(30)), &columns())
            .unwrap();
        assert_eq!(before, r#""birthday" < date_add('day', -30, current_date)"#);

        let current = render_filter(&condition("f_created", FilterOp::Current, json!("month")), &columns())
            .unwrap();
        assert_eq!(
            current,
            r#"date_trunc('month', "created_at") = date_trunc('month', current_timestamp)"#
        );
    }

    #[test]
    fn test_disallowed_operator_type_pairs() {
        let cases = [
            ("f_age", FilterOp::Prefix, json!("1")),
            ("f_active", FilterOp::Between, json!([0, 1])),
            ("f_name", FilterOp::Before, json!(3)),
            ("f_score", FilterOp::Current, json!("day")),
            ("f_active", FilterOp::Gt, json!(true)),
        ];
        for (field, op, value) in cases {
            let err = render_filter(&condition(field, op, value), &columns()).unwrap_err();
            assert!(
                matches!(err, ExploreError::WhereOpNotAllowed { .. }),
                "{field} {op:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn test_invalid_literals_are_rule_errors() {
        let err = render_filter(&condition("f_age", FilterOp::Eq, json!("abc")), &columns())
            .unwrap_err();
        assert!(matches!(err, ExploreError::InvalidRuleConfig(_)));

        let err = render_filter(&condition("f_birthday", FilterOp::Ge, json!("2024-13-01")), &columns())
            .unwrap_err();
        assert!(matches!(err, ExploreError::InvalidRuleConfig(_)));

        let err = render_filter(&condition("f_unknown", FilterOp::Null, Value::Null), &columns())
            .unwrap_err();
        assert!(matches!(err, ExploreError::InvalidRuleConfig(_)));

        let err = render_filter(&FilterNode::Or { children: vec![] }, &columns()).unwrap_err();
        assert!(matches!(err, ExploreError::InvalidRuleConfig(_)));

        for literal in ["NaN", "inf", "-infinity"] {
            let err = render_filter(&condition("f_score", FilterOp::Eq, json!(literal)), &columns())
                .unwrap_err();
            assert!(matches!(err, ExploreError::InvalidRuleConfig(_)), "{literal}");
        }
        let sql = render_filter(&condition("f_score", FilterOp::Eq, json!(" 12.5 ")), &columns())
            .unwrap();
        assert_eq!(sql, r#""score" = 12.5"#);
    }

    #[test]
    fn test_filter_json_shape() {
        let node: FilterNode = serde_json::from_value(json!({
            "type": "and",
            "children": [
                {"type": "condition", "fieldId": "f_name", "op": "not_null"},
                {"type": "condition", "fieldId": "f_age", "op": "in_list", "value": [1, 2, 3]}
            ]
        }))
        .unwrap();
        let sql = render_filter(&node, &columns()).unwrap();
        assert_eq!(sql, r#"("name" IS NOT NULL AND "age" IN (1, 2, 3))"#);
    }
}
