//! 规则编译器
//!
//! 纯函数，无 I/O：把解析后的规则配置编译为针对虚拟表的查询文本。
//! - 空值 / 唯一 / 字典 / 格式 / 范围规则合并为一条查询
//! - 统计类规则合并为一条查询
//! - 时间分布规则按字段合并，每个字段一条 `UNION ALL` 查询
//! - 行级、视图级规则各自独立成一条查询
//!
//! 合并查询中每条规则的结果列以 [`result_alias`] 为前缀，共享同一条查询的报告项
//! 携带完全相同的 SQL 文本，执行器据此分组派发。

use explorer_core::models::{
    ColumnMeta, Dimension, ExploreMode, ItemStatus, ReportItem, RuleLevel, TableRef, TaskConfig,
    TimeRange,
};
use explorer_core::{ExploreError, ExploreResult};
use std::collections::{HashMap, HashSet};

use crate::filter::{render_filter, DataType};
use crate::rules::{
    BuiltinNull, FieldRule, MetadataRule, NullValue, QueryFamily, RuleKind, RuleSpec, RuleTag,
};
use crate::sql::{quote_ident, quote_literal, render_template, result_alias, AliasScope};

/// 未配置采样行数时使用的默认值
pub const DEFAULT_SAMPLE_SIZE: i64 = 100_000;

/// 合并查询中的总行数列
pub const TOTAL_COLUMN: &str = "__total";

const VIRTUAL_TABLE: &str = "(SELECT * FROM ${source}${where}${limit}) AS t";
const MERGED_QUERY: &str = "SELECT COUNT(1) AS \"__total\", ${expressions} FROM ${table}";
const PREDICATE_QUERY: &str = "SELECT COUNT(1) AS \"__total\", SUM(CASE WHEN ${predicate} THEN 1 ELSE 0 END) AS \"${alias}__matches\" FROM ${table}";
const GROUP_BY_TIME_QUERY: &str = "SELECT '${alias}' AS \"rule_key\", CAST(date_trunc('${granularity}', ${column_name}) AS VARCHAR) AS \"bucket\", COUNT(1) AS \"cnt\" FROM ${table} GROUP BY date_trunc('${granularity}', ${column_name})";

const NULL_COUNT_EXPR: &str = "SUM(CASE WHEN ${predicate} THEN 1 ELSE 0 END) AS \"${alias}__issues\"";
const UNIQUE_EXPR: &str = "COUNT(${column_name}) - COUNT(DISTINCT ${column_name}) AS \"${alias}__issues\"";
const DICTIONARY_EXPR: &str = "SUM(CASE WHEN CAST(${column_name} AS VARCHAR) IN (${values}) THEN 1 ELSE 0 END) AS \"${alias}__matches\"";
const FORMAT_EXPR: &str = "SUM(CASE WHEN regexp_like(CAST(${column_name} AS VARCHAR), ${pattern}) THEN 1 ELSE 0 END) AS \"${alias}__matches\"";
const RANGE_EXPR: &str = "SUM(CASE WHEN ${predicate} THEN 1 ELSE 0 END) AS \"${alias}__matches\"";
const MAX_EXPR: &str = "MAX(${column_name}) AS \"${alias}\"";
const MIN_EXPR: &str = "MIN(${column_name}) AS \"${alias}\"";
const AVG_EXPR: &str = "AVG(CAST(${column_name} AS DOUBLE)) AS \"${alias}\"";
const STDDEV_EXPR: &str = "STDDEV(CAST(${column_name} AS DOUBLE)) AS \"${alias}\"";
const DISTINCT_COUNT_EXPR: &str = "COUNT(DISTINCT ${column_name}) AS \"${alias}\"";
const QUANTILE_EXPR: &str = "approx_percentile(CAST(${column_name} AS DOUBLE), ARRAY[${percentiles}]) AS \"${alias}\"";
const TRUE_FALSE_EXPR: &str = "SUM(CASE WHEN ${column_name} = TRUE THEN 1 ELSE 0 END) AS \"${alias}__true\", SUM(CASE WHEN ${column_name} = FALSE THEN 1 ELSE 0 END) AS \"${alias}__false\"";

/// 被探查表及其采样方式
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub table: TableRef,
    pub mode: ExploreMode,
    pub sample_size: i64,
    pub time_range: Option<TimeRange>,
}

impl TableInfo {
    pub fn from_task(task: &TaskConfig, default_sample_size: i64) -> Self {
        Self {
            table: task.table.clone(),
            mode: task.explore_mode,
            sample_size: task.sample_size.unwrap_or(default_sample_size),
            time_range: task.time_range.clone(),
        }
    }

    /// 虚拟表表达式：`(SELECT * FROM c.d.t [WHERE ...] [LIMIT n]) AS t`
    pub fn virtual_table(&self) -> ExploreResult<String> {
        let source = format!(
            "{}.{}.{}",
            quote_ident(&self.table.catalog),
            quote_ident(&self.table.database),
            quote_ident(&self.table.table)
        );

        let (where_clause, limit_clause) = match self.mode {
            ExploreMode::Sample => {
                if self.sample_size <= 0 {
                    return Err(ExploreError::invalid_rule(format!(
                        "采样行数必须大于0: {}",
                        self.sample_size
                    )));
                }
                (String::new(), format!(" LIMIT {}", self.sample_size))
            }
            ExploreMode::Full => (String::new(), String::new()),
            ExploreMode::Timestamp => {
                let range = self
                    .time_range
                    .as_ref()
                    .ok_or_else(|| ExploreError::invalid_rule("时间窗口探查缺少时间范围"))?;
                if range.start >= range.end {
                    return Err(ExploreError::invalid_rule("时间窗口的开始时间必须早于结束时间"));
                }
                let column = quote_ident(&range.column);
                let format = "%Y-%m-%d %H:%M:%S";
                (
                    format!(
                        " WHERE {column} >= TIMESTAMP {} AND {column} < TIMESTAMP {}",
                        quote_literal(&range.start.format(format).to_string()),
                        quote_literal(&range.end.format(format).to_string())
                    ),
                    String::new(),
                )
            }
        };

        render_template(
            VIRTUAL_TABLE,
            &[
                ("source", source.as_str()),
                ("where", where_clause.as_str()),
                ("limit", limit_clause.as_str()),
            ],
        )
    }
}

/// 一条编译后的规则
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledItem {
    pub field_id: Option<String>,
    pub column: Option<String>,
    pub rule_id: String,
    pub rule_name: String,
    pub tag: RuleTag,
    pub level: RuleLevel,
    pub dimension: Option<Dimension>,
    pub result_key: String,
    pub sql: String,
}

/// 一个任务版本的编译结果
#[derive(Debug, Clone, Default)]
pub struct CompiledTask {
    pub items: Vec<CompiledItem>,
    /// 无需查询、在评分阶段直接计算的元数据规则
    pub metadata_rules: Vec<MetadataRule>,
}

impl CompiledTask {
    /// 去重后的查询条数，即远程调用次数
    pub fn query_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| item.sql.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn into_report_items(self, code: &str) -> Vec<ReportItem> {
        self.items
            .into_iter()
            .map(|item| ReportItem {
                id: 0,
                code: code.to_string(),
                field_id: item.field_id,
                column: item.column,
                rule_id: item.rule_id,
                rule_name: item.rule_name,
                rule_kind: item.tag.as_str().to_string(),
                level: item.level,
                dimension: item.dimension,
                result_key: item.result_key,
                sql: item.sql,
                status: ItemStatus::Undone,
                result: None,
                reason: None,
                started_at: None,
                finished_at: None,
            })
            .collect()
    }
}

struct PendingItem {
    item: CompiledItem,
    expression: String,
}

pub struct RuleCompiler;

impl RuleCompiler {
    /// 将单条字段规则编译为独立查询
    pub fn compile(
        rule: &FieldRule,
        column: &ColumnMeta,
        table: &TableInfo,
    ) -> ExploreResult<String> {
        let virtual_table = table.virtual_table()?;
        let alias = result_alias(AliasScope::Field(&column.field_id), &rule.rule_id);
        let expression = field_expression(&rule.kind, column, &alias)?;

        match rule.kind.profile().family {
            QueryFamily::MergedBase | QueryFamily::MergedStatistical => render_template(
                MERGED_QUERY,
                &[("expressions", expression.as_str()), ("table", virtual_table.as_str())],
            ),
            QueryFamily::GroupByTime => render_template(&expression, &[("table", virtual_table.as_str())]),
            QueryFamily::Independent => Err(ExploreError::Internal(format!(
                "字段规则不应属于独立查询族: {}",
                rule.rule_id
            ))),
        }
    }

    /// 编译一个任务版本的全部规则
    ///
    /// 任何一条规则非法都会使整个编译失败，不产生部分结果。
    pub fn compile_task(
        spec: &RuleSpec,
        columns: &HashMap<String, ColumnMeta>,
        table: &TableInfo,
    ) -> ExploreResult<CompiledTask> {
        let virtual_table = table.virtual_table()?;
        let mut seen_keys = HashSet::new();
        let mut base = Vec::new();
        let mut statistical = Vec::new();
        let mut time_groups: Vec<Vec<PendingItem>> = Vec::new();

        for group in &spec.field_rules {
            let column = columns.get(&group.field_id).ok_or_else(|| {
                ExploreError::invalid_rule(format!("规则引用了未知字段: {}", group.field_id))
            })?;
            let mut field_time_rules = Vec::new();

            for rule in &group.rules {
                let result_key = result_alias(AliasScope::Field(&group.field_id), &rule.rule_id);
                if !seen_keys.insert(result_key.clone()) {
                    return Err(ExploreError::invalid_rule(format!(
                        "字段 {} 上的规则ID重复: {}",
                        group.field_id, rule.rule_id
                    )));
                }

                let profile = rule.kind.profile();
                let pending = PendingItem {
                    expression: field_expression(&rule.kind, column, &result_key)?,
                    item: CompiledItem {
                        field_id: Some(group.field_id.clone()),
                        column: Some(column.name.clone()),
                        rule_id: rule.rule_id.clone(),
                        rule_name: rule.name.clone(),
                        tag: rule.kind.tag(),
                        level: RuleLevel::Field,
                        dimension: profile.dimension,
                        result_key,
                        sql: String::new(),
                    },
                };

                match profile.family {
                    QueryFamily::MergedBase => base.push(pending),
                    QueryFamily::MergedStatistical => statistical.push(pending),
                    QueryFamily::GroupByTime => field_time_rules.push(pending),
                    QueryFamily::Independent => {
                        return Err(ExploreError::Internal(format!(
                            "字段规则不应属于独立查询族: {}",
                            rule.rule_id
                        )))
                    }
                }
            }

            if !field_time_rules.is_empty() {
                time_groups.push(field_time_rules);
            }
        }

        let mut items = Vec::new();
        items.extend(merge(base, &virtual_table)?);
        items.extend(merge(statistical, &virtual_table)?);
        for group in time_groups {
            items.extend(union_time_groups(group, &virtual_table)?);
        }

        for rule in &spec.row_rules {
            let result_key = result_alias(AliasScope::Row, &rule.rule_id);
            if !seen_keys.insert(result_key.clone()) {
                return Err(ExploreError::invalid_rule(format!("行级规则ID重复: {}", rule.rule_id)));
            }
            let predicate = render_filter(&rule.filter, columns)?;
            let sql = predicate_query(&predicate, &result_key, &virtual_table)?;
            items.push(CompiledItem {
                field_id: None,
                column: None,
                rule_id: rule.rule_id.clone(),
                rule_name: rule.name.clone(),
                tag: RuleTag::RowRule,
                level: RuleLevel::Row,
                dimension: rule.dimension.or(RuleTag::RowRule.profile().dimension),
                result_key,
                sql,
            });
        }

        for rule in &spec.view_rules {
            let result_key = result_alias(AliasScope::View, &rule.rule_id);
            if !seen_keys.insert(result_key.clone()) {
                return Err(ExploreError::invalid_rule(format!("视图规则ID重复: {}", rule.rule_id)));
            }
            let predicate = format!("({})", rule.expression.trim());
            let sql = predicate_query(&predicate, &result_key, &virtual_table)?;
            items.push(CompiledItem {
                field_id: None,
                column: None,
                rule_id: rule.rule_id.clone(),
                rule_name: rule.name.clone(),
                tag: RuleTag::ViewRule,
                level: RuleLevel::View,
                dimension: rule.dimension.or(RuleTag::ViewRule.profile().dimension),
                result_key,
                sql,
            });
        }

        Ok(CompiledTask {
            items,
            metadata_rules: spec.metadata_rules.clone(),
        })
    }
}

fn merge(pending: Vec<PendingItem>, virtual_table: &str) -> ExploreResult<Vec<CompiledItem>> {
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    let expressions = pending
        .iter()
        .map(|p| p.expression.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = render_template(
        MERGED_QUERY,
        &[("expressions", expressions.as_str()), ("table", virtual_table)],
    )?;
    Ok(with_sql(pending, sql))
}

fn union_time_groups(
    pending: Vec<PendingItem>,
    virtual_table: &str,
) -> ExploreResult<Vec<CompiledItem>> {
    let selects = pending
        .iter()
        .map(|p| render_template(&p.expression, &[("table", virtual_table)]))
        .collect::<ExploreResult<Vec<_>>>()?;
    let sql = selects.join(" UNION ALL ");
    Ok(with_sql(pending, sql))
}

fn with_sql(pending: Vec<PendingItem>, sql: String) -> Vec<CompiledItem> {
    pending
        .into_iter()
        .map(|p| CompiledItem {
            sql: sql.clone(),
            ..p.item
        })
        .collect()
}

fn predicate_query(predicate: &str, alias: &str, virtual_table: &str) -> ExploreResult<String> {
    render_template(
        PREDICATE_QUERY,
        &[
            ("predicate", predicate),
            ("alias", alias),
            ("table", virtual_table),
        ],
    )
}

/// 字段规则在合并查询中的选择表达式
///
/// 时间分布规则返回的是一条完整子查询，`${table}` 留待合并时替换。
fn field_expression(kind: &RuleKind, column: &ColumnMeta, alias: &str) -> ExploreResult<String> {
    let ident = quote_ident(&column.name);
    let data_type = DataType::from_sql_type(&column.data_type);
    let require = |ok: bool, expected: &str| -> ExploreResult<()> {
        if ok {
            Ok(())
        } else {
            Err(ExploreError::invalid_rule(format!(
                "{} 规则要求{expected}字段，但 {} 的类型是 {}",
                kind.tag().as_str(),
                column.name,
                column.data_type
            )))
        }
    };
    let simple = |template: &str| {
        render_template(template, &[("column_name", ident.as_str()), ("alias", alias)])
    };

    match kind {
        RuleKind::NullCount(config) => {
            let predicate = config
                .effective_values()
                .iter()
                .map(|value| null_predicate(value, &ident))
                .collect::<Vec<_>>()
                .join(" OR ");
            render_template(
                NULL_COUNT_EXPR,
                &[("predicate", format!("({predicate})").as_str()), ("alias", alias)],
            )
        }
        RuleKind::Unique => simple(UNIQUE_EXPR),
        RuleKind::Dictionary(config) => {
            let values = config
                .values
                .iter()
                .map(|value| quote_literal(value))
                .collect::<Vec<_>>()
                .join(", ");
            render_template(
                DICTIONARY_EXPR,
                &[("column_name", ident.as_str()), ("values", values.as_str()), ("alias", alias)],
            )
        }
        RuleKind::Format(config) => {
            let pattern = quote_literal(&config.pattern()?);
            render_template(
                FORMAT_EXPR,
                &[("column_name", ident.as_str()), ("pattern", pattern.as_str()), ("alias", alias)],
            )
        }
        RuleKind::Range(config) => {
            require(data_type.is_numeric(), "数值")?;
            let mut bounds = Vec::new();
            if let Some(min) = config.min {
                bounds.push(format!("{ident} >= {min}"));
            }
            if let Some(max) = config.max {
                bounds.push(format!("{ident} <= {max}"));
            }
            render_template(
                RANGE_EXPR,
                &[("predicate", bounds.join(" AND ").as_str()), ("alias", alias)],
            )
        }
        RuleKind::Max => simple(MAX_EXPR),
        RuleKind::Min => simple(MIN_EXPR),
        RuleKind::Avg => {
            require(data_type.is_numeric(), "数值")?;
            simple(AVG_EXPR)
        }
        RuleKind::Stddev => {
            require(data_type.is_numeric(), "数值")?;
            simple(STDDEV_EXPR)
        }
        RuleKind::DistinctCount => simple(DISTINCT_COUNT_EXPR),
        RuleKind::Quantile(config) => {
            require(data_type.is_numeric(), "数值")?;
            let percentiles = config
                .percentiles
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            render_template(
                QUANTILE_EXPR,
                &[
                    ("column_name", ident.as_str()),
                    ("percentiles", percentiles.as_str()),
                    ("alias", alias),
                ],
            )
        }
        RuleKind::TrueFalseCount => {
            require(data_type == DataType::Boolean, "布尔")?;
            simple(TRUE_FALSE_EXPR)
        }
        RuleKind::GroupByTime(config) => {
            require(data_type.is_temporal(), "日期或时间")?;
            render_template(
                GROUP_BY_TIME_QUERY,
                &[
                    ("alias", alias),
                    ("granularity", config.granularity.as_str()),
                    ("column_name", ident.as_str()),
                    ("table", "${table}"),
                ],
            )
        }
    }
}

fn null_predicate(value: &NullValue, ident: &str) -> String {
    match value {
        NullValue::Builtin(BuiltinNull::Null) => format!("{ident} IS NULL"),
        NullValue::Builtin(BuiltinNull::EmptyString) => format!("CAST({ident} AS VARCHAR) = ''"),
        NullValue::Builtin(BuiltinNull::Whitespace) => {
            format!("{ident} IS NOT NULL AND trim(CAST({ident} AS VARCHAR)) = ''")
        }
        NullValue::Custom { custom } => {
            format!("CAST({ident} AS VARCHAR) = {}", quote_literal(custom))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn table(mode: ExploreMode) -> TableInfo {
        TableInfo {
            table: TableRef {
                table_id: "tbl-1".to_string(),
                catalog: "hive".to_string(),
                database: "crm".to_string(),
                table: "users".to_string(),
            },
            mode,
            sample_size: DEFAULT_SAMPLE_SIZE,
            time_range: None,
        }
    }

    fn columns() -> HashMap<String, ColumnMeta> {
        [
            ("f_age", "age", "integer"),
            ("f_status", "status", "varchar"),
            ("f_email", "email", "varchar"),
            ("f_created", "created_at", "timestamp"),
            ("f_vip", "vip", "boolean"),
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

    const MERGE_EXAMPLE: &str = r#"{
        "fieldRules": [
            {"fieldId": "f_age", "rules": [{"ruleId": "r_null", "kind": "null_count"}]},
            {"fieldId": "f_status", "rules": [{"ruleId": "r_dict", "kind": "dictionary", "config": {"values": ["active", "closed"]}}]},
            {"fieldId": "f_email", "rules": [{"ruleId": "r_fmt", "kind": "format", "config": {"preset": "email"}}]}
        ]
    }"#;

    #[test]
    fn test_virtual_table_modes() {
        assert_eq!(
            table(ExploreMode::Sample).virtual_table().unwrap(),
            r#"(SELECT * FROM "hive"."crm"."users" LIMIT 100000) AS t"#
        );
        assert_eq!(
            table(ExploreMode::Full).virtual_table().unwrap(),
            r#"(SELECT * FROM "hive"."crm"."users") AS t"#
        );

        let mut timed = table(ExploreMode::Timestamp);
        assert!(timed.virtual_table().is_err());
        timed.time_range = Some(TimeRange {
            column: "created_at".to_string(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        });
        assert_eq!(
            timed.virtual_table().unwrap(),
            r#"(SELECT * FROM "hive"."crm"."users" WHERE "created_at" >= TIMESTAMP '2024-01-01 00:00:00' AND "created_at" < TIMESTAMP '2024-02-01 00:00:00') AS t"#
        );
    }

    #[test]
    fn test_merge_three_field_rules_into_one_query() {
        let spec = RuleSpec::parse(MERGE_EXAMPLE).unwrap();
        let compiled =
            RuleCompiler::compile_task(&spec, &columns(), &table(ExploreMode::Sample)).unwrap();

        assert_eq!(compiled.items.len(), 3);
        assert_eq!(compiled.query_count(), 1);

        let sql = &compiled.items[0].sql;
        assert!(compiled.items.iter().all(|item| &item.sql == sql));
        assert!(sql.starts_with("SELECT COUNT(1) AS \"__total\", "));
        assert!(sql.contains(r#"SUM(CASE WHEN ("age" IS NULL) THEN 1 ELSE 0 END) AS "r_f_f_5fage__r_5fnull__issues""#));
        assert!(sql.contains(r#"CAST("status" AS VARCHAR) IN ('active', 'closed')"#));
        assert!(sql.contains(r#"regexp_like(CAST("email" AS VARCHAR), '^[A-Za-z0-9._%+-]+@"#));
        assert!(sql.ends_with(r#"FROM (SELECT * FROM "hive"."crm"."users" LIMIT 100000) AS t"#));

        let dimensions: Vec<_> = compiled.items.iter().map(|item| item.dimension).collect();
        assert_eq!(
            dimensions,
            vec![
                Some(Dimension::Completeness),
                Some(Dimension::Consistency),
                Some(Dimension::Standardization)
            ]
        );
    }

    #[test]
    fn test_families_compile_to_separate_queries() {
        let json = r#"{
            "fieldRules": [
                {"fieldId": "f_age", "rules": [
                    {"ruleId": "n", "kind": "null_count"},
                    {"ruleId": "mx", "kind": "max"},
                    {"ruleId": "q", "kind": "quantile", "config": {"percentiles": [0.5, 0.99]}}
                ]},
                {"fieldId": "f_created", "rules": [
                    {"ruleId": "d", "kind": "group_by_time", "config": {"granularity": "day"}},
                    {"ruleId": "m", "kind": "group_by_time", "config": {"granularity": "month"}}
                ]}
            ],
            "rowRules": [
                {"ruleId": "adult", "name": "成年", "filter": {"type": "condition", "fieldId": "f_age", "op": "ge", "value": 18}}
            ],
            "viewRules": [
                {"ruleId": "vip_age", "name": "VIP年龄", "expression": "NOT vip OR age > 30"}
            ],
            "metadataRules": [
                {"ruleId": "cmt", "name": "注释覆盖率", "kind": "column_comment_coverage"}
            ]
        }"#;
        let spec = RuleSpec::parse(json).unwrap();
        let compiled =
            RuleCompiler::compile_task(&spec, &columns(), &table(ExploreMode::Full)).unwrap();

        assert_eq!(compiled.items.len(), 7);
        // base, statistical, group-by-time(f_created), row, view
        assert_eq!(compiled.query_count(), 5);
        assert_eq!(compiled.metadata_rules.len(), 1);

        let stats = &compiled.items[1].sql;
        assert_eq!(stats, &compiled.items[2].sql);
        assert!(stats.contains(r#"approx_percentile(CAST("age" AS DOUBLE), ARRAY[0.5, 0.99]) AS "r_f_f_5fage__q""#));

        let by_time = &compiled.items[3].sql;
        assert_eq!(by_time, &compiled.items[4].sql);
        assert_eq!(by_time.matches(" UNION ALL ").count(), 1);
        assert!(by_time.contains("date_trunc('month', \"created_at\")"));
        assert!(!by_time.contains("${"));

        let row = &compiled.items[5];
        assert_eq!(row.level, RuleLevel::Row);
        assert_eq!(row.dimension, Some(Dimension::Accuracy));
        assert!(row.sql.contains(r#"SUM(CASE WHEN "age" >= 18 THEN 1 ELSE 0 END) AS "r_row__adult__matches""#));

        let view = &compiled.items[6];
        assert_eq!(view.dimension, Some(Dimension::Consistency));
        assert!(view.sql.contains("CASE WHEN (NOT vip OR age > 30)"));
    }

    #[test]
    fn test_compile_single_rule() {
        let spec = RuleSpec::parse(
            r#"{"fieldRules": [{"fieldId": "f_age", "rules": [{"ruleId": "rng", "kind": "range", "config": {"min": 0, "max": 150}}]}]}"#,
        )
        .unwrap();
        let rule = &spec.field_rules[0].rules[0];
        let sql = RuleCompiler::compile(rule, &columns()["f_age"], &table(ExploreMode::Sample)).unwrap();
        assert_eq!(
            sql,
            r#"SELECT COUNT(1) AS "__total", SUM(CASE WHEN "age" >= 0 AND "age" <= 150 THEN 1 ELSE 0 END) AS "r_f_f_5fage__rng__matches" FROM (SELECT * FROM "hive"."crm"."users" LIMIT 100000) AS t"#
        );
    }

    #[test]
    fn test_compile_failures_are_configuration_errors() {
        let cases = [
            r#"{"fieldRules": [{"fieldId": "f_missing", "rules": [{"ruleId": "n", "kind": "null_count"}]}]}"#,
            r#"{"fieldRules": [{"fieldId": "f_email", "rules": [{"ruleId": "a", "kind": "avg"}]}]}"#,
            r#"{"fieldRules": [{"fieldId": "f_age", "rules": [{"ruleId": "g", "kind": "group_by_time", "config": {"granularity": "year"}}]}]}"#,
            r#"{"fieldRules": [{"fieldId": "f_age", "rules": [{"ruleId": "dup", "kind": "max"}, {"ruleId": "dup", "kind": "min"}]}]}"#,
        ];
        for json in cases {
            let spec = RuleSpec::parse(json).unwrap();
            let err = RuleCompiler::compile_task(&spec, &columns(), &table(ExploreMode::Sample))
                .unwrap_err();
            assert!(err.is_configuration(), "{json} -> {err:?}");
        }

        let spec = RuleSpec::parse(
            r#"{"rowRules": [{"ruleId": "r", "name": "r", "filter": {"type": "condition", "fieldId": "f_vip", "op": "prefix", "value": "t"}}]}"#,
        )
        .unwrap();
        let err = RuleCompiler::compile_task(&spec, &columns(), &table(ExploreMode::Sample))
            .unwrap_err();
        assert!(matches!(err, ExploreError::WhereOpNotAllowed { .. }));
    }

    #[test]
    fn test_similar_rule_ids_do_not_clash() {
        let spec = RuleSpec::parse(
            r#"{"fieldRules": [{"fieldId": "f_age", "rules": [
                {"ruleId": "r.1", "kind": "null_count"},
                {"ruleId": "r-1", "kind": "unique"},
                {"ruleId": "R_1", "kind": "max"}
            ]}]}"#,
        )
        .unwrap();
        let compiled =
            RuleCompiler::compile_task(&spec, &columns(), &table(ExploreMode::Sample)).unwrap();

        assert_eq!(compiled.items.len(), 3);
        let keys: HashSet<&str> = compiled.items.iter().map(|item| item.result_key.as_str()).collect();
        assert_eq!(keys.len(), 3);
        for item in &compiled.items {
            assert!(item.sql.contains(&format!("AS \"{}", item.result_key)));
        }
    }

    #[test]
    fn test_report_items_share_sql_and_code() {
        let spec = RuleSpec::parse(MERGE_EXAMPLE).unwrap();
        let compiled =
            RuleCompiler::compile_task(&spec, &columns(), &table(ExploreMode::Sample)).unwrap();
        let items = compiled.into_report_items("abc123");
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.code == "abc123"));
        assert!(items.iter().all(|item| item.status == ItemStatus::Undone));
        assert_eq!(items[0].rule_kind, "null_count");
        assert_eq!(items[0].column.as_deref(), Some("age"));
        assert_eq!(items[2].result_key, "r_f_f_5femail__r_5ffmt");
    }
}
