//! 规则配置模型
//!
//! 规则 JSON 在拆分时解析为带类型载荷的 [`RuleKind`]，之后的编译、结果解析与
//! 评分都基于 [`RuleTag`] 分派，不再比较规则名字符串。

use explorer_core::models::Dimension;
use explorer_core::{ExploreError, ExploreResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterNode;

/// 任务的完整规则配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    #[serde(default)]
    pub field_rules: Vec<FieldRuleGroup>,
    #[serde(default)]
    pub row_rules: Vec<RowRule>,
    #[serde(default)]
    pub view_rules: Vec<ViewRule>,
    #[serde(default)]
    pub metadata_rules: Vec<MetadataRule>,
}

impl RuleSpec {
    /// 解析并校验规则 JSON，任何一条规则非法都会使整个任务失败
    pub fn parse(json: &str) -> ExploreResult<Self> {
        let raw: RawRuleSpec = serde_json::from_str(json)
            .map_err(|e| ExploreError::invalid_rule(format!("规则JSON解析失败: {e}")))?;

        let mut field_rules = Vec::with_capacity(raw.field_rules.len());
        for group in raw.field_rules {
            if group.field_id.trim().is_empty() {
                return Err(ExploreError::invalid_rule("字段规则缺少fieldId"));
            }
            let mut rules = Vec::with_capacity(group.rules.len());
            for rule in group.rules {
                rules.push(FieldRule::from_raw(rule)?);
            }
            field_rules.push(FieldRuleGroup {
                field_id: group.field_id,
                rules,
            });
        }

        let spec = RuleSpec {
            field_rules,
            row_rules: raw.row_rules,
            view_rules: raw.view_rules,
            metadata_rules: raw.metadata_rules,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> ExploreResult<()> {
        for rule in &self.row_rules {
            require_rule_id(&rule.rule_id)?;
        }
        for rule in &self.view_rules {
            require_rule_id(&rule.rule_id)?;
            let expression = rule.expression.trim();
            if expression.is_empty() {
                return Err(ExploreError::invalid_rule(format!(
                    "视图规则 {} 的表达式为空",
                    rule.rule_id
                )));
            }
            if expression.contains(';') {
                return Err(ExploreError::invalid_rule(format!(
                    "视图规则 {} 的表达式不能包含分号",
                    rule.rule_id
                )));
            }
        }
        for rule in &self.metadata_rules {
            require_rule_id(&rule.rule_id)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.field_rules.iter().all(|group| group.rules.is_empty())
            && self.row_rules.is_empty()
            && self.view_rules.is_empty()
            && self.metadata_rules.is_empty()
    }
}

fn require_rule_id(rule_id: &str) -> ExploreResult<()> {
    if rule_id.trim().is_empty() {
        return Err(ExploreError::invalid_rule("规则缺少ruleId"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRuleSpec {
    #[serde(default)]
    field_rules: Vec<RawFieldRuleGroup>,
    #[serde(default)]
    row_rules: Vec<RowRule>,
    #[serde(default)]
    view_rules: Vec<ViewRule>,
    #[serde(default)]
    metadata_rules: Vec<MetadataRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldRuleGroup {
    field_id: String,
    #[serde(default)]
    rules: Vec<RawFieldRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldRule {
    rule_id: String,
    #[serde(default)]
    name: Option<String>,
    kind: RuleTag,
    #[serde(default)]
    config: Value,
}

/// 同一字段上的规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRuleGroup {
    pub field_id: String,
    pub rules: Vec<FieldRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub rule_id: String,
    pub name: String,
    pub kind: RuleKind,
}

impl FieldRule {
    fn from_raw(raw: RawFieldRule) -> ExploreResult<Self> {
        require_rule_id(&raw.rule_id)?;
        let kind = RuleKind::from_tag(raw.kind, raw.config).map_err(|e| match e {
            ExploreError::InvalidRuleConfig(msg) => {
                ExploreError::invalid_rule(format!("规则 {}: {msg}", raw.rule_id))
            }
            other => other,
        })?;
        let name = raw
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| kind.tag().as_str().to_string());
        Ok(Self {
            rule_id: raw.rule_id,
            name,
            kind,
        })
    }
}

/// 规则类型标签，持久化在报告项的 `rule_kind` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTag {
    NullCount,
    Unique,
    Dictionary,
    Format,
    Range,
    Max,
    Min,
    Avg,
    Stddev,
    DistinctCount,
    Quantile,
    TrueFalseCount,
    GroupByTime,
    RowRule,
    ViewRule,
}

/// 规则的查询族：决定与哪些规则合并为同一条查询
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryFamily {
    /// 空值 / 唯一 / 字典 / 格式 / 范围，整个报告合并为一条查询
    MergedBase,
    /// 统计类规则，整个报告合并为一条查询
    MergedStatistical,
    /// 按时间分布，每个字段一条查询
    GroupByTime,
    /// 行级、视图级规则，每条规则一条查询
    Independent,
}

/// 问题数的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuePolicy {
    /// 查询直接返回问题行数
    RawCount,
    /// 查询返回命中行数，问题数 = 检查行数 - 命中行数
    InspectedMinusMatches,
    /// 不参与评分
    NotScored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleProfile {
    pub family: QueryFamily,
    pub dimension: Option<Dimension>,
    pub issue_policy: IssuePolicy,
}

const fn profile(
    family: QueryFamily,
    dimension: Option<Dimension>,
    issue_policy: IssuePolicy,
) -> RuleProfile {
    RuleProfile {
        family,
        dimension,
        issue_policy,
    }
}

impl RuleTag {
    const ALL: [RuleTag; 15] = [
        RuleTag::NullCount,
        RuleTag::Unique,
        RuleTag::Dictionary,
        RuleTag::Format,
        RuleTag::Range,
        RuleTag::Max,
        RuleTag::Min,
        RuleTag::Avg,
        RuleTag::Stddev,
        RuleTag::DistinctCount,
        RuleTag::Quantile,
        RuleTag::TrueFalseCount,
        RuleTag::GroupByTime,
        RuleTag::RowRule,
        RuleTag::ViewRule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTag::NullCount => "null_count",
            RuleTag::Unique => "unique",
            RuleTag::Dictionary => "dictionary",
            RuleTag::Format => "format",
            RuleTag::Range => "range",
            RuleTag::Max => "max",
            RuleTag::Min => "min",
            RuleTag::Avg => "avg",
            RuleTag::Stddev => "stddev",
            RuleTag::DistinctCount => "distinct_count",
            RuleTag::Quantile => "quantile",
            RuleTag::TrueFalseCount => "true_false_count",
            RuleTag::GroupByTime => "group_by_time",
            RuleTag::RowRule => "row_rule",
            RuleTag::ViewRule => "view_rule",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        RuleTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == value)
            .ok_or_else(|| ExploreError::Internal(format!("未知的规则类型: {value}")))
    }

    /// 规则类型到查询族、质量维度与问题数口径的映射表
    pub fn profile(&self) -> RuleProfile {
        use Dimension::*;
        use IssuePolicy::*;
        use QueryFamily::*;

        match self {
            RuleTag::NullCount => profile(MergedBase, Some(Completeness), RawCount),
            RuleTag::Unique => profile(MergedBase, Some(Uniqueness), RawCount),
            RuleTag::Dictionary => profile(MergedBase, Some(Consistency), InspectedMinusMatches),
            RuleTag::Format => profile(MergedBase, Some(Standardization), InspectedMinusMatches),
            RuleTag::Range => profile(MergedBase, Some(Accuracy), InspectedMinusMatches),
            RuleTag::Max
            | RuleTag::Min
            | RuleTag::Avg
            | RuleTag::Stddev
            | RuleTag::DistinctCount
            | RuleTag::Quantile
            | RuleTag::TrueFalseCount => profile(MergedStatistical, None, NotScored),
            RuleTag::GroupByTime => profile(GroupByTime, None, NotScored),
            RuleTag::RowRule => profile(Independent, Some(Accuracy), InspectedMinusMatches),
            RuleTag::ViewRule => profile(Independent, Some(Consistency), InspectedMinusMatches),
        }
    }
}

/// 带类型载荷的字段规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum RuleKind {
    NullCount(NullCountConfig),
    Unique,
    Dictionary(DictionaryConfig),
    Format(FormatConfig),
    Range(RangeConfig),
    Max,
    Min,
    Avg,
    Stddev,
    DistinctCount,
    Quantile(QuantileConfig),
    TrueFalseCount,
    GroupByTime(GroupByTimeConfig),
}

impl RuleKind {
    pub fn tag(&self) -> RuleTag {
        match self {
            RuleKind::NullCount(_) => RuleTag::NullCount,
            RuleKind::Unique => RuleTag::Unique,
            RuleKind::Dictionary(_) => RuleTag::Dictionary,
            RuleKind::Format(_) => RuleTag::Format,
            RuleKind::Range(_) => RuleTag::Range,
            RuleKind::Max => RuleTag::Max,
            RuleKind::Min => RuleTag::Min,
            RuleKind::Avg => RuleTag::Avg,
            RuleKind::Stddev => RuleTag::Stddev,
            RuleKind::DistinctCount => RuleTag::DistinctCount,
            RuleKind::Quantile(_) => RuleTag::Quantile,
            RuleKind::TrueFalseCount => RuleTag::TrueFalseCount,
            RuleKind::GroupByTime(_) => RuleTag::GroupByTime,
        }
    }

    pub fn profile(&self) -> RuleProfile {
        self.tag().profile()
    }

    fn from_tag(tag: RuleTag, config: Value) -> ExploreResult<Self> {
        let config = if config.is_null() {
            Value::Object(Default::default())
        } else {
            config
        };

        let kind = match tag {
            RuleTag::NullCount => RuleKind::NullCount(payload(config)?),
            RuleTag::Unique => RuleKind::Unique,
            RuleTag::Dictionary => RuleKind::Dictionary(payload(config)?),
            RuleTag::Format => RuleKind::Format(payload(config)?),
            RuleTag::Range => RuleKind::Range(payload(config)?),
            RuleTag::Max => RuleKind::Max,
            RuleTag::Min => RuleKind::Min,
            RuleTag::Avg => RuleKind::Avg,
            RuleTag::Stddev => RuleKind::Stddev,
            RuleTag::DistinctCount => RuleKind::DistinctCount,
            RuleTag::Quantile => RuleKind::Quantile(payload(config)?),
            RuleTag::TrueFalseCount => RuleKind::TrueFalseCount,
            RuleTag::GroupByTime => RuleKind::GroupByTime(payload(config)?),
            RuleTag::RowRule | RuleTag::ViewRule => {
                return Err(ExploreError::invalid_rule(format!(
                    "{} 不能作为字段规则",
                    tag.as_str()
                )))
            }
        };
        kind.validate()?;
        Ok(kind)
    }

    fn validate(&self) -> ExploreResult<()> {
        match self {
            RuleKind::Dictionary(config) => {
                if config.values.is_empty() {
                    return Err(ExploreError::invalid_rule("字典规则的取值列表为空"));
                }
            }
            RuleKind::Format(config) => {
                config.pattern()?;
            }
            RuleKind::Range(config) => match (config.min, config.max) {
                (None, None) => {
                    return Err(ExploreError::invalid_rule("范围规则至少需要min或max之一"))
                }
                (Some(min), Some(max)) if min > max => {
                    return Err(ExploreError::invalid_rule(format!(
                        "范围规则下界 {min} 大于上界 {max}"
                    )))
                }
                _ => {}
            },
            RuleKind::Quantile(config) => {
                if config.percentiles.is_empty() {
                    return Err(ExploreError::invalid_rule("分位数规则的分位点为空"));
                }
                if let Some(p) = config
                    .percentiles
                    .iter()
                    .find(|p| !(0.0..=1.0).contains(*p))
                {
                    return Err(ExploreError::invalid_rule(format!(
                        "分位点 {p} 不在 [0, 1] 区间"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn payload<T: for<'de> Deserialize<'de>>(config: Value) -> ExploreResult<T> {
    serde_json::from_value(config)
        .map_err(|e| ExploreError::invalid_rule(format!("规则参数无效: {e}")))
}

/// 内置的空值定义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinNull {
    Null,
    EmptyString,
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NullValue {
    Builtin(BuiltinNull),
    Custom { custom: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NullCountConfig {
    #[serde(default)]
    pub null_values: Vec<NullValue>,
}

impl NullCountConfig {
    /// 未配置时仅把 SQL NULL 视为空值
    pub fn effective_values(&self) -> Vec<NullValue> {
        if self.null_values.is_empty() {
            vec![NullValue::Builtin(BuiltinNull::Null)]
        } else {
            self.null_values.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryConfig {
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatPreset {
    Email,
    Phone,
    IdCard,
    PostalCode,
}

impl FormatPreset {
    pub fn pattern(&self) -> &'static str {
        match self {
            FormatPreset::Email => r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$",
            FormatPreset::Phone => r"^1[3-9][0-9]{9}$",
            FormatPreset::IdCard => {
                r"^[1-9][0-9]{5}(18|19|20)[0-9]{2}(0[1-9]|1[0-2])(0[1-9]|[12][0-9]|3[01])[0-9]{3}[0-9Xx]$"
            }
            FormatPreset::PostalCode => r"^[0-9]{6}$",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    #[serde(default)]
    pub preset: Option<FormatPreset>,
    #[serde(default)]
    pub regex: Option<String>,
}

impl FormatConfig {
    /// 生效的正则表达式，preset 与 regex 必须且只能配置一个
    pub fn pattern(&self) -> ExploreResult<String> {
        match (&self.preset, &self.regex) {
            (Some(preset), None) => Ok(preset.pattern().to_string()),
            (None, Some(regex)) => {
                Regex::new(regex)
                    .map_err(|e| ExploreError::invalid_rule(format!("正则表达式无效: {e}")))?;
                Ok(regex.clone())
            }
            (Some(_), Some(_)) => Err(ExploreError::invalid_rule("格式规则不能同时配置preset与regex")),
            (None, None) => Err(ExploreError::invalid_rule("格式规则缺少preset或regex")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileConfig {
    pub percentiles: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Day,
    Month,
    Year,
}

impl TimeGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Day => "day",
            TimeGranularity::Month => "month",
            TimeGranularity::Year => "year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupByTimeConfig {
    pub granularity: TimeGranularity,
}

/// 行级规则：结构化过滤条件，命中条件的行视为合格
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub dimension: Option<Dimension>,
    pub filter: FilterNode,
}

/// 视图级规则：自定义布尔表达式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub dimension: Option<Dimension>,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataRuleKind {
    ColumnCommentCoverage,
}

/// 元数据规则：不需要查询，直接基于列元数据评分
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRule {
    pub rule_id: String,
    pub name: String,
    pub kind: MetadataRuleKind,
}

impl MetadataRule {
    pub fn dimension(&self) -> Dimension {
        match self.kind {
            MetadataRuleKind::ColumnCommentCoverage => Dimension::Completeness,
        }
    }
}
