//! SQL 文本辅助函数：标识符/字面量转义与占位符模板渲染

use explorer_core::{ExploreError, ExploreResult};

/// 双引号标识符，内部双引号加倍
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 单引号字符串字面量，内部单引号加倍
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 渲染 `${name}` 占位符
///
/// 单遍扫描模板，参数值中的 `${` 不会被再次展开。模板引用了未提供的参数
/// 说明骨架与参数不匹配，属于编译器内部错误。
pub fn render_template(template: &str, params: &[(&str, &str)]) -> ExploreResult<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ExploreError::Internal(format!("SQL模板占位符未闭合: {}", &rest[start..]))
        })?;
        let name = &after[..end];
        let value = params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| {
                ExploreError::Internal(format!("SQL模板存在未替换的占位符: ${{{name}}}"))
            })?;
        rendered.push_str(value);
        rest = &after[end + 1..];
    }
    rendered.push_str(rest);

    Ok(rendered)
}

/// 结果列别名所属的规则范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasScope<'a> {
    Field(&'a str),
    Row,
    View,
}

/// 规则结果列前缀
///
/// Trino 返回的列名为小写，因此 `[a-z0-9]` 原样保留，其余字节编码为 `_xx`
/// （小写十六进制）。编码结果不含 `__`，用它分隔范围与规则ID，不同的
/// (范围, 规则ID) 总是得到不同的前缀，追加 `__issues` 等后缀也不会冲突。
pub fn result_alias(scope: AliasScope<'_>, rule_id: &str) -> String {
    match scope {
        AliasScope::Field(field_id) => {
            format!("r_f_{}__{}", encode_alias_part(field_id), encode_alias_part(rule_id))
        }
        AliasScope::Row => format!("r_row__{}", encode_alias_part(rule_id)),
        AliasScope::View => format!("r_view__{}", encode_alias_part(rule_id)),
    }
}

fn encode_alias_part(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let sql = render_template(
            "SELECT MAX(${column_name}) AS \"${alias}\" FROM ${table}",
            &[("column_name", "\"age\""), ("alias", "r_f1_r1"), ("table", "t")],
        )
        .unwrap();
        assert_eq!(sql, "SELECT MAX(\"age\") AS \"r_f1_r1\" FROM t");
    }

    #[test]
    fn test_unresolved_placeholder_is_internal_error() {
        let err = render_template("SELECT ${column_name} FROM ${table}", &[("table", "t")])
            .unwrap_err();
        assert!(matches!(err, ExploreError::Internal(msg) if msg.contains("${column_name}")));
    }

    #[test]
    fn test_parameter_values_are_not_expanded() {
        let sql = render_template("${a} ${b}", &[("a", "'${b}'"), ("b", "1")]).unwrap();
        assert_eq!(sql, "'${b}' 1");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(result_alias(AliasScope::Field("F-Age"), "r1"), "r_f__46_2dage__r1");
        assert_eq!(result_alias(AliasScope::Row, "adult"), "r_row__adult");
    }

    #[test]
    fn test_result_alias_keeps_distinct_ids_apart() {
        let aliases = [
            result_alias(AliasScope::Field("f_age"), "r.1"),
            result_alias(AliasScope::Field("f_age"), "r-1"),
            result_alias(AliasScope::Field("f_age"), "R_1"),
            result_alias(AliasScope::Field("f_age"), "r_1"),
            result_alias(AliasScope::Field("a_b"), "c"),
            result_alias(AliasScope::Field("a"), "b_c"),
            result_alias(AliasScope::Field("row"), "x"),
            result_alias(AliasScope::Row, "x"),
            result_alias(AliasScope::View, "x"),
            result_alias(AliasScope::Field("字段"), "规则"),
        ];
        let unique: std::collections::HashSet<&String> = aliases.iter().collect();
        assert_eq!(unique.len(), aliases.len());

        for alias in &aliases {
            assert!(alias
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
    }
}
