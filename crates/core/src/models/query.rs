use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 查询结果的一行：列名 -> 值
pub type Row = Map<String, Value>;

/// 远程查询服务返回的一页结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
    /// 存在时表示还有后续页
    #[serde(default)]
    pub next_token: Option<String>,
}

/// 元数据服务解析出的列信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub field_id: String,
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub comment: Option<String>,
}
