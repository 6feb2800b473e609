use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use explorer_core::config::{MetadataConfig, QueryServiceConfig};
use explorer_core::models::{ColumnMeta, QueryPage, TableRef};
use explorer_core::traits::{MetadataResolver, RemoteQueryService};
use explorer_core::{ExploreError, ExploreResult};
use serde::Serialize;
use tracing::{debug, error, instrument};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    catalog: &'a str,
    database: &'a str,
    table: &'a str,
    sql: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<&'a str>,
}

/// 把 reqwest 错误归入引擎的错误分类
fn map_transport_error(err: reqwest::Error) -> ExploreError {
    if err.is_timeout() {
        ExploreError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ExploreError::Network(err.to_string())
    } else if err.is_decode() {
        ExploreError::Serialization(err.to_string())
    } else {
        ExploreError::RemoteQuery(err.to_string())
    }
}

/// HTTP 远程查询服务客户端
///
/// `POST {endpoint}/api/v1/query`，5xx 视为可重试的远程错误，
/// 4xx 视为查询被拒绝（SQL 错误等），不重试。
pub struct HttpQueryService {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpQueryService {
    pub fn new(config: &QueryServiceConfig) -> ExploreResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ExploreError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl RemoteQueryService for HttpQueryService {
    #[instrument(skip(self, sql), fields(table = %table.qualified_name(), has_token = continuation_token.is_some()))]
    async fn execute(
        &self,
        table: &TableRef,
        sql: &str,
        continuation_token: Option<&str>,
        timeout: Duration,
    ) -> ExploreResult<QueryPage> {
        let url = format!("{}/api/v1/query", self.endpoint);
        let request = QueryRequest {
            catalog: &table.catalog,
            database: &table.database,
            table: &table.table,
            sql,
            continuation_token,
        };

        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let page: QueryPage = response.json().await.map_err(map_transport_error)?;
            debug!(rows = page.rows.len(), "远程查询返回 {} 行", page.rows.len());
            return Ok(page);
        }

        let body = response.text().await.unwrap_or_default();
        error!("远程查询失败: HTTP {} - {}", status, body);
        if status.is_client_error() {
            Err(ExploreError::QueryRejected(format!("HTTP {status} - {body}")))
        } else {
            Err(ExploreError::RemoteQuery(format!("HTTP {status} - {body}")))
        }
    }
}

/// HTTP 元数据服务客户端，`GET {endpoint}/api/v1/tables/{table_id}/columns`
pub struct HttpMetadataResolver {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpMetadataResolver {
    pub fn new(config: &MetadataConfig) -> ExploreResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ExploreError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    #[instrument(skip(self))]
    async fn resolve_columns(&self, table_id: &str) -> ExploreResult<HashMap<String, ColumnMeta>> {
        let url = format!("{}/api/v1/tables/{}/columns", self.endpoint, table_id);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ExploreError::Configuration(format!(
                "元数据服务中不存在表: {table_id}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExploreError::Network(format!(
                "查询表 {table_id} 的列信息失败: HTTP {status} - {body}"
            )));
        }

        let columns: Vec<ColumnMeta> = response.json().await.map_err(map_transport_error)?;
        debug!("表 {} 解析到 {} 个字段", table_id, columns.len());
        Ok(columns
            .into_iter()
            .map(|column| (column.field_id.clone(), column))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_request_wire_format() {
        let request = QueryRequest {
            catalog: "hive",
            database: "dw",
            table: "users",
            sql: "SELECT 1",
            continuation_token: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["catalog"], "hive");
        assert!(json.get("continuationToken").is_none());

        let request = QueryRequest {
            continuation_token: Some("abc"),
            ..request
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["continuationToken"], "abc");
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let service = HttpQueryService::new(&QueryServiceConfig {
            endpoint: "http://trino-gateway:8090/".to_string(),
            request_timeout_seconds: 10,
        })
        .unwrap();
        assert_eq!(service.endpoint, "http://trino-gateway:8090");
    }
}
