//! Headless-CMS REST API source.
//!
//! Expects list endpoints at `{base}/{table}` accepting `_start`/`_limit`
//! paging, `_sort=column:ASC` ordering and equality filters as plain query
//! parameters, plus `{base}/{table}/count`. Responses may be a bare JSON
//! array or an object with a `data` array.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{check_identifier, Result, SourceError, SourceQuery, SourceStore};
use crate::models::{ColumnInfo, ForeignKey, SourceRow, SqlValue};

/// Page size used for schema inference.
const SAMPLE_SIZE: usize = 25;

/// REST source reading collections from a headless CMS.
pub struct ApiSource {
    client: Client,
    base_url: String,
    tables: Vec<String>,
    token: Option<String>,
}

impl ApiSource {
    /// Create an API source over the given collection endpoints.
    ///
    /// REST APIs have no catalog, so the set of tables is configured.
    pub fn new(
        base_url: &str,
        tables: Vec<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(SourceError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tables,
            token,
        })
    }

    fn endpoint(&self, table: &str) -> Result<String> {
        Ok(format!("{}/{}", self.base_url, check_identifier(table)?))
    }

    fn query_params(query: &SourceQuery) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = query
            .filters
            .iter()
            .map(|(column, value)| match value {
                SqlValue::Null => (format!("{}_null", column), "true".to_string()),
                other => (column.clone(), other.to_string()),
            })
            .collect();
        if let Some(order) = &query.order_by {
            params.push((
                "_sort".to_string(),
                format!(
                    "{}:{}",
                    order.column,
                    if order.descending { "DESC" } else { "ASC" }
                ),
            ));
        }
        params
    }

    async fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        let mut request = self.client.get(url).query(params);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    fn rows_from(value: Value) -> Result<Vec<SourceRow>> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(SourceError::Decode(
                        "expected an array or an object with a 'data' array".to_string(),
                    ))
                }
            },
            _ => return Err(SourceError::Decode("unexpected response shape".to_string())),
        };

        items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => {
                    // Some APIs nest fields under "attributes" next to the id.
                    let mut row = SourceRow::new();
                    for (key, value) in &obj {
                        if key == "attributes" {
                            if let Value::Object(attrs) = value {
                                for (k, v) in attrs {
                                    row.insert(k, SqlValue::from_json(v));
                                }
                            }
                        } else {
                            row.insert(key, SqlValue::from_json(value));
                        }
                    }
                    Ok(row)
                }
                other => Err(SourceError::Decode(format!(
                    "expected object rows, got {}",
                    other
                ))),
            })
            .collect()
    }

    async fn sample(&self, table: &str) -> Result<Vec<SourceRow>> {
        self.fetch(table, &SourceQuery::new().page(0, SAMPLE_SIZE))
            .await
    }
}

fn infer_type(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Integer(_) => "INTEGER",
        SqlValue::Real(_) => "REAL",
        SqlValue::Text(_) => "TEXT",
        SqlValue::Blob(_) => "BLOB",
        SqlValue::Null => "NULL",
    }
}

#[async_trait]
impl SourceStore for ApiSource {
    fn describe(&self) -> String {
        format!("api:{}", self.base_url)
    }

    async fn connect(&self) -> Result<()> {
        let Some(first) = self.tables.first() else {
            return Err(SourceError::Connection(
                "no collections configured for the API source".to_string(),
            ));
        };
        let url = format!("{}/count", self.endpoint(first)?);
        self.get_json(&url, &[]).await.map(|_| ())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.sample(table).await?;
        let mut seen: BTreeMap<String, (String, bool)> = BTreeMap::new();

        for row in &rows {
            for (name, value) in row.columns() {
                let entry = seen
                    .entry(name.clone())
                    .or_insert_with(|| ("NULL".to_string(), false));
                if value.is_null() {
                    entry.1 = true;
                } else if entry.0 == "NULL" {
                    entry.0 = infer_type(value).to_string();
                }
            }
        }

        Ok(seen
            .into_iter()
            .map(|(name, (data_type, nullable))| ColumnInfo {
                name,
                data_type,
                nullable,
                max_length: None,
                default: None,
            })
            .collect())
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let columns = self.columns(table).await?;
        Ok(columns
            .iter()
            .find(|c| c.name == "id" || c.name == "_id")
            .map(|c| vec![c.name.clone()])
            .unwrap_or_default())
    }

    async fn foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKey>> {
        Ok(Vec::new())
    }

    async fn count(&self, table: &str, query: &SourceQuery) -> Result<usize> {
        let url = format!("{}/count", self.endpoint(table)?);
        let value = self.get_json(&url, &Self::query_params(query)).await?;
        let count = match &value {
            Value::Number(n) => n.as_u64(),
            Value::Object(obj) => obj.get("count").and_then(Value::as_u64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        count
            .map(|c| c as usize)
            .ok_or_else(|| SourceError::Decode(format!("invalid count response: {}", value)))
    }

    async fn fetch(&self, table: &str, query: &SourceQuery) -> Result<Vec<SourceRow>> {
        let url = self.endpoint(table)?;
        let mut params = Self::query_params(query);
        params.push(("_start".to_string(), query.offset.to_string()));
        if let Some(limit) = query.limit {
            params.push(("_limit".to_string(), limit.to_string()));
        }
        let value = self.get_json(&url, &params).await?;
        Self::rows_from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> ApiSource {
        ApiSource::new(
            &server.uri(),
            vec!["musics".to_string()],
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_and_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/musics"))
            .and(query_param("_start", "0"))
            .and(query_param("_limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "title": "Rain", "duration": 120.5},
                {"id": 2, "title": "Waves", "duration": null}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/musics/count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(2)))
            .mount(&server)
            .await;

        let src = source(&server);
        assert_eq!(src.count("musics", &SourceQuery::new()).await.unwrap(), 2);

        let rows = src
            .fetch("musics", &SourceQuery::new().page(0, 2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("title").as_deref(), Some("Rain"));
        assert_eq!(rows[0].real("duration"), Some(120.5));
        assert!(rows[1].get("duration").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_nested_attributes_and_schema_inference() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/musics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": 5, "attributes": {"title": "Forest", "credit": null}},
                    {"id": 6, "attributes": {"title": "Stream", "credit": "J. Doe"}}
                ]
            })))
            .mount(&server)
            .await;

        let src = source(&server);
        let columns = src.columns("musics").await.unwrap();
        let credit = columns.iter().find(|c| c.name == "credit").unwrap();
        assert_eq!(credit.data_type, "TEXT");
        assert!(credit.nullable);
        assert_eq!(src.primary_key("musics").await.unwrap(), vec!["id"]);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/musics/count"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let src = source(&server);
        assert!(matches!(
            src.connect().await,
            Err(SourceError::Status { status: 503, .. })
        ));
    }
}
