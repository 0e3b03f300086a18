//! REST client for the target CMS.
//!
//! Collections live at `{base}/{collection}`. Reads use `where[...]` query
//! syntax, uploads are multipart with the document data in a `_payload`
//! JSON part.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::{Document, FileUpload, Filter, Result, StoreError, TargetStore};
use crate::models::Record;

/// Target store speaking the CMS REST API.
pub struct HttpTargetStore {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    probe_collection: String,
}

impl HttpTargetStore {
    /// Create a client for `base_url` (e.g. `https://cms.example.com/api`).
    ///
    /// With an API key, requests carry
    /// `Authorization: <auth_collection> API-Key <key>`.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        auth_collection: &str,
        probe_collection: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: api_key.map(|key| format!("{} API-Key {}", auth_collection, key)),
            probe_collection: probe_collection.to_string(),
        })
    }

    fn url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_header {
            Some(header) => request.header("Authorization", header),
            None => request,
        }
    }

    /// Render a filter as `where[...]` query parameters.
    pub(crate) fn where_params(filter: &Filter) -> Vec<(String, String)> {
        if filter.is_empty() {
            return vec![("where[id][exists]".to_string(), "true".to_string())];
        }
        if filter.conditions.len() == 1 {
            let (field, value) = &filter.conditions[0];
            return vec![(format!("where[{}][equals]", field), render(value))];
        }
        filter
            .conditions
            .iter()
            .enumerate()
            .map(|(i, (field, value))| {
                (
                    format!("where[and][{}][{}][equals]", i, field),
                    render(value),
                )
            })
            .collect()
    }

    async fn check(method: &'static str, url: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            method,
            url: url.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 500),
        })
    }

    /// Extract the `doc` envelope from a write response.
    async fn read_doc(response: Response) -> Result<Document> {
        let value: Value = response.json().await?;
        match value {
            Value::Object(mut obj) => match obj.remove("doc") {
                Some(doc) => Document::from_json(doc),
                None => Document::from_json(Value::Object(obj)),
            },
            _ => Err(StoreError::InvalidResponse(
                "write response is not an object".to_string(),
            )),
        }
    }

    fn body(
        &self,
        request: RequestBuilder,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<RequestBuilder> {
        match file {
            None => Ok(request.json(data)),
            Some(file) => {
                let payload = serde_json::to_string(data)
                    .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
                let part = Part::bytes(file.content)
                    .file_name(file.filename)
                    .mime_str(&file.mime_type)?;
                Ok(request.multipart(Form::new().part("file", part).text("_payload", payload)))
            }
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[async_trait]
impl TargetStore for HttpTargetStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn init(&self) -> Result<()> {
        let url = self.url(&self.probe_collection);
        let request = self
            .authorize(self.client.get(&url))
            .query(&[("limit", "1"), ("depth", "0")]);
        Self::check("GET", &url, request.send().await?).await?;
        Ok(())
    }

    async fn create(
        &self,
        collection: &str,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<Document> {
        let url = self.url(collection);
        let request = self
            .authorize(self.client.post(&url))
            .query(&[("depth", "0")]);
        let response = self.body(request, data, file)?.send().await?;
        Self::read_doc(Self::check("POST", &url, response).await?).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<Document> {
        let url = self.doc_url(collection, id);
        let request = self
            .authorize(self.client.patch(&url))
            .query(&[("depth", "0")]);
        let response = self.body(request, data, file)?.send().await?;
        Self::read_doc(Self::check("PATCH", &url, response).await?).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let url = self.url(collection);
        let mut params = Self::where_params(filter);
        params.push(("limit".to_string(), limit.to_string()));
        params.push(("depth".to_string(), "0".to_string()));

        let response = self
            .authorize(self.client.get(&url))
            .query(&params)
            .send()
            .await?;
        let value: Value = Self::check("GET", &url, response).await?.json().await?;

        match value.get("docs") {
            Some(Value::Array(docs)) => docs.iter().cloned().map(Document::from_json).collect(),
            _ => Err(StoreError::InvalidResponse(format!(
                "find on {} returned no docs array",
                collection
            ))),
        }
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let url = self.doc_url(collection, id);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("depth", "0")])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: Value = Self::check("GET", &url, response).await?.json().await?;
        Document::from_json(value).map(Some)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.doc_url(collection, id);
        let response = self.authorize(self.client.delete(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Self::check("DELETE", &url, response).await?;
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let url = self.url(collection);
        let response = self
            .authorize(self.client.delete(&url))
            .query(&Self::where_params(filter))
            .send()
            .await?;
        let value: Value = Self::check("DELETE", &url, response).await?.json().await?;
        Ok(value
            .get("docs")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> HttpTargetStore {
        HttpTargetStore::new(
            &format!("{}/api", server.uri()),
            Some("secret"),
            "users",
            "media",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_where_params() {
        assert_eq!(
            HttpTargetStore::where_params(&Filter::eq("slug", "calm")),
            vec![("where[slug][equals]".to_string(), "calm".to_string())]
        );
        let multi = HttpTargetStore::where_params(&Filter::eq("slug", "calm").and("duration", 300));
        assert_eq!(multi[1].0, "where[and][1][duration][equals]");
        assert_eq!(multi[1].1, "300");
        assert_eq!(
            HttpTargetStore::where_params(&Filter::new())[0].0,
            "where[id][exists]"
        );
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/music-tags"))
            .and(header("authorization", "users API-Key secret"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "message": "created",
                "doc": {"id": "t1", "name": "Calm", "slug": "calm"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/music-tags"))
            .and(query_param("where[slug][equals]", "calm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "docs": [{"id": "t1", "name": "Calm", "slug": "calm"}],
                "totalDocs": 1
            })))
            .mount(&server)
            .await;

        let store = store(&server);
        let data = json!({"name": "Calm", "slug": "calm"}).as_object().cloned().unwrap();
        let created = store.create("music-tags", &data, None).await.unwrap();
        assert_eq!(created.id, "t1");

        let found = store
            .find_one("music-tags", &Filter::eq("slug", "calm"))
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some("t1".to_string()));
    }

    #[tokio::test]
    async fn test_find_by_id_not_found_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/media/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/media"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad file"))
            .mount(&server)
            .await;

        let store = store(&server);
        assert!(store.find_by_id("media", "gone").await.unwrap().is_none());

        let file = FileUpload {
            filename: "a.jpg".into(),
            mime_type: "image/jpeg".into(),
            content: vec![0xFF, 0xD8],
        };
        let err = store
            .create("media", &Record::new(), Some(file))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 400, .. }));
    }
}
