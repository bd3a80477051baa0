//! HTTP transport to the graph backend and its coordinator
//!
//! One shared `reqwest::Client` with a fixed per-request timeout. Every call
//! is a single attempt; retry policy belongs to the caller.
//!
//! Failure mapping:
//! - no response / non-2xx → `TenancyError::Transport`
//! - 2xx with a non-empty `errors` array → `TenancyError::Backend`

use crate::config::BackendConfig;
use crate::errors::{Result, TenancyError};
use crate::namespace::NamespaceId;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

/// Longest response excerpt kept in error messages
const BODY_EXCERPT_LEN: usize = 512;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

/// Shared transport configuration for all bound clients
#[derive(Debug, Clone)]
pub struct BackendTransport {
    http: reqwest::Client,
    graphql_url: String,
    admin_url: String,
    coordinator_url: Option<String>,
}

impl BackendTransport {
    pub fn new(cfg: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| TenancyError::config_with_source("failed to build HTTP client", e))?;

        Ok(Self {
            http,
            graphql_url: cfg.graphql_url.clone(),
            admin_url: cfg.admin_url.clone(),
            coordinator_url: cfg.coordinator().map(str::to_string),
        })
    }

    pub fn has_coordinator(&self) -> bool {
        self.coordinator_url.is_some()
    }

    /// `GET /health` on the backend
    pub async fn health(&self) -> Result<Value> {
        let url = endpoint(&self.admin_url, "/health", None)?;
        let resp = self.send(self.http.get(url), "health probe").await?;
        read_json(resp, "health probe").await
    }

    /// `GET /state` on the coordinator; `None` when no coordinator is configured
    pub async fn coordinator_state(&self) -> Result<Option<Value>> {
        let Some(base) = &self.coordinator_url else {
            return Ok(None);
        };
        let url = endpoint(base, "/state", None)?;
        let resp = self.send(self.http.get(url), "coordinator state").await?;
        read_json(resp, "coordinator state").await.map(Some)
    }

    /// Execute a GraphQL request in `namespace`, returning the `data` payload
    pub async fn graphql(
        &self,
        namespace: &NamespaceId,
        query: &str,
        variables: Option<&Value>,
    ) -> Result<Value> {
        let url = endpoint(&self.graphql_url, "", Some(namespace))?;
        let body = json!({
            "query": query,
            "variables": variables.cloned().unwrap_or_else(|| json!({})),
        });

        tracing::trace!(namespace = %namespace, "graphql request");
        let resp = self
            .send(self.http.post(url).json(&body), "graphql request")
            .await?;
        let status = resp.status().as_u16();
        let parsed: GraphQlResponse = resp.json().await.map_err(|e| TenancyError::Transport {
            message: "graphql response was not valid JSON".to_string(),
            status: Some(status),
            remediation: None,
            source: Some(Box::new(e)),
        })?;

        match parsed.errors {
            Some(errors) if !errors.is_empty() => Err(TenancyError::backend(errors)),
            _ => Ok(parsed.data.unwrap_or(Value::Null)),
        }
    }

    /// `GET /admin/schema?namespace=<ns>`
    pub async fn fetch_schema(&self, namespace: &NamespaceId) -> Result<Value> {
        let url = endpoint(&self.admin_url, "/admin/schema", Some(namespace))?;
        let resp = self.send(self.http.get(url), "schema fetch").await?;
        let body = read_json(resp, "schema fetch").await?;
        reject_logical_errors(body)
    }

    /// `POST /admin/schema?namespace=<ns>` with the raw schema text
    pub async fn push_schema(&self, namespace: &NamespaceId, schema: &str) -> Result<()> {
        let url = endpoint(&self.admin_url, "/admin/schema", Some(namespace))?;
        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/graphql")
            .body(schema.to_string());
        let resp = self.send(request, "schema push").await?;
        reject_logical_errors(read_json_lenient(resp).await)?;
        Ok(())
    }

    /// `POST /alter?namespace=<ns>` with `{"drop_all": true}`
    pub async fn drop_all(&self, namespace: &NamespaceId) -> Result<()> {
        let url = endpoint(&self.admin_url, "/alter", Some(namespace))?;
        let request = self.http.post(url).json(&json!({ "drop_all": true }));
        let resp = self.send(request, "drop all").await?;
        reject_logical_errors(read_json_lenient(resp).await)?;
        Ok(())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let resp = request.send().await.map_err(|e| {
            TenancyError::transport_with_source(format!("{what} failed: {}", describe(&e)), e)
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(TenancyError::http_status(
            status.as_u16(),
            format!("{what} returned HTTP {}: {}", status.as_u16(), excerpt(&body)),
        ))
    }
}

fn endpoint(base: &str, path: &str, namespace: Option<&NamespaceId>) -> Result<Url> {
    let raw = format!("{}{path}", base.trim_end_matches('/'));
    let mut url = Url::parse(&raw)
        .map_err(|e| TenancyError::config_with_source(format!("invalid endpoint {raw}"), e))?;
    if let Some(ns) = namespace {
        url.query_pairs_mut().append_pair("namespace", ns.as_str());
    }
    Ok(url)
}

async fn read_json(resp: reqwest::Response, what: &str) -> Result<Value> {
    let status = resp.status().as_u16();
    resp.json().await.map_err(|e| TenancyError::Transport {
        message: format!("{what} response was not valid JSON"),
        status: Some(status),
        remediation: None,
        source: Some(Box::new(e)),
    })
}

/// Admin endpoints may answer with plain text on success
async fn read_json_lenient(resp: reqwest::Response) -> Value {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(Value::Null)
}

fn reject_logical_errors(body: Value) -> Result<Value> {
    match body.get("errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => Err(TenancyError::backend(errors.clone())),
        _ => Ok(body),
    }
}

/// Describe a request failure without echoing the URL
fn describe(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "response body could not be read"
    } else {
        "request error"
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_LEN {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(BODY_EXCERPT_LEN).collect();
    format!("{cut}…")
}
