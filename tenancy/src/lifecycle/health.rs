//! Three-stage tenant health diagnosis

use crate::client::BoundClient;
use crate::errors::TenancyError;
use serde::Serialize;
use serde_json::Value;

const INTROSPECTION_QUERY: &str = "query { __schema { types { name } } }";

pub(super) const TRIAL_READ_QUERY: &str = "query { queryNode(first: 1) { id } }";

/// Types a provisioned namespace must expose
pub const CORE_TYPES: [&str; 3] = ["Node", "Edge", "Hierarchy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantHealth {
    Healthy,
    /// Working, but served from the default namespace
    Degraded,
    NotAccessible,
    Error,
    Unknown,
}

impl TenantHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::NotAccessible => "not_accessible",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the tenant can serve requests
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub state: TenantHealth,
    pub detail: Option<String>,
}

impl HealthReport {
    fn new(state: TenantHealth, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: Some(detail.into()),
        }
    }
}

/// Text the backend produced, if the failure came from the backend at all
fn backend_text(err: &TenancyError) -> Option<String> {
    match err {
        TenancyError::Backend { message, .. } => Some(message.to_ascii_lowercase()),
        TenancyError::Transport {
            message,
            status: Some(_),
            ..
        } => Some(message.to_ascii_lowercase()),
        _ => None,
    }
}

fn looks_like_unknown_namespace(err: &TenancyError) -> bool {
    backend_text(err).is_some_and(|text| text.contains("namespace"))
}

/// A read against a namespace with schema but no data
fn looks_like_empty_tenant(err: &TenancyError) -> bool {
    backend_text(err).is_some_and(|text| {
        ["no data", "empty", "not found", "no results"]
            .iter()
            .any(|marker| text.contains(marker))
    })
}

/// Diagnose a tenant through its bound client. Never fails.
pub(super) async fn diagnose(client: &BoundClient) -> HealthReport {
    let report = run_stages(client).await;
    if report.state == TenantHealth::Healthy && client.is_downgraded() {
        return HealthReport::new(
            TenantHealth::Degraded,
            format!(
                "served from default namespace {} instead of {}",
                client.namespace(),
                client
                    .requested_namespace()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
        );
    }
    report
}

async fn run_stages(client: &BoundClient) -> HealthReport {
    // Stage 1: namespace reachable at all
    let introspection = match client.execute(INTROSPECTION_QUERY, None).await {
        Ok(data) => data,
        Err(err) if looks_like_unknown_namespace(&err) => {
            return HealthReport::new(TenantHealth::NotAccessible, err.to_string());
        }
        Err(err) => return HealthReport::new(TenantHealth::Error, err.to_string()),
    };

    let Some(types) = introspection
        .pointer("/__schema/types")
        .and_then(Value::as_array)
    else {
        return HealthReport::new(TenantHealth::Unknown, "introspection returned no type list");
    };

    // Stage 2: schema initialized
    let names: Vec<&str> = types
        .iter()
        .filter_map(|t| t.get("name").and_then(Value::as_str))
        .collect();
    let missing: Vec<&str> = CORE_TYPES
        .iter()
        .copied()
        .filter(|core| !names.contains(core))
        .collect();
    if !missing.is_empty() {
        return HealthReport::new(
            TenantHealth::Error,
            format!("schema not initialized (missing types: {})", missing.join(", ")),
        );
    }

    // Stage 3: data readable
    match client.execute(TRIAL_READ_QUERY, None).await {
        Ok(data) => match data.get("queryNode") {
            Some(Value::Array(_)) | Some(Value::Null) => HealthReport {
                state: TenantHealth::Healthy,
                detail: None,
            },
            _ => HealthReport::new(TenantHealth::Unknown, "trial read returned an unexpected shape"),
        },
        Err(err) if looks_like_empty_tenant(&err) => HealthReport::new(
            TenantHealth::Healthy,
            "schema present, no data yet",
        ),
        Err(err) => HealthReport::new(TenantHealth::Error, err.to_string()),
    }
}
