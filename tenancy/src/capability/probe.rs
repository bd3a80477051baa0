//! Read-only capability probe

use super::cache::Clock;
use super::{CapabilitySnapshot, LicenseClass, UNKNOWN_VERSION};
use crate::errors::{Result, TenancyError};
use crate::namespace::NamespaceAssigner;
use crate::transport::BackendTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Cheapest request that requires a real namespace
const ISOLATION_QUERY: &str = "query { __typename }";

/// Source of capability snapshots.
///
/// `detect` never fails: problems are folded into a snapshot with
/// `probe_error` set and every capability off.
#[async_trait]
pub trait CapabilityDetector: Send + Sync {
    async fn detect(&self) -> CapabilitySnapshot;
}

/// Probes the live backend and its coordinator.
pub struct CapabilityProbe {
    transport: Arc<BackendTransport>,
    clock: Arc<dyn Clock>,
    assigner: NamespaceAssigner,
}

impl CapabilityProbe {
    pub fn new(
        transport: Arc<BackendTransport>,
        clock: Arc<dyn Clock>,
        assigner: NamespaceAssigner,
    ) -> Self {
        Self {
            transport,
            clock,
            assigner,
        }
    }

    async fn try_detect(&self) -> Result<CapabilitySnapshot> {
        let health = self.transport.health().await?;
        let enterprise_features = enterprise_features(&health);
        let enterprise_detected = !enterprise_features.is_empty();

        let namespace_isolation_confirmed = if enterprise_detected {
            self.verify_isolation().await
        } else {
            false
        };

        let (license_class, license_expiry) = match self.transport.coordinator_state().await? {
            Some(state) => classify_license(&state),
            None => (LicenseClass::Unknown, None),
        };

        Ok(CapabilitySnapshot {
            enterprise_detected,
            namespace_isolation_confirmed,
            license_class,
            license_expiry,
            backend_version: backend_version(&health),
            detected_at: self.clock.now(),
            probe_error: None,
            enterprise_features,
        })
    }

    /// Issue a trivial request against the reserved test namespace.
    async fn verify_isolation(&self) -> bool {
        let namespace = self.assigner.test_namespace();
        match self
            .transport
            .graphql(&namespace, ISOLATION_QUERY, None)
            .await
        {
            Ok(_) => true,
            // The backend understood the namespace and refused it for
            // namespace-specific reasons, so the feature is live.
            Err(err) if mentions_namespace(&err) => {
                tracing::debug!(error = %err, "Isolation probe rejected for namespace reasons");
                true
            }
            Err(err) => {
                tracing::info!(
                    error = %err,
                    category = err.category().as_str(),
                    "Namespace isolation not confirmed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl CapabilityDetector for CapabilityProbe {
    async fn detect(&self) -> CapabilitySnapshot {
        match self.try_detect().await {
            Ok(snapshot) => {
                tracing::info!(
                    mode = %snapshot.deployment_mode(),
                    license = snapshot.license_class.as_str(),
                    version = %snapshot.backend_version,
                    "Capability probe completed"
                );
                snapshot
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    category = err.category().as_str(),
                    "Capability probe failed, assuming single-tenant backend"
                );
                CapabilitySnapshot::unavailable(err.to_string(), self.clock.now())
            }
        }
    }
}

/// Only responses from the backend count; transport messages for failed
/// connections never reach the backend's namespace handling.
fn mentions_namespace(err: &TenancyError) -> bool {
    let text = match err {
        TenancyError::Backend { message, .. } => message,
        TenancyError::Transport {
            message,
            status: Some(_),
            ..
        } => message,
        _ => return false,
    };
    text.to_ascii_lowercase().contains("namespace")
}

/// `/health` answers with one entry per node or a single object.
fn health_entries(health: &Value) -> Vec<&Value> {
    match health {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![health],
        _ => Vec::new(),
    }
}

pub(crate) fn enterprise_features(health: &Value) -> Vec<String> {
    let mut features: Vec<String> = health_entries(health)
        .into_iter()
        .filter_map(|entry| entry.get("ee_features").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    features.sort();
    features.dedup();
    features
}

pub(crate) fn backend_version(health: &Value) -> String {
    health_entries(health)
        .into_iter()
        .find_map(|entry| entry.get("version").and_then(Value::as_str))
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_VERSION)
        .to_string()
}

/// Map the coordinator's license block to a class and expiry.
pub(crate) fn classify_license(state: &Value) -> (LicenseClass, Option<DateTime<Utc>>) {
    let Some(license) = state.get("license").filter(|l| l.is_object()) else {
        return (LicenseClass::Unknown, None);
    };

    let expiry = license
        .get("expiryTs")
        .and_then(|ts| ts.as_i64().or_else(|| ts.as_str()?.parse().ok()))
        .filter(|ts| *ts > 0)
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    let enabled = license
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let user = license
        .get("user")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    let class = if !user.is_empty() {
        LicenseClass::Licensed
    } else if enabled {
        LicenseClass::Trial
    } else {
        LicenseClass::Unlicensed
    };
    (class, expiry)
}
