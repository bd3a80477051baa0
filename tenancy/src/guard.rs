//! Safety gates evaluated before state-changing calls reach the backend
//!
//! Every gate either passes or returns a typed error; nothing here talks to
//! the backend except through the capability cache.

use crate::capability::{CapabilityCache, CapabilitySnapshot, DeploymentMode};
use crate::errors::{Result, TenancyError};
use crate::namespace::{NamespaceAssigner, NamespaceId};
use std::sync::Arc;

/// Kind of operation being guarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCategory {
    /// Provisioning new tenant state
    Create,
    /// Reading tenant data
    Read,
    /// Destructive or administrative actions
    Admin,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Admin => "admin",
        }
    }
}

/// What to do when a category needs isolation the backend lacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Refuse with the capability error
    FailHard,
    /// Continue against the default namespace
    DegradeGracefully,
    /// Refuse, attaching deployment diagnostics
    FailWithContext,
}

/// Central category → policy table
pub const fn policy_for(category: OperationCategory) -> FallbackPolicy {
    match category {
        OperationCategory::Create => FallbackPolicy::FailHard,
        OperationCategory::Read => FallbackPolicy::DegradeGracefully,
        OperationCategory::Admin => FallbackPolicy::FailWithContext,
    }
}

/// Namespace chosen for an operation after policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNamespace {
    pub namespace: NamespaceId,
    /// True when the requested namespace was replaced by the default one
    pub degraded: bool,
}

fn remediation_for(mode: DeploymentMode) -> &'static str {
    match mode {
        DeploymentMode::OssSingleTenant => {
            "Start the backend with enterprise features enabled (multi_tenancy) and install a license, or use the default namespace."
        }
        DeploymentMode::EnterpriseSingleTenant => {
            "Enterprise features are active but namespace isolation could not be verified. Check that multi-tenancy is enabled and the license is valid, then refresh capabilities."
        }
        DeploymentMode::EnterpriseMultiTenant => "No action required.",
    }
}

pub struct Guard {
    cache: Arc<CapabilityCache>,
    assigner: NamespaceAssigner,
}

impl Guard {
    pub fn new(cache: Arc<CapabilityCache>, assigner: NamespaceAssigner) -> Self {
        Self { cache, assigner }
    }

    pub async fn deployment_mode(&self) -> DeploymentMode {
        self.cache.get().await.deployment_mode()
    }

    /// Capability gate: refuse unless enterprise features are confirmed
    pub async fn require_enterprise(&self, operation: &str) -> Result<Arc<CapabilitySnapshot>> {
        let snapshot = self.cache.get().await;
        if snapshot.enterprise_detected {
            return Ok(snapshot);
        }
        Err(self.reject(operation, &snapshot, None))
    }

    /// Default or absent namespaces always pass; others need isolation.
    pub async fn require_namespace_support(
        &self,
        operation: &str,
        namespace: Option<&NamespaceId>,
    ) -> Result<()> {
        let Some(namespace) = namespace.filter(|ns| !self.assigner.is_default(ns)) else {
            return Ok(());
        };
        let snapshot = self.cache.get().await;
        if snapshot.supports_namespaces() {
            return Ok(());
        }
        tracing::debug!(namespace = %namespace, "Namespace requested without isolation");
        Err(self.reject(operation, &snapshot, None))
    }

    /// Namespace-format gate for externally supplied strings
    pub fn validate_namespace_format(&self, raw: &str) -> Result<NamespaceId> {
        self.assigner.parse(raw).inspect_err(|err| {
            tracing::warn!(namespace = raw, error = %err, "Rejected malformed namespace");
        })
    }

    /// In multi-tenant mode a destructive action must name its target exactly.
    pub async fn require_destructive_confirmation(
        &self,
        target: &NamespaceId,
        confirmation: Option<&str>,
    ) -> Result<()> {
        let mode = self.deployment_mode().await;
        if !mode.is_multi_tenant() {
            return Ok(());
        }
        if confirmation == Some(target.as_str()) {
            tracing::info!(namespace = %target, "Destructive operation confirmed");
            return Ok(());
        }
        tracing::warn!(
            namespace = %target,
            provided = confirmation.unwrap_or("<none>"),
            "Destructive operation rejected, namespace confirmation missing or mismatched"
        );
        Err(TenancyError::NamespaceConfirmation {
            expected: target.to_string(),
            provided: confirmation.map(str::to_string),
        })
    }

    /// Choose the namespace for an operation, applying the category's policy
    /// when isolation is unavailable.
    pub async fn resolve_namespace(
        &self,
        category: OperationCategory,
        operation: &str,
        requested: Option<NamespaceId>,
    ) -> Result<ResolvedNamespace> {
        let default = self.assigner.default_namespace();
        let requested = match requested {
            Some(ns) if ns != default => ns,
            _ => {
                return Ok(ResolvedNamespace {
                    namespace: default,
                    degraded: false,
                });
            }
        };

        let snapshot = self.cache.get().await;
        if snapshot.supports_namespaces() {
            return Ok(ResolvedNamespace {
                namespace: requested,
                degraded: false,
            });
        }

        match policy_for(category) {
            FallbackPolicy::DegradeGracefully => {
                tracing::info!(
                    operation,
                    requested = %requested,
                    "Isolation unavailable, continuing in default namespace"
                );
                Ok(ResolvedNamespace {
                    namespace: default,
                    degraded: true,
                })
            }
            FallbackPolicy::FailHard => Err(self.reject(operation, &snapshot, None)),
            FallbackPolicy::FailWithContext => {
                let diagnostics = format!(
                    "requested namespace {requested}; {}",
                    snapshot.describe()
                );
                Err(self.reject(operation, &snapshot, Some(diagnostics)))
            }
        }
    }

    fn reject(
        &self,
        operation: &str,
        snapshot: &CapabilitySnapshot,
        diagnostics: Option<String>,
    ) -> TenancyError {
        let mode = snapshot.deployment_mode();
        tracing::warn!(operation, mode = %mode, "Operation refused, enterprise capability missing");
        TenancyError::EnterpriseFeatureUnavailable {
            operation: operation.to_string(),
            mode,
            remediation: remediation_for(mode).to_string(),
            diagnostics,
        }
    }
}
