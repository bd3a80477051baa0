//! Namespace-bound data clients and the adaptive factory
//!
//! The factory hands out clients bound to the requested namespace when the
//! backend has confirmed isolation, and to the default namespace otherwise.
//! The downgrade is silent to the caller (logged and counted only), so code
//! written for a multi-tenant backend keeps working against a single-tenant
//! one.

use crate::capability::CapabilityCache;
use crate::errors::{Result, TenancyError};
use crate::namespace::{NamespaceAssigner, NamespaceId};
use crate::transport::BackendTransport;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Attached to transport failures on namespace-bound clients
pub const NAMESPACE_REMEDIATION: &str = "Namespace requests need an enterprise backend with multi-tenancy enabled and a valid license. Verify the coordinator license state or use the default namespace.";

/// Data client bound to one namespace. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BoundClient {
    namespace: NamespaceId,
    /// Namespace the caller asked for, when it differs from the bound one
    requested: Option<NamespaceId>,
    is_default: bool,
    transport: Arc<BackendTransport>,
}

impl BoundClient {
    pub(crate) fn new(
        namespace: NamespaceId,
        requested: Option<NamespaceId>,
        is_default: bool,
        transport: Arc<BackendTransport>,
    ) -> Self {
        Self {
            namespace,
            requested,
            is_default,
            transport,
        }
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// Whether the requested namespace was replaced by the default one
    pub fn is_downgraded(&self) -> bool {
        self.requested.is_some()
    }

    /// Namespace originally requested by the caller, if downgraded
    pub fn requested_namespace(&self) -> Option<&NamespaceId> {
        self.requested.as_ref()
    }

    pub(crate) fn transport(&self) -> &Arc<BackendTransport> {
        &self.transport
    }

    /// Run a GraphQL query or mutation, returning the `data` payload.
    pub async fn execute(&self, query: &str, variables: Option<&Value>) -> Result<Value> {
        self.transport
            .graphql(&self.namespace, query, variables)
            .await
            .map_err(|err| self.shape_error(err))
    }

    fn shape_error(&self, err: TenancyError) -> TenancyError {
        match err {
            TenancyError::Transport {
                message,
                status,
                source,
                ..
            } if self.is_default => {
                tracing::debug!(
                    namespace = %self.namespace,
                    detail = %message,
                    source = %source.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "Backend request failed"
                );
                TenancyError::Transport {
                    message: match status {
                        Some(code) => format!("backend request failed with HTTP {code}"),
                        None => "backend unavailable".to_string(),
                    },
                    status,
                    remediation: None,
                    source: None,
                }
            }
            TenancyError::Transport {
                message,
                status,
                source,
                ..
            } => TenancyError::Transport {
                message,
                status,
                remediation: Some(NAMESPACE_REMEDIATION.to_string()),
                source,
            },
            other => other,
        }
    }
}

/// Produces bound clients according to the cached capability snapshot.
pub struct AdaptiveClientFactory {
    cache: Arc<CapabilityCache>,
    transport: Arc<BackendTransport>,
    assigner: NamespaceAssigner,
    downgrades: AtomicU64,
}

impl AdaptiveClientFactory {
    pub fn new(
        cache: Arc<CapabilityCache>,
        transport: Arc<BackendTransport>,
        assigner: NamespaceAssigner,
    ) -> Self {
        Self {
            cache,
            transport,
            assigner,
            downgrades: AtomicU64::new(0),
        }
    }

    /// Bind a client to `requested`, or to the default namespace when
    /// isolation is not confirmed. Never fails.
    ///
    /// The capability cache is consulted for every client, default ones
    /// included, so the first client of any kind triggers detection.
    pub async fn create_client(&self, requested: Option<NamespaceId>) -> BoundClient {
        let snapshot = self.cache.get().await;
        let default = self.assigner.default_namespace();
        let requested = match requested {
            Some(ns) if ns != default => ns,
            _ => return self.bind(default, None),
        };

        if snapshot.supports_namespaces() {
            return self.bind(requested, None);
        }

        let total = self.downgrades.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            requested = %requested,
            bound = %default,
            mode = %snapshot.deployment_mode(),
            downgrades = total,
            "Namespace isolation unavailable, using default namespace"
        );
        self.bind(default, Some(requested))
    }

    pub async fn create_client_from_tenant(&self, tenant_id: &str) -> BoundClient {
        self.create_client(Some(self.assigner.assign(tenant_id)))
            .await
    }

    pub async fn create_default_client(&self) -> BoundClient {
        self.create_client(None).await
    }

    pub async fn create_test_client(&self) -> BoundClient {
        self.create_client(Some(self.assigner.test_namespace()))
            .await
    }

    /// Number of clients downgraded to the default namespace so far
    pub fn downgrade_count(&self) -> u64 {
        self.downgrades.load(Ordering::Relaxed)
    }

    pub fn assigner(&self) -> &NamespaceAssigner {
        &self.assigner
    }

    fn bind(&self, namespace: NamespaceId, requested: Option<NamespaceId>) -> BoundClient {
        let is_default = self.assigner.is_default(&namespace);
        BoundClient::new(namespace, requested, is_default, Arc::clone(&self.transport))
    }
}

/// Fail when a client is not bound where an operation must run.
pub(crate) fn ensure_bound(client: &BoundClient, expected: &NamespaceId) -> Result<()> {
    if client.namespace() == expected {
        return Ok(());
    }
    Err(TenancyError::NamespaceMismatch {
        expected: expected.to_string(),
        bound: client.namespace().to_string(),
    })
}
