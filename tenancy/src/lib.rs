//! Capability-adaptive tenancy for the MIMS graph backend
//!
//! The backend runs either single-tenant or with namespace isolation. This
//! crate detects which, hands out clients bound to the right namespace, and
//! drives tenant provisioning and teardown with guards in front of every
//! state-changing call.
//!
//! ```text
//! tenant id ─► NamespaceAssigner ─► Guard ─► AdaptiveClientFactory ─► BoundClient
//!                                     ▲              ▲
//!                                     └─ CapabilityCache ◄─ CapabilityProbe
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod capability;
pub mod client;
pub mod config;
pub mod errors;
pub mod guard;
pub mod lifecycle;
pub mod namespace;
pub mod transport;

pub use capability::CapabilityCache;
pub use capability::CapabilityDetector;
pub use capability::CapabilityProbe;
pub use capability::CapabilitySnapshot;
pub use capability::Clock;
pub use capability::DeploymentMode;
pub use capability::LicenseClass;
pub use capability::ManualClock;
pub use capability::SystemClock;
pub use client::AdaptiveClientFactory;
pub use client::BoundClient;
pub use config::TenancyConfig;
pub use errors::{ErrorCategory, Result, TenancyError};
pub use guard::{FallbackPolicy, Guard, OperationCategory, ResolvedNamespace, policy_for};
pub use lifecycle::{DeletionReport, HealthReport, TenantHealth, TenantInfo, TenantLifecycleManager};
pub use namespace::{NamespaceAssigner, NamespaceId};

use std::sync::Arc;

/// All tenancy components wired from one configuration
pub struct Tenancy {
    config: TenancyConfig,
    transport: Arc<transport::BackendTransport>,
    cache: Arc<CapabilityCache>,
    factory: Arc<AdaptiveClientFactory>,
    guard: Arc<Guard>,
    lifecycle: TenantLifecycleManager,
    assigner: NamespaceAssigner,
}

impl Tenancy {
    /// Build from `TenancyConfig::load()`
    pub fn new() -> Result<Self> {
        Self::with_config(TenancyConfig::load()?)
    }

    /// Build against the live backend described by `config`
    pub fn with_config(config: TenancyConfig) -> Result<Self> {
        let transport = Arc::new(transport::BackendTransport::new(&config.backend)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let assigner = NamespaceAssigner::new(config.namespace.prefix.clone());
        let probe = CapabilityProbe::new(Arc::clone(&transport), Arc::clone(&clock), assigner);
        Ok(Self::assemble(config, transport, Arc::new(probe), clock))
    }

    /// Build with a custom capability source and clock
    pub fn with_detector(
        config: TenancyConfig,
        detector: Arc<dyn CapabilityDetector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let transport = Arc::new(transport::BackendTransport::new(&config.backend)?);
        Ok(Self::assemble(config, transport, detector, clock))
    }

    fn assemble(
        config: TenancyConfig,
        transport: Arc<transport::BackendTransport>,
        detector: Arc<dyn CapabilityDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let assigner = NamespaceAssigner::new(config.namespace.prefix.clone());
        let cache = Arc::new(CapabilityCache::new(
            detector,
            clock,
            config.capabilities.cache_ttl(),
        ));
        let factory = Arc::new(AdaptiveClientFactory::new(
            Arc::clone(&cache),
            Arc::clone(&transport),
            assigner.clone(),
        ));
        let guard = Arc::new(Guard::new(Arc::clone(&cache), assigner.clone()));
        let lifecycle = TenantLifecycleManager::new(
            Arc::clone(&factory),
            Arc::clone(&guard),
            assigner.clone(),
            config.lifecycle.clone(),
        );
        Self {
            config,
            transport,
            cache,
            factory,
            guard,
            lifecycle,
            assigner,
        }
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    pub fn factory(&self) -> &Arc<AdaptiveClientFactory> {
        &self.factory
    }

    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    pub fn lifecycle(&self) -> &TenantLifecycleManager {
        &self.lifecycle
    }

    pub fn assigner(&self) -> &NamespaceAssigner {
        &self.assigner
    }

    /// Current snapshot, probing when none is fresh
    pub async fn get_capabilities(&self) -> Arc<CapabilitySnapshot> {
        self.cache.get().await
    }

    pub async fn refresh_capabilities(&self) -> Arc<CapabilitySnapshot> {
        self.cache.refresh().await
    }

    pub async fn is_multi_tenant_supported(&self) -> bool {
        self.cache.get().await.supports_namespaces()
    }

    /// Client for a request carrying a tenant id or a raw namespace.
    ///
    /// A raw namespace passes the format gate first. The category's fallback
    /// policy decides whether a missing isolation capability degrades or fails.
    pub async fn client_for_request(
        &self,
        category: OperationCategory,
        operation: &str,
        tenant_id: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<BoundClient> {
        let requested = match (namespace, tenant_id) {
            (Some(raw), _) => Some(self.guard.validate_namespace_format(raw)?),
            (None, Some(tenant_id)) => {
                namespace::validate_tenant_id(tenant_id)?;
                Some(self.assigner.assign(tenant_id))
            }
            (None, None) => None,
        };
        let resolved = self
            .guard
            .resolve_namespace(category, operation, requested)
            .await?;
        Ok(self.factory.create_client(Some(resolved.namespace)).await)
    }

    /// Remove all data and schema from a tenant's namespace.
    ///
    /// In multi-tenant mode `confirm_namespace` must equal the tenant's
    /// namespace exactly; nothing is sent otherwise.
    pub async fn drop_all(
        &self,
        tenant_id: &str,
        confirm_namespace: Option<&str>,
    ) -> Result<NamespaceId> {
        namespace::validate_tenant_id(tenant_id)?;
        let target = self.assigner.assign(tenant_id);

        let resolved = self
            .guard
            .resolve_namespace(OperationCategory::Admin, "dropAll", Some(target.clone()))
            .await?;
        self.guard
            .require_destructive_confirmation(&target, confirm_namespace)
            .await?;

        let client = self.factory.create_client(Some(resolved.namespace)).await;
        client::ensure_bound(&client, &target)?;

        tracing::warn!(tenant_id, namespace = %target, "Dropping all data in namespace");
        self.transport.drop_all(&target).await?;
        Ok(target)
    }
}
