//! Tenant provisioning, health and teardown
//!
//! A tenant moves `absent → provisioning → healthy | degraded | error →
//! deleting → absent`, and only through the explicit operations below.
//! Nothing here runs in the background.

mod health;
mod seed;
mod teardown;

pub use health::CORE_TYPES;
pub use health::HealthReport;
pub use health::TenantHealth;
pub use seed::DEFAULT_HIERARCHIES;
pub use seed::SeedHierarchy;
pub use seed::SeedLevel;
pub use teardown::DeletionReport;
pub use teardown::StepOutcome;
pub use teardown::teardown_order;

use crate::client::{AdaptiveClientFactory, BoundClient, ensure_bound};
use crate::config::LifecycleConfig;
use crate::errors::{ErrorCategory, Result, TenancyError};
use crate::guard::{Guard, OperationCategory};
use crate::namespace::{
    DEFAULT_TENANT_ID, NamespaceAssigner, NamespaceId, TEST_TENANT_ID, is_reserved_tenant,
    validate_tenant_id,
};
use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const NODE_COUNT_QUERY: &str = "query { aggregateNode { count } }";

/// Tenant view recomputed on every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantInfo {
    pub tenant_id: String,
    pub namespace: NamespaceId,
    pub health: TenantHealth,
    pub node_count: Option<u64>,
    pub schema_id: Option<String>,
    pub is_reserved_tenant: bool,
    pub detail: Option<String>,
}

pub struct TenantLifecycleManager {
    factory: Arc<AdaptiveClientFactory>,
    guard: Arc<Guard>,
    assigner: NamespaceAssigner,
    config: LifecycleConfig,
    /// namespace → tenant id, for tenants known to this process
    registry: Mutex<BTreeMap<NamespaceId, String>>,
    /// Serializes concurrent creates of the same tenant
    creation_locks: Mutex<CreationLocks>,
}

type CreationLocks = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// One create's share of a per-tenant lock. The map entry goes away with the
/// last lease, including when the create future is dropped.
struct CreationLease<'a> {
    locks: &'a Mutex<CreationLocks>,
    tenant_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for CreationLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Held by the map and by this lease only.
        let last = locks
            .get(&self.tenant_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if last {
            locks.remove(&self.tenant_id);
        }
    }
}

impl TenantLifecycleManager {
    pub fn new(
        factory: Arc<AdaptiveClientFactory>,
        guard: Arc<Guard>,
        assigner: NamespaceAssigner,
        config: LifecycleConfig,
    ) -> Self {
        let registry: BTreeMap<NamespaceId, String> = [DEFAULT_TENANT_ID, TEST_TENANT_ID]
            .into_iter()
            .map(|id| (assigner.assign(id), id.to_string()))
            .collect();
        Self {
            factory,
            guard,
            assigner,
            config,
            registry: Mutex::new(registry),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Provisioning
    // ─────────────────────────────────────────────────────────────────────────

    /// Provision a tenant and return its namespace.
    ///
    /// Schema push, schema verification and seeding must all succeed; the
    /// first failure aborts and is returned as is.
    pub async fn create_tenant(&self, tenant_id: &str) -> Result<NamespaceId> {
        validate_tenant_id(tenant_id)?;

        let lease = self.creation_lease(tenant_id);
        let _held = lease.lock.lock().await;

        let namespace = self.assigner.assign(tenant_id);
        let claimed = self.claim(tenant_id, &namespace)?;

        tracing::info!(tenant_id, namespace = %namespace, "Provisioning tenant");
        let result = self.provision(tenant_id, &namespace).await;
        match &result {
            Ok(()) => {
                tracing::info!(tenant_id, namespace = %namespace, "Tenant provisioned");
            }
            Err(err) => {
                tracing::warn!(
                    tenant_id,
                    namespace = %namespace,
                    error = %err,
                    category = err.category().as_str(),
                    "Tenant provisioning failed"
                );
                if claimed {
                    self.release(&namespace);
                }
            }
        }
        result.map(|()| namespace)
    }

    async fn provision(&self, tenant_id: &str, namespace: &NamespaceId) -> Result<()> {
        let resolved = self
            .guard
            .resolve_namespace(
                OperationCategory::Create,
                "createTenant",
                Some(namespace.clone()),
            )
            .await?;

        let client = self.factory.create_client(Some(resolved.namespace)).await;
        ensure_bound(&client, namespace)?;

        let schema = self.config.load_schema()?;
        client
            .transport()
            .push_schema(namespace, &schema)
            .await
            .map_err(|e| {
                TenancyError::schema_with_source(format!("schema push into {namespace} failed"), e)
            })?;
        tracing::info!(namespace = %namespace, "Schema pushed");

        self.wait_for_schema(&client).await?;
        tracing::info!(namespace = %namespace, "Schema verified");

        if tenant_id == TEST_TENANT_ID || !self.config.seed_default_hierarchies {
            tracing::debug!(tenant_id, "Skipping default hierarchy seeding");
            return Ok(());
        }
        seed::seed_defaults(&client, DEFAULT_HIERARCHIES).await?;
        Ok(())
    }

    /// Poll until a query that needs the pushed schema succeeds.
    async fn wait_for_schema(&self, client: &BoundClient) -> Result<()> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.config.schema_poll_initial_ms))
            .with_max_delay(Duration::from_millis(self.config.schema_poll_max_ms))
            .with_max_times(self.config.schema_poll_attempts);

        (|| async { client.execute(health::TRIAL_READ_QUERY, None).await })
            .retry(backoff)
            // The backend answers with GraphQL errors until the schema is live;
            // transport failures are not retried.
            .when(|err: &TenancyError| err.category() == ErrorCategory::BackendError)
            .notify(|err: &TenancyError, delay: Duration| {
                tracing::debug!(
                    namespace = %client.namespace(),
                    error = %err,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Schema not queryable yet"
                );
            })
            .await
            .map(|_| ())
            .map_err(|e| {
                TenancyError::schema_with_source(
                    format!("schema in {} did not become queryable", client.namespace()),
                    e,
                )
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete all tenant data in dependency order.
    ///
    /// Reserved tenants are refused before anything is sent. Individual step
    /// failures are recorded in the report and do not stop later steps.
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<DeletionReport> {
        if is_reserved_tenant(tenant_id) {
            tracing::warn!(tenant_id, "Refusing to delete reserved tenant");
            return Err(TenancyError::ReservedTenant {
                tenant_id: tenant_id.to_string(),
                action: "deleted",
            });
        }
        validate_tenant_id(tenant_id)?;

        let namespace = self.assigner.assign(tenant_id);
        let resolved = self
            .guard
            .resolve_namespace(
                OperationCategory::Admin,
                "deleteTenant",
                Some(namespace.clone()),
            )
            .await?;

        let client = self.factory.create_client(Some(resolved.namespace)).await;
        ensure_bound(&client, &namespace)?;

        tracing::info!(tenant_id, namespace = %namespace, "Deleting tenant data");
        let steps = teardown::delete_all_entities(&client, self.config.delete_batch_size).await;
        let report = DeletionReport {
            tenant_id: tenant_id.to_string(),
            namespace,
            steps,
        };

        if report.is_complete() {
            self.forget(tenant_id);
            tracing::info!(
                tenant_id,
                deleted = report.total_deleted(),
                "Tenant deleted"
            );
        } else {
            tracing::warn!(
                tenant_id,
                failed = ?report.failed_steps(),
                "Tenant deletion incomplete"
            );
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Diagnose a tenant. Never fails.
    pub async fn health_check(&self, tenant_id: &str) -> HealthReport {
        self.diagnose(tenant_id).await.1
    }

    /// Namespace, health and, for healthy tenants, best-effort enrichment
    pub async fn get_tenant_info(&self, tenant_id: &str) -> TenantInfo {
        let namespace = self.assigner.assign(tenant_id);
        let (client, report) = self.diagnose(tenant_id).await;

        let mut info = TenantInfo {
            tenant_id: tenant_id.to_string(),
            namespace,
            health: report.state,
            node_count: None,
            schema_id: None,
            is_reserved_tenant: is_reserved_tenant(tenant_id),
            detail: report.detail,
        };

        if let (TenantHealth::Healthy, Some(client)) = (info.health, client) {
            info.node_count = node_count(&client).await;
            info.schema_id = schema_id(&client).await;
        }
        info
    }

    /// Reserved tenants always exist; others must be usable.
    pub async fn tenant_exists(&self, tenant_id: &str) -> bool {
        if is_reserved_tenant(tenant_id) {
            return true;
        }
        self.health_check(tenant_id).await.state.is_usable()
    }

    /// Reserved tenants plus tenants provisioned by this manager
    pub async fn list_tenants(&self) -> Vec<TenantInfo> {
        let tenant_ids = self.known_tenants();
        futures::future::join_all(tenant_ids.iter().map(|id| self.get_tenant_info(id))).await
    }

    /// Tenant ids known to this manager, sorted
    pub fn known_tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry().values().cloned().collect();
        ids.sort();
        ids
    }

    async fn diagnose(&self, tenant_id: &str) -> (Option<BoundClient>, HealthReport) {
        if let Err(err) = validate_tenant_id(tenant_id) {
            return (
                None,
                HealthReport {
                    state: TenantHealth::Error,
                    detail: Some(err.to_string()),
                },
            );
        }
        let client = self.factory.create_client_from_tenant(tenant_id).await;
        let report = health::diagnose(&client).await;
        tracing::debug!(
            tenant_id,
            namespace = %client.namespace(),
            state = report.state.as_str(),
            "Tenant health checked"
        );
        (Some(client), report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────

    fn registry(&self) -> MutexGuard<'_, BTreeMap<NamespaceId, String>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn creation_lease(&self, tenant_id: &str) -> CreationLease<'_> {
        let mut locks = self
            .creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(tenant_id.to_string()).or_default());
        CreationLease {
            locks: &self.creation_locks,
            tenant_id: tenant_id.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    fn pending_creations(&self) -> usize {
        self.creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Record the namespace for `tenant_id`. Returns whether this call added it.
    fn claim(&self, tenant_id: &str, namespace: &NamespaceId) -> Result<bool> {
        let mut registry = self.registry();
        match registry.get(namespace) {
            Some(existing) if existing == tenant_id => Ok(false),
            Some(existing) => {
                tracing::error!(
                    tenant_id,
                    existing_tenant = %existing,
                    namespace = %namespace,
                    "Namespace collision between tenants"
                );
                Err(TenancyError::NamespaceCollision {
                    namespace: namespace.to_string(),
                    tenant_id: tenant_id.to_string(),
                    existing_tenant: existing.clone(),
                })
            }
            None => {
                registry.insert(namespace.clone(), tenant_id.to_string());
                Ok(true)
            }
        }
    }

    fn release(&self, namespace: &NamespaceId) {
        self.registry().remove(namespace);
    }

    fn forget(&self, tenant_id: &str) {
        self.registry().retain(|_, id| id != tenant_id);
    }
}

async fn node_count(client: &BoundClient) -> Option<u64> {
    match client.execute(NODE_COUNT_QUERY, None).await {
        Ok(data) => data.pointer("/aggregateNode/count").and_then(Value::as_u64),
        Err(err) => {
            tracing::debug!(error = %err, "Node count unavailable");
            None
        }
    }
}

async fn schema_id(client: &BoundClient) -> Option<String> {
    match client.transport().fetch_schema(client.namespace()).await {
        Ok(body) => ["/data/getGQLSchema/id", "/id"]
            .iter()
            .find_map(|ptr| body.pointer(ptr).and_then(Value::as_str))
            .map(str::to_string),
        Err(err) => {
            tracing::debug!(error = %err, "Schema identity unavailable");
            None
        }
    }
}
