//! Tenancy configuration loading
//!
//! Loads configuration from `~/.config/mims/tenancy.toml` (or `MIMS_TENANCY_CONFIG` env).
//! Backend endpoints can additionally be overridden with `DGRAPH_BASE_URL`,
//! `DGRAPH_ADMIN_URL` and `DGRAPH_ZERO_URL`.

use crate::errors::{Result, TenancyError};
use crate::namespace::DEFAULT_NAMESPACE_PREFIX;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Canonical schema pushed into every newly provisioned namespace
const BUNDLED_SCHEMA: &str = include_str!("../schema/default.graphql");

/// Root configuration for the tenancy layer
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TenancyConfig {
    /// Graph backend and coordinator endpoints
    #[serde(default)]
    pub backend: BackendConfig,

    /// Capability detection settings
    #[serde(default)]
    pub capabilities: CapabilityConfig,

    /// Namespace rendering
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Provisioning and teardown settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Backend endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// GraphQL endpoint for data operations
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    /// Base URL for `/health`, `/admin/schema` and `/alter`
    #[serde(default = "default_admin_url")]
    pub admin_url: String,

    /// Coordinator base URL for `/state`; empty disables the license probe
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_graphql_url() -> String {
    "http://localhost:8080/graphql".to_string()
}

fn default_admin_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_coordinator_url() -> String {
    "http://localhost:6080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            admin_url: default_admin_url(),
            coordinator_url: default_coordinator_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Coordinator URL, or `None` when the license probe is disabled
    pub fn coordinator(&self) -> Option<&str> {
        let url = self.coordinator_url.trim();
        (!url.is_empty()).then_some(url)
    }
}

/// Capability detection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CapabilityConfig {
    /// How long a capability snapshot stays valid
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CapabilityConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Namespace rendering configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NamespaceConfig {
    #[serde(default = "default_namespace_prefix")]
    pub prefix: String,
}

fn default_namespace_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_string()
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            prefix: default_namespace_prefix(),
        }
    }
}

/// Tenant provisioning and teardown configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    /// Schema file pushed on tenant creation; the bundled schema when unset
    #[serde(default)]
    pub schema_path: Option<String>,

    /// Retries while waiting for a pushed schema to become queryable
    #[serde(default = "default_schema_poll_attempts")]
    pub schema_poll_attempts: usize,

    /// First backoff delay between schema polls
    #[serde(default = "default_schema_poll_initial_ms")]
    pub schema_poll_initial_ms: u64,

    /// Backoff ceiling between schema polls
    #[serde(default = "default_schema_poll_max_ms")]
    pub schema_poll_max_ms: u64,

    /// Ids per delete mutation during teardown
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Seed default hierarchies into new (non-test) tenants
    #[serde(default = "default_seed_default_hierarchies")]
    pub seed_default_hierarchies: bool,
}

fn default_schema_poll_attempts() -> usize {
    6
}

fn default_schema_poll_initial_ms() -> u64 {
    250
}

fn default_schema_poll_max_ms() -> u64 {
    4_000
}

fn default_delete_batch_size() -> usize {
    100
}

fn default_seed_default_hierarchies() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            schema_poll_attempts: default_schema_poll_attempts(),
            schema_poll_initial_ms: default_schema_poll_initial_ms(),
            schema_poll_max_ms: default_schema_poll_max_ms(),
            delete_batch_size: default_delete_batch_size(),
            seed_default_hierarchies: default_seed_default_hierarchies(),
        }
    }
}

impl LifecycleConfig {
    /// Read the schema to push into new namespaces
    pub fn load_schema(&self) -> Result<String> {
        let Some(path) = &self.schema_path else {
            return Ok(BUNDLED_SCHEMA.to_string());
        };
        let schema = std::fs::read_to_string(path).map_err(|e| {
            TenancyError::config_with_source(format!("failed to read schema at {path}"), e)
        })?;
        if schema.trim().is_empty() {
            return Err(TenancyError::config(format!("schema at {path} is empty")));
        }
        Ok(schema)
    }
}

impl TenancyConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "MIMS_TENANCY_CONFIG";

    /// GraphQL endpoint override
    pub const ENV_GRAPHQL_URL: &'static str = "DGRAPH_BASE_URL";

    /// Admin base URL override
    pub const ENV_ADMIN_URL: &'static str = "DGRAPH_ADMIN_URL";

    /// Coordinator base URL override
    pub const ENV_COORDINATOR_URL: &'static str = "DGRAPH_ZERO_URL";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "tenancy.toml";

    /// Load configuration from file, then apply environment overrides
    ///
    /// Resolution order:
    /// 1. `MIMS_TENANCY_CONFIG` environment variable
    /// 2. `~/.config/mims/tenancy.toml`
    ///
    /// If the config file doesn't exist, defaults are used.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        let mut cfg = if path.exists() {
            Self::read_file(&path)?
        } else {
            tracing::info!(
                path = %path.display(),
                "Tenancy config not found, using defaults"
            );
            Self::default()
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a specific path (no environment overrides)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let cfg = Self::read_file(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: TenancyConfig = toml::from_str(contents)
            .map_err(|e| TenancyError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TenancyError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;
        toml::from_str(&contents)
            .map_err(|e| TenancyError::config_with_source("failed to parse config", e))
    }

    /// Resolve the configuration file path
    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("mims")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Apply endpoint overrides from the environment.
    ///
    /// When only `DGRAPH_BASE_URL` is set, the admin URL is derived from it by
    /// dropping the trailing `/graphql` segment.
    fn apply_env_overrides(&mut self) {
        let graphql = env_non_empty(Self::ENV_GRAPHQL_URL);
        let admin = env_non_empty(Self::ENV_ADMIN_URL);

        if let Some(url) = &graphql {
            self.backend.graphql_url = url.clone();
        }
        match (admin, graphql) {
            (Some(url), _) => self.backend.admin_url = url,
            (None, Some(url)) => {
                self.backend.admin_url = url
                    .trim_end_matches('/')
                    .trim_end_matches("/graphql")
                    .to_string();
            }
            (None, None) => {}
        }
        if let Some(url) = env_non_empty(Self::ENV_COORDINATOR_URL) {
            self.backend.coordinator_url = url;
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        check_url("backend.graphql_url", &self.backend.graphql_url)?;
        check_url("backend.admin_url", &self.backend.admin_url)?;
        if let Some(url) = self.backend.coordinator() {
            check_url("backend.coordinator_url", url)?;
        }

        if self.backend.request_timeout_ms == 0 {
            return Err(TenancyError::config(
                "backend.request_timeout_ms must be greater than zero",
            ));
        }
        if self.namespace.prefix.is_empty() {
            return Err(TenancyError::config("namespace.prefix cannot be empty"));
        }
        if self.lifecycle.schema_poll_attempts == 0 {
            return Err(TenancyError::config(
                "lifecycle.schema_poll_attempts must be at least 1",
            ));
        }
        if self.lifecycle.delete_batch_size == 0 {
            return Err(TenancyError::config(
                "lifecycle.delete_batch_size must be at least 1",
            ));
        }
        if self.lifecycle.schema_poll_initial_ms > self.lifecycle.schema_poll_max_ms {
            tracing::warn!(
                initial_ms = self.lifecycle.schema_poll_initial_ms,
                max_ms = self.lifecycle.schema_poll_max_ms,
                "Schema poll initial delay exceeds the ceiling; every retry will use the ceiling"
            );
        }
        if self.capabilities.cache_ttl_secs == 0 {
            tracing::warn!("Capability cache TTL is zero; every check will re-probe the backend");
        }

        Ok(())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| TenancyError::config_with_source(format!("{field} is not a valid URL"), e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TenancyError::config(format!(
            "{field} must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}
