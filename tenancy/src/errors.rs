//! Tenancy error types
//!
//! Four families matter to callers and stay distinguishable:
//! transport failures (backend unreachable), capability failures (a guard
//! refused the operation), validation failures (rejected before any network
//! call) and logical backend failures (reachable, but the request was
//! rejected). The remaining variants cover provisioning and configuration.

use crate::capability::DeploymentMode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TenancyError>;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network unreachable, timeout, non-2xx status
    TransportError,
    /// A guard gate refused the operation
    CapabilityError,
    /// Malformed input rejected before reaching the backend
    ValidationError,
    /// 2xx response carrying an `errors` array
    BackendError,
    /// Schema push or verification failed
    SchemaError,
    /// Default hierarchy seeding failed
    SeedError,
    /// Configuration missing or malformed
    ConfigError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "TRANSPORT_ERROR",
            Self::CapabilityError => "CAPABILITY_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::BackendError => "BACKEND_ERROR",
            Self::SchemaError => "SCHEMA_ERROR",
            Self::SeedError => "SEED_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }

    /// Whether the failure happened before anything was sent to the backend
    pub fn rejected_locally(&self) -> bool {
        matches!(
            self,
            Self::CapabilityError | Self::ValidationError | Self::ConfigError
        )
    }
}

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status when a response was received at all
        status: Option<u16>,
        /// Enterprise guidance, attached for namespace-bound requests
        remediation: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("enterprise feature unavailable for '{operation}' (mode: {mode}): {remediation}")]
    EnterpriseFeatureUnavailable {
        operation: String,
        mode: DeploymentMode,
        remediation: String,
        /// Deployment diagnostics, attached under the fail-with-context policy
        diagnostics: Option<String>,
    },

    #[error(
        "namespace confirmation mismatch: operation targets '{}', confirmation was '{}'",
        .expected,
        .provided.as_deref().unwrap_or("<none>")
    )]
    NamespaceConfirmation {
        expected: String,
        provided: Option<String>,
    },

    #[error("client bound to namespace '{bound}' but operation targets '{expected}'")]
    NamespaceMismatch { expected: String, bound: String },

    #[error("invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("invalid tenant id '{tenant_id}': {reason}")]
    InvalidTenant { tenant_id: String, reason: String },

    #[error("tenant '{tenant_id}' is reserved and cannot be {action}")]
    ReservedTenant {
        tenant_id: String,
        action: &'static str,
    },

    #[error(
        "namespace {namespace} is already assigned to tenant '{existing_tenant}', refusing to share it with '{tenant_id}'"
    )]
    NamespaceCollision {
        namespace: String,
        tenant_id: String,
        existing_tenant: String,
    },

    #[error("backend rejected the operation: {message}")]
    Backend {
        message: String,
        errors: Vec<serde_json::Value>,
    },

    #[error("schema error: {message}")]
    Schema {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("seed error: {message}")]
    Seed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TenancyError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } => ErrorCategory::TransportError,
            Self::EnterpriseFeatureUnavailable { .. }
            | Self::NamespaceConfirmation { .. }
            | Self::NamespaceMismatch { .. }
            | Self::NamespaceCollision { .. } => ErrorCategory::CapabilityError,
            Self::InvalidNamespace { .. }
            | Self::InvalidTenant { .. }
            | Self::ReservedTenant { .. } => ErrorCategory::ValidationError,
            Self::Backend { .. } => ErrorCategory::BackendError,
            Self::Schema { .. } => ErrorCategory::SchemaError,
            Self::Seed { .. } => ErrorCategory::SeedError,
            Self::Config { .. } => ErrorCategory::ConfigError,
        }
    }

    /// Create a transport error without a response
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            remediation: None,
            source: None,
        }
    }

    /// Create a transport error from a failed request
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            remediation: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error for a non-success HTTP status
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
            remediation: None,
            source: None,
        }
    }

    /// Create a logical backend error from a GraphQL `errors` array
    pub fn backend(errors: Vec<serde_json::Value>) -> Self {
        let message = errors
            .iter()
            .map(|e| {
                e.get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string())
            })
            .collect::<Vec<_>>()
            .join("; ");
        Self::Backend { message, errors }
    }

    pub fn invalid_namespace(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNamespace {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_tenant(tenant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTenant {
            tenant_id: tenant_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            source: None,
        }
    }

    /// Create a schema error with source
    pub fn schema_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Schema {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a seed error
    pub fn seed(message: impl Into<String>) -> Self {
        Self::Seed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a seed error with source
    pub fn seed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Seed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// HTTP status of a transport failure, if a response arrived
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Remediation text carried by transport or capability failures
    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::Transport { remediation, .. } => remediation.as_deref(),
            Self::EnterpriseFeatureUnavailable { remediation, .. } => Some(remediation),
            _ => None,
        }
    }
}
