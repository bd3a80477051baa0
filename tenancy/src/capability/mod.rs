//! Backend capability detection
//!
//! The probe answers three questions about the live backend: are enterprise
//! features active, does namespace isolation actually work, and what license
//! is installed. The cache keeps the answer for a bounded time so request
//! paths do not probe on every call.

mod cache;
mod probe;

pub use cache::CapabilityCache;
pub use cache::Clock;
pub use cache::ManualClock;
pub use cache::SystemClock;
pub use probe::CapabilityDetector;
pub use probe::CapabilityProbe;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Version string used when the backend does not report one
pub const UNKNOWN_VERSION: &str = "unknown";

/// License classification read from the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseClass {
    Unlicensed,
    Trial,
    Licensed,
    Unknown,
}

impl LicenseClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlicensed => "unlicensed",
            Self::Trial => "trial",
            Self::Licensed => "licensed",
            Self::Unknown => "unknown",
        }
    }
}

/// Operating mode derived from a capability snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    OssSingleTenant,
    EnterpriseSingleTenant,
    EnterpriseMultiTenant,
}

impl DeploymentMode {
    pub fn from_flags(enterprise_detected: bool, isolation_confirmed: bool) -> Self {
        match (enterprise_detected, isolation_confirmed) {
            (true, true) => Self::EnterpriseMultiTenant,
            (true, false) => Self::EnterpriseSingleTenant,
            // Isolation without enterprise cannot be confirmed by the probe.
            (false, _) => Self::OssSingleTenant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OssSingleTenant => "oss-single-tenant",
            Self::EnterpriseSingleTenant => "enterprise-single-tenant",
            Self::EnterpriseMultiTenant => "enterprise-multi-tenant",
        }
    }

    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, Self::EnterpriseMultiTenant)
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of what the backend supports. Never mutated; a refresh
/// replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySnapshot {
    pub enterprise_detected: bool,
    pub namespace_isolation_confirmed: bool,
    pub license_class: LicenseClass,
    pub license_expiry: Option<DateTime<Utc>>,
    pub backend_version: String,
    pub detected_at: DateTime<Utc>,
    pub probe_error: Option<String>,
    /// Enterprise feature names reported by `/health`
    pub enterprise_features: Vec<String>,
}

impl CapabilitySnapshot {
    /// The safe snapshot: nothing enterprise, reason recorded
    pub fn unavailable(reason: impl Into<String>, detected_at: DateTime<Utc>) -> Self {
        Self {
            enterprise_detected: false,
            namespace_isolation_confirmed: false,
            license_class: LicenseClass::Unknown,
            license_expiry: None,
            backend_version: UNKNOWN_VERSION.to_string(),
            detected_at,
            probe_error: Some(reason.into()),
            enterprise_features: Vec::new(),
        }
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        DeploymentMode::from_flags(self.enterprise_detected, self.namespace_isolation_confirmed)
    }

    /// Whether non-default namespaces can be used
    pub fn supports_namespaces(&self) -> bool {
        self.enterprise_detected && self.namespace_isolation_confirmed
    }

    /// One-line summary for error context and logs
    pub fn describe(&self) -> String {
        let mut out = format!(
            "mode={} license={} version={} detected_at={}",
            self.deployment_mode(),
            self.license_class.as_str(),
            self.backend_version,
            self.detected_at.to_rfc3339(),
        );
        if !self.enterprise_features.is_empty() {
            out.push_str(&format!(" features=[{}]", self.enterprise_features.join(",")));
        }
        if let Some(err) = &self.probe_error {
            out.push_str(&format!(" probe_error=\"{err}\""));
        }
        out
    }
}
