//! Tenant → namespace assignment
//!
//! Namespaces are opaque hex tokens (`0x0`, `0x1`, `0xd43ef`, ...). Two are
//! reserved: the default namespace (`0x0`) used by the `default` tenant and
//! whenever isolation is unavailable, and the test namespace (`0x1`) used by
//! the `test-tenant` integration harness.
//!
//! Every other tenant maps to `prefix + hex((u32(sha256(id)[..4]) % 1_000_000) + 2)`.
//! The reduction keeps namespaces small and dense but admits collisions with
//! probability ~1/1,000,000 for any pair of distinct tenant ids. Collisions
//! are detected at provisioning time (see `TenantLifecycleManager`) rather
//! than designed away here.

use crate::errors::{Result, TenancyError};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Tenant id that always maps to the default namespace
pub const DEFAULT_TENANT_ID: &str = "default";

/// Tenant id reserved for the integration harness
pub const TEST_TENANT_ID: &str = "test-tenant";

/// Prefix used when no other prefix is configured
pub const DEFAULT_NAMESPACE_PREFIX: &str = "0x";

/// Number of hashed namespace slots
pub const NAMESPACE_CAPACITY: u32 = 1_000_000;

/// Hashed slots start after the two reserved low values
pub const NAMESPACE_OFFSET: u32 = 2;

/// Backend namespaces are u64, so at most 16 hex digits
const MAX_NAMESPACE_DIGITS: usize = 16;

const MAX_TENANT_ID_LEN: usize = 128;

const FORBIDDEN_TENANT_CHARS: [char; 8] = [' ', '\t', '\n', '\r', '/', '\\', '?', '#'];

/// Opaque namespace token.
///
/// Only produced by [`NamespaceAssigner`], either by assignment or by parsing
/// externally supplied strings through the format gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NamespaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for NamespaceId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NamespaceId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Deterministic tenant → namespace mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceAssigner {
    prefix: String,
}

impl Default for NamespaceAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_PREFIX)
    }
}

impl NamespaceAssigner {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The reserved default namespace
    pub fn default_namespace(&self) -> NamespaceId {
        self.render(0)
    }

    /// The reserved test namespace
    pub fn test_namespace(&self) -> NamespaceId {
        self.render(1)
    }

    pub fn is_default(&self, namespace: &NamespaceId) -> bool {
        *namespace == self.default_namespace()
    }

    /// Map a tenant id to its namespace. Pure and total.
    pub fn assign(&self, tenant_id: &str) -> NamespaceId {
        match tenant_id {
            TEST_TENANT_ID => self.test_namespace(),
            DEFAULT_TENANT_ID => self.default_namespace(),
            other => self.render(u64::from(namespace_slot(other))),
        }
    }

    /// Namespace-format gate for externally supplied strings.
    ///
    /// Accepts `prefix` followed by 1..=16 hex digits in either case and
    /// normalizes to lowercase.
    pub fn parse(&self, raw: &str) -> Result<NamespaceId> {
        let Some(digits) = raw.strip_prefix(self.prefix.as_str()) else {
            return Err(TenancyError::invalid_namespace(
                raw,
                format!("expected prefix '{}'", self.prefix),
            ));
        };
        if digits.is_empty() {
            return Err(TenancyError::invalid_namespace(
                raw,
                "missing hex digits after prefix",
            ));
        }
        if digits.len() > MAX_NAMESPACE_DIGITS {
            return Err(TenancyError::invalid_namespace(
                raw,
                format!("more than {MAX_NAMESPACE_DIGITS} hex digits"),
            ));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TenancyError::invalid_namespace(
                raw,
                "only hexadecimal digits may follow the prefix",
            ));
        }
        Ok(NamespaceId(format!(
            "{}{}",
            self.prefix,
            digits.to_ascii_lowercase()
        )))
    }

    fn render(&self, slot: u64) -> NamespaceId {
        NamespaceId(format!("{}{slot:x}", self.prefix))
    }
}

/// Hashed slot for a non-reserved tenant id, in `[2, 1_000_002)`.
pub fn namespace_slot(tenant_id: &str) -> u32 {
    let digest = Sha256::digest(tenant_id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % NAMESPACE_CAPACITY + NAMESPACE_OFFSET
}

/// Whether lifecycle operations must never delete this tenant
pub fn is_reserved_tenant(tenant_id: &str) -> bool {
    tenant_id == DEFAULT_TENANT_ID || tenant_id == TEST_TENANT_ID
}

/// Reject tenant ids that cannot travel safely in headers, paths and logs.
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() {
        return Err(TenancyError::invalid_tenant(tenant_id, "cannot be empty"));
    }
    if tenant_id.chars().count() > MAX_TENANT_ID_LEN {
        return Err(TenancyError::invalid_tenant(
            tenant_id,
            format!("longer than {MAX_TENANT_ID_LEN} characters"),
        ));
    }
    if let Some(c) = tenant_id.chars().find(|c| FORBIDDEN_TENANT_CHARS.contains(c)) {
        return Err(TenancyError::invalid_tenant(
            tenant_id,
            format!("cannot contain {c:?}"),
        ));
    }
    Ok(())
}
