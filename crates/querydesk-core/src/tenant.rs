//! Tenant types and principals for multi-tenancy support

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Store key of the process-wide default resource.
///
/// Entities that must always live in the default store (tenant metadata,
/// account tables) report this key from [`Storable::bind_key`].
pub const DEFAULT_BIND_KEY: &str = "default";

/// A persisted entity that may be pinned to a specific store.
///
/// Data-access calls resolve the target store with this precedence:
/// the entity's static key, then the active tenant's key, then the default.
pub trait Storable {
    /// Statically configured store key, if any
    fn bind_key() -> Option<&'static str> {
        None
    }
}

/// Unique identifier of a tenant row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(i64);

impl TenantId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| Error::InvalidRequest(format!("Invalid tenant ID format: {}", e)))
    }
}

/// A logical customer with its own backing data store
///
/// `name` doubles as the tenant's bind key; `db_name` is substituted into the
/// configured connection-string template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub db_name: String,
}

impl Tenant {
    pub fn new(id: i64, name: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(id),
            name: name.into(),
            db_name: db_name.into(),
        }
    }

    /// Key under which this tenant's store is registered
    pub fn store_key(&self) -> &str {
        &self.name
    }
}

impl Storable for Tenant {
    fn bind_key() -> Option<&'static str> {
        Some(DEFAULT_BIND_KEY)
    }
}

/// Mapping between a user and a tenant.
///
/// Routing assumes at most one mapping per user; when several exist the one
/// with the lowest id is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTenant {
    pub id: i64,
    pub user_id: String,
    pub tenant_id: TenantId,
}

impl Storable for UserTenant {
    fn bind_key() -> Option<&'static str> {
        Some(DEFAULT_BIND_KEY)
    }
}

/// The caller a request is handled on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub anonymous: bool,
}

impl Principal {
    /// Create an authenticated principal
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            anonymous: false,
        }
    }

    /// The anonymous caller
    pub fn anonymous() -> Self {
        Self {
            user_id: String::new(),
            username: "anonymous".to_string(),
            anonymous: true,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_from_string() {
        let tenant_id: TenantId = "42".parse().unwrap();
        assert_eq!(tenant_id, TenantId::new(42));
        assert_eq!(tenant_id.to_string(), "42");
    }

    #[test]
    fn test_tenant_id_invalid_string() {
        let result = "not-a-number".parse::<TenantId>();
        assert!(result.is_err());
    }

    #[test]
    fn test_tenant_store_key_is_name() {
        let tenant = Tenant::new(1, "acme", "acme_db");
        assert_eq!(tenant.store_key(), "acme");
    }

    #[test]
    fn test_tenant_metadata_pinned_to_default_store() {
        assert_eq!(<Tenant as Storable>::bind_key(), Some(DEFAULT_BIND_KEY));
        assert_eq!(<UserTenant as Storable>::bind_key(), Some(DEFAULT_BIND_KEY));
    }

    #[test]
    fn test_principal_anonymous() {
        assert!(Principal::anonymous().is_anonymous());
        assert!(!Principal::new("7", "alice").is_anonymous());
    }
}
