//! Registered target databases

use querydesk_core::collaborators::DatabaseResolver;
use querydesk_core::{DatabaseRef, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A database SQL Lab can run queries against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub id: i64,
    pub name: String,
    /// Engine name (`postgresql`, `sqlite`, ...)
    pub backend: String,
    /// sqlx connection URL
    pub uri: String,
    /// Users (by id or username) allowed to query; empty allows everyone
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Whether statements other than SELECT may run
    #[serde(default)]
    pub allow_dml: bool,
}

impl DatabaseEntry {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        backend: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            backend: backend.into(),
            uri: uri.into(),
            allowed_users: Vec::new(),
            allow_dml: false,
        }
    }

    pub fn with_allowed_users(mut self, users: &[&str]) -> Self {
        self.allowed_users = users.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn with_allow_dml(mut self, allow_dml: bool) -> Self {
        self.allow_dml = allow_dml;
        self
    }

    pub fn to_ref(&self) -> DatabaseRef {
        DatabaseRef::new(self.id, self.name.clone(), self.backend.clone())
    }
}

/// Lookup of registered databases by id
#[derive(Debug, Clone, Default)]
pub struct DatabaseCatalog {
    entries: HashMap<i64, DatabaseEntry>,
}

impl DatabaseCatalog {
    pub fn new(entries: impl IntoIterator<Item = DatabaseEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    pub fn get(&self, id: i64) -> Option<&DatabaseEntry> {
        self.entries.get(&id)
    }

    /// # Errors
    /// - `Error::InvalidRequest` if no database with `id` is registered
    pub fn database_ref(&self, id: i64) -> Result<DatabaseRef> {
        self.get(id)
            .map(DatabaseEntry::to_ref)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown database id {}", id)))
    }

    pub fn entries(&self) -> impl Iterator<Item = &DatabaseEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DatabaseResolver for DatabaseCatalog {
    fn resolve_database(&self, id: i64) -> Result<DatabaseRef> {
        self.database_ref(id)
    }
}
