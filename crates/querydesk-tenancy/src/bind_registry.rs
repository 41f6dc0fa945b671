//! Process-wide registry of store bindings
//!
//! Maps a bind key (the default key, a statically configured key, or a tenant
//! name) to a connection target. Entries are only ever added: the first
//! registration for a key wins and later registrations are no-ops.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use querydesk_core::{DEFAULT_BIND_KEY, Error, Result};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use tracing::{debug, info};

use crate::pool::PoolConfig;

static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
}

/// A connection target registered under a bind key
///
/// The pool is created on first use so that registering a tenant never
/// touches the network.
#[derive(Debug)]
pub struct BindTarget {
    key: String,
    url: String,
    config: PoolConfig,
    pool: OnceCell<AnyPool>,
}

impl BindTarget {
    pub fn new(key: impl Into<String>, url: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            config,
            pool: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the pool has been created yet
    pub fn is_connected(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Connection pool for this target, created lazily
    ///
    /// # Errors
    /// - `Error::Database` if the connection URL cannot be parsed
    pub fn pool(&self) -> Result<AnyPool> {
        self.pool
            .get_or_try_init(|| {
                install_drivers();
                debug!(bind_key = %self.key, "Creating connection pool");
                AnyPoolOptions::new()
                    .max_connections(self.config.max_connections)
                    .min_connections(self.config.min_connections)
                    .acquire_timeout(self.config.acquire_timeout)
                    .idle_timeout(Some(self.config.idle_timeout))
                    .max_lifetime(Some(self.config.max_lifetime))
                    .connect_lazy(&self.url)
                    .map_err(|e| {
                        Error::Database(format!(
                            "Failed to create pool for bind '{}': {}",
                            self.key, e
                        ))
                    })
            })
            .cloned()
    }
}

/// Append-only map of bind key to connection target
#[derive(Debug)]
pub struct BindRegistry {
    binds: DashMap<String, Arc<BindTarget>>,
    config: PoolConfig,
}

impl BindRegistry {
    /// Create a registry whose default bind points at `default_url`
    pub fn new(default_url: impl Into<String>, config: PoolConfig) -> Self {
        let registry = Self {
            binds: DashMap::new(),
            config,
        };
        registry.upsert(DEFAULT_BIND_KEY, default_url);
        registry
    }

    /// Create a registry pre-seeded with statically configured binds
    pub fn with_binds(
        default_url: impl Into<String>,
        binds: &HashMap<String, String>,
        config: PoolConfig,
    ) -> Self {
        let registry = Self::new(default_url, config);
        for (key, url) in binds {
            registry.upsert(key, url.clone());
        }
        registry
    }

    /// Register `url` under `key` unless the key is already present
    ///
    /// Returns the target registered under `key`, which is the existing one
    /// when the key was seen before.
    pub fn upsert(&self, key: &str, url: impl Into<String>) -> Arc<BindTarget> {
        if let Some(existing) = self.binds.get(key) {
            return Arc::clone(existing.value());
        }

        let entry = self.binds.entry(key.to_string()).or_insert_with(|| {
            info!(bind_key = %key, "Registering bind");
            Arc::new(BindTarget::new(key, url, self.config.clone()))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &str) -> Option<Arc<BindTarget>> {
        self.binds.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.binds.contains_key(key)
    }

    /// The default target, present for the lifetime of the registry
    pub fn default_target(&self) -> Result<Arc<BindTarget>> {
        self.get(DEFAULT_BIND_KEY)
            .ok_or_else(|| Error::Internal("Default bind is not registered".to_string()))
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.binds.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }
}
