//! Request-scoped data sessions
//!
//! A request runs against exactly one active resource: the default store or a
//! single tenant-bound session. [`RequestScope`] owns that choice for the
//! duration of the request and puts the default back exactly once, either
//! through the router's after hook or, failing that, when it is dropped.

use querydesk_core::{DEFAULT_BIND_KEY, Error, Result, Storable, Tenant};
use sqlx::AnyPool;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::bind_registry::{BindRegistry, BindTarget};
use crate::query_store::SqlQueryStore;

/// A tenant-bound handle on a shared pool
///
/// Once released the session refuses to hand out its pool.
#[derive(Debug)]
pub struct DataSession {
    target: Arc<BindTarget>,
    released: AtomicBool,
}

impl DataSession {
    pub fn new(target: Arc<BindTarget>) -> Self {
        Self {
            target,
            released: AtomicBool::new(false),
        }
    }

    pub fn bind_key(&self) -> &str {
        self.target.key()
    }

    /// # Errors
    /// - `Error::Internal` if the session was already released
    /// - `Error::Database` if the pool cannot be created
    pub fn pool(&self) -> Result<AnyPool> {
        if self.is_released() {
            return Err(Error::Internal(format!(
                "Session for bind '{}' has been released",
                self.bind_key()
            )));
        }
        self.target.pool()
    }

    /// Release the session; returns `false` if it was already released
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Resource a request is currently bound to
#[derive(Debug, Clone)]
pub enum ActiveResource {
    Default,
    Tenant {
        tenant: Tenant,
        session: Arc<DataSession>,
    },
}

#[derive(Debug)]
struct ScopeState {
    registry: Arc<BindRegistry>,
    active: RwLock<ActiveResource>,
}

/// Cloneable view of a request's active resource, handed to request handlers
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<ScopeState>,
}

impl SessionHandle {
    fn active(&self) -> RwLockReadGuard<'_, ActiveResource> {
        self.state
            .active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_tenant_bound(&self) -> bool {
        matches!(*self.active(), ActiveResource::Tenant { .. })
    }

    /// Tenant the request is bound to, if any
    pub fn tenant(&self) -> Option<Tenant> {
        match &*self.active() {
            ActiveResource::Tenant { tenant, .. } => Some(tenant.clone()),
            ActiveResource::Default => None,
        }
    }

    /// Bind key of the tenant store, `None` on the default store
    pub fn store_key(&self) -> Option<String> {
        match &*self.active() {
            ActiveResource::Tenant { session, .. } => Some(session.bind_key().to_string()),
            ActiveResource::Default => None,
        }
    }

    /// Bind key used for storing entities of type `E`
    ///
    /// A statically configured key wins, then the active tenant, then the
    /// default store.
    pub fn bind_key_for<E: Storable>(&self) -> String {
        match E::bind_key() {
            Some(key) => key.to_string(),
            None => self
                .store_key()
                .unwrap_or_else(|| DEFAULT_BIND_KEY.to_string()),
        }
    }

    /// Pool used for storing entities of type `E`
    ///
    /// # Errors
    /// - `Error::Config` if the statically configured key is not registered
    /// - `Error::Internal` if the tenant session was already released
    pub fn engine_for<E: Storable>(&self) -> Result<AnyPool> {
        if E::bind_key().is_none()
            && let ActiveResource::Tenant { session, .. } = &*self.active()
        {
            return session.pool();
        }

        let key = self.bind_key_for::<E>();
        self.state
            .registry
            .get(&key)
            .ok_or_else(|| Error::Config(format!("No bind registered for key '{}'", key)))?
            .pool()
    }

    /// Query store on the request's active resource
    ///
    /// A tenant-bound store shares the request's session and fails once the
    /// session is released.
    pub fn query_store(&self) -> Result<SqlQueryStore> {
        if let ActiveResource::Tenant { session, .. } = &*self.active() {
            return SqlQueryStore::for_session(Arc::clone(session));
        }
        Ok(SqlQueryStore::new(
            self.engine_for::<querydesk_core::Query>()?,
        ))
    }
}

/// Owner of a request's active resource
///
/// Dereferences to the [`SessionHandle`] shared with handlers.
#[derive(Debug)]
pub struct RequestScope {
    handle: SessionHandle,
    restored: bool,
}

impl RequestScope {
    pub(crate) fn new(registry: Arc<BindRegistry>, active: ActiveResource) -> Self {
        Self {
            handle: SessionHandle {
                state: Arc::new(ScopeState {
                    registry,
                    active: RwLock::new(active),
                }),
            },
            restored: false,
        }
    }

    /// Handle to insert into the request for downstream handlers
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Put the default resource back; runs at most once per scope
    ///
    /// Returns `true` if a tenant session was released.
    pub(crate) fn restore_default(&mut self) -> bool {
        if self.restored {
            return false;
        }
        self.restored = true;

        let previous = {
            let mut active = self
                .handle
                .state
                .active
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *active, ActiveResource::Default)
        };

        match previous {
            ActiveResource::Tenant { tenant, session } => {
                session.release();
                debug!(tenant = %tenant.name, "Released tenant session");
                true
            }
            ActiveResource::Default => false,
        }
    }
}

impl Deref for RequestScope {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if !self.restored && self.restore_default() {
            warn!("Default store restored outside the after-handling hook");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use querydesk_core::{Query, QueryId, QueryStore, UserTenant};

    fn registry() -> Arc<BindRegistry> {
        Arc::new(BindRegistry::new("sqlite::memory:", PoolConfig::default()))
    }

    fn tenant_scope(registry: &Arc<BindRegistry>) -> RequestScope {
        let tenant = Tenant::new(1, "acme", "acme_db");
        let target = registry.upsert(tenant.store_key(), "sqlite::memory:");
        RequestScope::new(
            Arc::clone(registry),
            ActiveResource::Tenant {
                tenant,
                session: Arc::new(DataSession::new(target)),
            },
        )
    }

    struct AuditEntry;

    impl Storable for AuditEntry {
        fn bind_key() -> Option<&'static str> {
            Some("audit")
        }
    }

    #[test]
    fn test_default_scope_uses_default_key() {
        let scope = RequestScope::new(registry(), ActiveResource::Default);
        assert!(!scope.is_tenant_bound());
        assert_eq!(scope.store_key(), None);
        assert_eq!(scope.bind_key_for::<Query>(), DEFAULT_BIND_KEY);
    }

    #[test]
    fn test_binding_precedence() {
        let registry = registry();
        let scope = tenant_scope(&registry);

        // Unpinned entities follow the tenant
        assert_eq!(scope.bind_key_for::<Query>(), "acme");
        // Pinned entities keep their static key
        assert_eq!(scope.bind_key_for::<UserTenant>(), DEFAULT_BIND_KEY);
        assert_eq!(scope.bind_key_for::<AuditEntry>(), "audit");
    }

    #[tokio::test]
    async fn test_unregistered_static_key_is_config_error() {
        let scope = RequestScope::new(registry(), ActiveResource::Default);
        let err = scope.engine_for::<AuditEntry>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_restore_runs_once() {
        let registry = registry();
        let mut scope = tenant_scope(&registry);

        assert!(scope.restore_default());
        assert!(!scope.restore_default());
        assert!(scope.is_restored());
        assert!(!scope.is_tenant_bound());
    }

    #[tokio::test]
    async fn test_handle_observes_restore() {
        let registry = registry();
        let mut scope = tenant_scope(&registry);
        let handle = scope.handle();

        assert_eq!(handle.store_key().as_deref(), Some("acme"));
        scope.restore_default();
        assert_eq!(handle.store_key(), None);
        assert_eq!(handle.bind_key_for::<Query>(), DEFAULT_BIND_KEY);
    }

    #[tokio::test]
    async fn test_drop_restores_default() {
        let registry = registry();
        let scope = tenant_scope(&registry);
        let handle = scope.handle();

        drop(scope);
        assert!(!handle.is_tenant_bound());
    }

    #[tokio::test]
    async fn test_released_session_refuses_pool() {
        let registry = registry();
        let session = DataSession::new(registry.upsert("acme", "sqlite::memory:"));

        assert!(session.pool().is_ok());
        assert!(session.release());
        assert!(!session.release());
        assert!(matches!(session.pool(), Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_store_issued_before_restore_stops_working() {
        let registry = registry();
        let mut scope = tenant_scope(&registry);
        let store = scope.query_store().unwrap();
        assert!(store.pool().is_ok());

        scope.restore_default();
        assert!(matches!(store.pool(), Err(Error::Internal(_))));
        let err = store.get_query(QueryId::new(1)).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        // The handle itself falls back to the default store
        assert!(scope.query_store().unwrap().pool().is_ok());
    }
}
