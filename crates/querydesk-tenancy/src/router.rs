//! Tenant session router
//!
//! Decides, per request, whether the request runs on the default store or on
//! the store of the caller's tenant, and restores the default afterwards.

use querydesk_core::Principal;
use querydesk_core::template::render_connection_string;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bind_registry::BindRegistry;
use crate::directory::TenantDirectory;
use crate::session::{ActiveResource, DataSession, RequestScope};

/// Endpoint/method pair that always runs on the default store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptRoute {
    /// Fragment matched against the request path
    pub endpoint: String,
    /// Methods the exemption applies to; empty means all methods
    #[serde(default)]
    pub methods: Vec<String>,
}

impl ExemptRoute {
    pub fn new(endpoint: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            endpoint: endpoint.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn matches(&self, endpoint: &str, method: &str) -> bool {
        endpoint.contains(&self.endpoint)
            && (self.methods.is_empty()
                || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)))
    }
}

/// Account management, login and logout always target the default store
pub fn default_exemptions() -> Vec<ExemptRoute> {
    vec![
        ExemptRoute::new("users/add", &["POST"]),
        ExemptRoute::new("users/delete", &["POST"]),
        ExemptRoute::new("databases/add", &["POST"]),
        ExemptRoute::new("databases/delete", &["POST"]),
        ExemptRoute::new("login", &[]),
        ExemptRoute::new("logout", &[]),
    ]
}

/// Router settings
#[derive(Debug, Clone)]
pub struct TenantRouterConfig {
    /// Connection-string template; `${db_name}` and `${tenant_name}` are substituted
    pub database_template: String,
    pub exemptions: Vec<ExemptRoute>,
}

impl TenantRouterConfig {
    pub fn new(database_template: impl Into<String>) -> Self {
        Self {
            database_template: database_template.into(),
            exemptions: default_exemptions(),
        }
    }

    pub fn with_exemptions(mut self, exemptions: Vec<ExemptRoute>) -> Self {
        self.exemptions = exemptions;
        self
    }
}

/// Binds each request to its caller's tenant store
pub struct TenantSessionRouter {
    registry: Arc<BindRegistry>,
    directory: Arc<dyn TenantDirectory>,
    config: TenantRouterConfig,
}

impl TenantSessionRouter {
    pub fn new(
        registry: Arc<BindRegistry>,
        directory: Arc<dyn TenantDirectory>,
        config: TenantRouterConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<BindRegistry> {
        &self.registry
    }

    pub fn is_exempt(&self, endpoint: &str, method: &str) -> bool {
        self.config
            .exemptions
            .iter()
            .any(|route| route.matches(endpoint, method))
    }

    /// Scope bound to the default store
    pub fn default_scope(&self) -> RequestScope {
        RequestScope::new(Arc::clone(&self.registry), ActiveResource::Default)
    }

    /// Select the active resource for a request
    ///
    /// Exempt routes, anonymous callers, callers without a tenant mapping and
    /// failed lookups all stay on the default store.
    pub async fn before_handling(
        &self,
        principal: Option<&Principal>,
        endpoint: &str,
        method: &str,
    ) -> RequestScope {
        if self.is_exempt(endpoint, method) {
            debug!(endpoint, method, "Exempt route, staying on default store");
            return self.default_scope();
        }

        let principal = match principal {
            Some(p) if !p.is_anonymous() => p,
            _ => return self.default_scope(),
        };

        let tenants = match self.directory.tenants_for_user(&principal.user_id).await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(user_id = %principal.user_id, "Tenant lookup failed: {}", e);
                return self.default_scope();
            }
        };

        if tenants.len() > 1 {
            warn!(
                user_id = %principal.user_id,
                count = tenants.len(),
                "User is mapped to several tenants, using the first mapping"
            );
        }

        let Some(tenant) = tenants.into_iter().next() else {
            return self.default_scope();
        };

        let target = match self.registry.get(tenant.store_key()) {
            Some(target) => target,
            None => {
                let url = render_connection_string(&self.config.database_template, &tenant);
                self.registry.upsert(tenant.store_key(), url)
            }
        };

        info!(tenant = %tenant.name, bind_key = %target.key(), "Request bound to tenant store");
        RequestScope::new(
            Arc::clone(&self.registry),
            ActiveResource::Tenant {
                tenant,
                session: Arc::new(DataSession::new(target)),
            },
        )
    }

    /// Release the tenant session, if any, and restore the default store
    pub fn after_handling(&self, scope: &mut RequestScope) {
        if scope.restore_default() {
            debug!("Default store restored");
        }
    }
}
