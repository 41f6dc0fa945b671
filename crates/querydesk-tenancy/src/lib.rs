//! QueryDesk tenancy
//!
//! Per-request routing of data access to tenant-specific stores:
//! - [`BindRegistry`]: process-wide, append-only map of bind key to connection target
//! - [`TenantSessionRouter`]: before/after hooks selecting the request's active store
//! - [`RequestScope`] / [`SessionHandle`]: the request's active resource and binding precedence
//! - [`SqlTenantDirectory`] and [`SqlQueryStore`]: sqlx-backed lookups and query records

pub mod bind_registry;
pub mod directory;
pub mod middleware;
pub mod migrations;
pub mod pool;
pub mod query_store;
pub mod router;
pub mod session;

pub use bind_registry::{BindRegistry, BindTarget};
pub use directory::{SqlTenantDirectory, TenantDirectory};
pub use middleware::tenant_session_middleware;
pub use migrations::run_migrations;
pub use pool::PoolConfig;
pub use query_store::{RegistryQueryStoreResolver, SqlQueryStore};
pub use router::{ExemptRoute, TenantRouterConfig, TenantSessionRouter, default_exemptions};
pub use session::{ActiveResource, DataSession, RequestScope, SessionHandle};
