//! Tenant lookup for authenticated users

use async_trait::async_trait;
use querydesk_core::{DEFAULT_BIND_KEY, Error, Result, Storable, Tenant};
use sqlx::Row;
use std::sync::Arc;

use crate::bind_registry::BindRegistry;

/// Source of user-to-tenant mappings
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Tenants mapped to `user_id`, ordered by mapping id
    ///
    /// # Errors
    /// - `Error::Database` if the lookup fails
    async fn tenants_for_user(&self, user_id: &str) -> Result<Vec<Tenant>>;
}

/// Directory backed by the `ab_user_tenant` / `ab_tenant` tables
///
/// Always reads from the store the tenant tables are pinned to, whatever the
/// request is currently bound to.
pub struct SqlTenantDirectory {
    registry: Arc<BindRegistry>,
}

impl SqlTenantDirectory {
    pub fn new(registry: Arc<BindRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TenantDirectory for SqlTenantDirectory {
    async fn tenants_for_user(&self, user_id: &str) -> Result<Vec<Tenant>> {
        let key = <Tenant as Storable>::bind_key().unwrap_or(DEFAULT_BIND_KEY);
        let pool = self
            .registry
            .get(key)
            .ok_or_else(|| Error::Config(format!("No bind registered for key '{}'", key)))?
            .pool()?;

        let rows = sqlx::query(
            r#"
            SELECT t.id AS id, t.name AS name, t.db_name AS db_name
            FROM ab_user_tenant ut
            JOIN ab_tenant t ON t.id = ut.tenant_id
            WHERE ut.user_id = $1
            ORDER BY ut.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to look up tenants for user: {}", e)))?;

        rows.iter()
            .map(|row| {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| Error::Database(format!("Failed to read tenant id: {}", e)))?;
                let name: String = row
                    .try_get("name")
                    .map_err(|e| Error::Database(format!("Failed to read tenant name: {}", e)))?;
                let db_name: String = row
                    .try_get("db_name")
                    .map_err(|e| Error::Database(format!("Failed to read tenant db_name: {}", e)))?;
                Ok(Tenant::new(id, name, db_name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::pool::PoolConfig;

    async fn seeded_registry() -> Arc<BindRegistry> {
        let registry = Arc::new(BindRegistry::new(
            "sqlite:file:directory_tests?mode=memory&cache=shared",
            PoolConfig::default().with_max_connections(1),
        ));
        let pool = registry.default_target().unwrap().pool().unwrap();
        run_migrations(&pool).await.unwrap();

        for statement in [
            "INSERT INTO ab_tenant (id, name, db_name) VALUES (1, 'acme', 'acme_db')",
            "INSERT INTO ab_tenant (id, name, db_name) VALUES (2, 'globex', 'globex_db')",
            "INSERT INTO ab_user_tenant (id, user_id, tenant_id) VALUES (20, 'u-2', 2)",
            "INSERT INTO ab_user_tenant (id, user_id, tenant_id) VALUES (10, 'u-2', 1)",
            "INSERT INTO ab_user_tenant (id, user_id, tenant_id) VALUES (30, 'u-1', 1)",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let directory = SqlTenantDirectory::new(seeded_registry().await);

        let tenants = directory.tenants_for_user("u-1").await.unwrap();
        assert_eq!(tenants, vec![Tenant::new(1, "acme", "acme_db")]);

        // Ordered by mapping id, not tenant id or insertion order
        let tenants = directory.tenants_for_user("u-2").await.unwrap();
        let names: Vec<_> = tenants.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["acme", "globex"]);

        assert!(directory.tenants_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tables_is_database_error() {
        let registry = Arc::new(BindRegistry::new(
            "sqlite::memory:",
            PoolConfig::default().with_max_connections(1),
        ));
        let directory = SqlTenantDirectory::new(registry);

        let err = directory.tenants_for_user("u-1").await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }
}
