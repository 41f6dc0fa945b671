//! Versioned bootstrap schema for the metadata store
//!
//! Creates the tenant mapping tables and the `query` table the execution
//! pipeline reads and updates. The statements stay within the SQL subset
//! shared by PostgreSQL and SQLite so the same list runs on either backend.

use querydesk_core::{Error, Result};
use sqlx::AnyPool;
use tracing::{debug, info};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique version number (must be sequential)
    pub version: i64,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to execute for this migration
    pub up_sql: &'static str,
}

/// All migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create tenant tables",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS ab_tenant (
                id BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                db_name VARCHAR(255) NOT NULL
            )
        "#,
    },
    Migration {
        version: 2,
        description: "Create user tenant mapping table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS ab_user_tenant (
                id BIGINT PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL,
                tenant_id BIGINT NOT NULL REFERENCES ab_tenant (id)
            )
        "#,
    },
    Migration {
        version: 3,
        description: "Create query table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS query (
                id BIGINT PRIMARY KEY,
                database_id BIGINT NOT NULL,
                sql TEXT,
                nl_query TEXT,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                "limit" BIGINT,
                limiting_factor VARCHAR(32) NOT NULL DEFAULT 'UNKNOWN',
                select_as_cta BOOLEAN NOT NULL DEFAULT FALSE,
                error_message TEXT,
                row_count BIGINT
            )
        "#,
    },
    Migration {
        version: 4,
        description: "Index user tenant lookups",
        up_sql: r#"
            CREATE INDEX IF NOT EXISTS idx_user_tenant_user
                ON ab_user_tenant (user_id, id)
        "#,
    },
];

/// Apply pending migrations to the store behind `pool`
///
/// # Errors
/// - `Error::Database` if a statement fails
pub async fn run_migrations(pool: &AnyPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create schema_migrations table: {}", e)))?;

    let applied_versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to fetch applied migrations: {}", e)))?;

    debug!(
        "Found {} applied migrations: {:?}",
        applied_versions.len(),
        applied_versions
    );

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            continue;
        }

        info!(
            "Applying migration {}: {}",
            migration.version, migration.description
        );

        sqlx::query(migration.up_sql)
            .execute(pool)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query(
            "INSERT INTO schema_migrations (version, description) VALUES ($1, $2)
                ON CONFLICT (version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(migration.description)
        .execute(pool)
        .await
        .map_err(|e| {
            Error::Database(format!(
                "Failed to record migration {}: {}",
                migration.version, e
            ))
        })?;
    }

    Ok(())
}
