//! sqlx-backed execution and catalog inspection for target databases

use async_trait::async_trait;
use querydesk_core::collaborators::{
    ColumnMetadata, QueryOutcome, QueryRunner, SchemaInspector, SchemaMetadata, TableMetadata,
};
use querydesk_core::{DatabaseRef, Error, Result};
use querydesk_tenancy::{BindTarget, PoolConfig};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::database::DatabaseCatalog;
use crate::dialect::is_select;

const SQLITE_CATALOG: &str = r#"
    SELECT NULL AS table_schema, m.name AS table_name, p.name AS column_name,
           p.type AS data_type
    FROM sqlite_master m
    JOIN pragma_table_info(m.name) p
    WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%'
    ORDER BY m.name, p.cid
"#;

const INFORMATION_SCHEMA_CATALOG: &str = r#"
    SELECT CAST(table_schema AS TEXT) AS table_schema,
           CAST(table_name AS TEXT) AS table_name,
           CAST(column_name AS TEXT) AS column_name,
           CAST(data_type AS TEXT) AS data_type
    FROM information_schema.columns
    WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
    ORDER BY table_schema, table_name, ordinal_position
"#;

/// Runs SQL against the registered databases, one lazily created pool each
pub struct SqlxDatabaseBackend {
    targets: HashMap<i64, Arc<BindTarget>>,
}

impl SqlxDatabaseBackend {
    pub fn new(catalog: &DatabaseCatalog, config: PoolConfig) -> Self {
        let targets = catalog
            .entries()
            .map(|entry| {
                let key = format!("database:{}", entry.id);
                (
                    entry.id,
                    Arc::new(BindTarget::new(key, entry.uri.clone(), config.clone())),
                )
            })
            .collect();
        Self { targets }
    }

    fn pool(&self, database: &DatabaseRef) -> Result<sqlx::AnyPool> {
        self.targets
            .get(&database.id)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown database id {}", database.id)))?
            .pool()
    }
}

#[async_trait]
impl QueryRunner for SqlxDatabaseBackend {
    async fn run(&self, database: &DatabaseRef, sql: &str) -> Result<QueryOutcome> {
        let pool = self.pool(database)?;
        debug!(database = %database.database_name, "Running statement");

        let rows = if is_select(sql) {
            sqlx::query(sql)
                .fetch_all(&pool)
                .await
                .map_err(|e| Error::ExecutionFailure(e.to_string()))?
                .len() as u64
        } else {
            sqlx::query(sql)
                .execute(&pool)
                .await
                .map_err(|e| Error::ExecutionFailure(e.to_string()))?
                .rows_affected()
        };

        Ok(QueryOutcome { rows })
    }
}

#[async_trait]
impl SchemaInspector for SqlxDatabaseBackend {
    async fn schema_metadata(&self, database: &DatabaseRef) -> Result<SchemaMetadata> {
        let pool = self.pool(database)?;
        let catalog_sql = if database.backend.eq_ignore_ascii_case("sqlite") {
            SQLITE_CATALOG
        } else {
            INFORMATION_SCHEMA_CATALOG
        };

        let rows = sqlx::query(catalog_sql)
            .fetch_all(&pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to read catalog: {}", e)))?;

        let mut tables: Vec<TableMetadata> = Vec::new();
        for row in rows {
            let read = |name: &str| -> Result<Option<String>> {
                row.try_get(name)
                    .map_err(|e| Error::Database(format!("Failed to read '{}': {}", name, e)))
            };
            let schema = read("table_schema")?;
            let table = read("table_name")?.unwrap_or_default();
            let column = ColumnMetadata {
                name: read("column_name")?.unwrap_or_default(),
                data_type: read("data_type")?.unwrap_or_default(),
            };

            match tables.last_mut() {
                Some(last) if last.name == table && last.schema == schema => {
                    last.columns.push(column)
                }
                _ => tables.push(TableMetadata {
                    schema,
                    name: table,
                    columns: vec![column],
                }),
            }
        }

        Ok(SchemaMetadata { tables })
    }
}
