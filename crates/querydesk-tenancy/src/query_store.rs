//! sqlx-backed query store

use async_trait::async_trait;
use querydesk_core::{
    DEFAULT_BIND_KEY, Error, LimitingFactor, Query, QueryChanges, QueryId, QueryStatus,
    QueryStore, QueryStoreResolver, Result,
};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::sync::Arc;
use tracing::debug;

use crate::bind_registry::BindRegistry;
use crate::session::DataSession;

const MAX_INSERT_ATTEMPTS: u32 = 8;

const SELECT_QUERY: &str = r#"
    SELECT id, database_id, sql, nl_query, status, "limit" AS row_limit,
           limiting_factor,
           CASE WHEN select_as_cta THEN 1 ELSE 0 END AS select_as_cta,
           error_message, row_count
    FROM query
    WHERE id = $1
"#;

/// Query records in the `query` table of one store
#[derive(Debug, Clone)]
pub struct SqlQueryStore {
    pool: AnyPool,
    /// Tenant session the store was issued under, checked on every call
    session: Option<Arc<DataSession>>,
}

impl SqlQueryStore {
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            session: None,
        }
    }

    /// Store on a tenant session's pool; stops working once the session is released
    ///
    /// # Errors
    /// - `Error::Internal` if the session was already released
    pub fn for_session(session: Arc<DataSession>) -> Result<Self> {
        Ok(Self {
            pool: session.pool()?,
            session: Some(session),
        })
    }

    /// # Errors
    /// - `Error::Internal` if the tenant session behind this store was released
    pub fn pool(&self) -> Result<&AnyPool> {
        if let Some(session) = &self.session
            && session.is_released()
        {
            return Err(Error::Internal(format!(
                "Session for bind '{}' has been released",
                session.bind_key()
            )));
        }
        Ok(&self.pool)
    }

    /// Insert a new record, allocating the next id when `query.id` is zero
    ///
    /// The id is computed inside the insert statement itself. A concurrent
    /// writer that claims the same id surfaces as a unique violation and the
    /// insert is retried.
    ///
    /// # Errors
    /// - `Error::Database` if the insert fails
    pub async fn create_query(&self, mut query: Query) -> Result<Query> {
        let pool = self.pool()?;
        if query.id.as_i64() != 0 {
            insert_with_id(pool, &query).await?;
            debug!(query_id = %query.id, "Created query record");
            return Ok(query);
        }

        let mut attempt = 1;
        loop {
            match insert_next_id(pool, &query).await {
                Ok(id) => {
                    query.id = QueryId::new(id);
                    debug!(query_id = %query.id, attempt, "Created query record");
                    return Ok(query);
                }
                Err(e) if is_unique_violation(&e) && attempt < MAX_INSERT_ATTEMPTS => {
                    debug!(attempt, "Query id taken by a concurrent insert, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Error::Database(format!("Failed to insert query: {}", e)));
                }
            }
        }
    }
}

async fn insert_with_id(pool: &AnyPool, query: &Query) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO query (id, database_id, sql, nl_query, status, "limit",
                           limiting_factor, select_as_cta)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(query.id.as_i64())
    .bind(query.database_id)
    .bind(query.sql.clone())
    .bind(query.nl_query.clone())
    .bind(query.status.as_str())
    .bind(query.limit)
    .bind(query.limiting_factor.as_str())
    .bind(query.select_as_cta)
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to insert query {}: {}", query.id, e)))?;
    Ok(())
}

/// Insert under `MAX(id) + 1`, computed by the same statement
async fn insert_next_id(pool: &AnyPool, query: &Query) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO query (id, database_id, sql, nl_query, status, "limit",
                           limiting_factor, select_as_cta)
        SELECT COALESCE(MAX(id), 0) + 1, $1, $2, $3, $4, $5, $6, $7
        FROM query
        RETURNING id
        "#,
    )
    .bind(query.database_id)
    .bind(query.sql.clone())
    .bind(query.nl_query.clone())
    .bind(query.status.as_str())
    .bind(query.limit)
    .bind(query.limiting_factor.as_str())
    .bind(query.select_as_cta)
    .fetch_one(pool)
    .await
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn column<'r, T>(row: &'r AnyRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get(name)
        .map_err(|e| Error::Database(format!("Failed to read column '{}': {}", name, e)))
}

fn query_from_row(row: &AnyRow) -> Result<Query> {
    let status: String = column(row, "status")?;
    let factor: String = column(row, "limiting_factor")?;
    let select_as_cta: i64 = column(row, "select_as_cta")?;

    Ok(Query {
        id: QueryId::new(column(row, "id")?),
        database_id: column(row, "database_id")?,
        sql: column(row, "sql")?,
        nl_query: column(row, "nl_query")?,
        status: status.parse::<QueryStatus>()?,
        limit: column(row, "row_limit")?,
        limiting_factor: factor.parse::<LimitingFactor>()?,
        select_as_cta: select_as_cta != 0,
        error_message: column(row, "error_message")?,
        rows: column(row, "row_count")?,
    })
}

#[async_trait]
impl QueryStore for SqlQueryStore {
    async fn get_query(&self, id: QueryId) -> Result<Query> {
        let row = sqlx::query(SELECT_QUERY)
            .bind(id.as_i64())
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| Error::Database(format!("Failed to load query {}: {}", id, e)))?
            .ok_or(Error::QueryNotFound(id))?;

        query_from_row(&row)
    }

    async fn update_query(&self, query: &mut Query, changes: QueryChanges) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut assignments = Vec::new();
        let mut next_param = 1;
        let mut assign = |column: &str| {
            assignments.push(format!("{} = ${}", column, next_param));
            next_param += 1;
        };

        if changes.sql.is_some() {
            assign("sql");
        }
        if changes.status.is_some() {
            assign("status");
        }
        if changes.limit.is_some() {
            assign("\"limit\"");
        }
        if changes.limiting_factor.is_some() {
            assign("limiting_factor");
        }
        if changes.error_message.is_some() {
            assign("error_message");
        }
        if changes.rows.is_some() {
            assign("row_count");
        }

        let statement = format!(
            "UPDATE query SET {} WHERE id = ${}",
            assignments.join(", "),
            assignments.len() + 1
        );

        let mut update = sqlx::query(&statement);
        if let Some(sql) = &changes.sql {
            update = update.bind(sql.clone());
        }
        if let Some(status) = changes.status {
            update = update.bind(status.as_str());
        }
        if let Some(limit) = changes.limit {
            update = update.bind(limit);
        }
        if let Some(factor) = changes.limiting_factor {
            update = update.bind(factor.as_str());
        }
        if let Some(message) = &changes.error_message {
            update = update.bind(message.clone());
        }
        if let Some(rows) = changes.rows {
            update = update.bind(rows);
        }

        let result = update
            .bind(query.id.as_i64())
            .execute(self.pool()?)
            .await
            .map_err(|e| Error::Database(format!("Failed to update query {}: {}", query.id, e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::QueryNotFound(query.id));
        }

        changes.apply_to(query);
        Ok(())
    }
}

/// Reopens query stores by bind key, for work that runs outside the request
pub struct RegistryQueryStoreResolver {
    registry: Arc<BindRegistry>,
}

impl RegistryQueryStoreResolver {
    pub fn new(registry: Arc<BindRegistry>) -> Self {
        Self { registry }
    }
}

impl QueryStoreResolver for RegistryQueryStoreResolver {
    fn resolve(&self, store_key: Option<&str>) -> Result<Arc<dyn QueryStore>> {
        let key = store_key.unwrap_or(DEFAULT_BIND_KEY);
        let target = self
            .registry
            .get(key)
            .ok_or_else(|| Error::TenantNotFound(key.to_string()))?;
        Ok(Arc::new(SqlQueryStore::new(target.pool()?)))
    }
}
