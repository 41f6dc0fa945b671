//! Request-scoped execution context

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::query::Query;

/// Free-form parameters forwarded to the execute task for audit logging
pub type LogParams = HashMap<String, serde_json::Value>;

/// Reference to the database a query targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRef {
    pub id: i64,
    pub database_name: String,
    /// Engine name (`postgresql`, `sqlite`, `mysql`, ...)
    pub backend: String,
}

impl DatabaseRef {
    pub fn new(id: i64, database_name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            id,
            database_name: database_name.into(),
            backend: backend.into(),
        }
    }
}

/// Mutable state describing one in-flight query execution.
///
/// Owned by a single request; detached workers receive their own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub database: Option<DatabaseRef>,
    pub sql: Option<String>,
    /// `sql` after template rendering; this is the text that gets executed
    #[serde(default)]
    pub rendered_sql: Option<String>,
    pub nl_query: Option<String>,
    pub query: Option<Query>,
    /// Whether the result materialises a new table
    pub select_as_cta: bool,
    /// Row limit requested by the caller
    pub limit: i64,
    /// Values available to the SQL template renderer
    #[serde(default)]
    pub template_params: serde_json::Map<String, serde_json::Value>,
    /// Username the pipeline acts on behalf of
    #[serde(default)]
    pub username: Option<String>,
    /// Store key the request was routed to (`None` = default store)
    #[serde(default)]
    pub store_key: Option<String>,
}

impl ExecutionContext {
    pub fn new(database: DatabaseRef, limit: i64) -> Self {
        Self {
            database: Some(database),
            limit,
            ..Default::default()
        }
    }

    /// Context whose database is bound once the query record is loaded
    pub fn unbound(limit: i64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_select_as_cta(mut self, select_as_cta: bool) -> Self {
        self.select_as_cta = select_as_cta;
        self
    }

    pub fn with_template_params(
        mut self,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.template_params = params;
        self
    }

    pub fn with_store_key(mut self, store_key: Option<String>) -> Self {
        self.store_key = store_key;
        self
    }

    pub fn set_database(&mut self, database: DatabaseRef) {
        self.database = Some(database);
    }

    pub fn set_sql(&mut self, sql: impl Into<String>) {
        self.sql = Some(sql.into());
        self.rendered_sql = None;
    }

    /// SQL to execute: the rendered text, else the raw text
    pub fn executable_sql(&self) -> Option<&str> {
        self.rendered_sql.as_deref().or(self.sql.as_deref())
    }

    /// Attach the persisted record and adopt its SQL/NL text
    pub fn set_query(&mut self, query: Query) {
        if query.sql.is_some() {
            self.sql = query.sql.clone();
            self.rendered_sql = None;
        }
        if query.nl_query.is_some() {
            self.nl_query = query.nl_query.clone();
        }
        self.query = Some(query);
    }
}
