//! Traits for the collaborators the execution pipeline consumes
//!
//! Each trait is a seam: the pipeline depends only on these signatures, and
//! concrete implementations are chosen when the application is assembled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{DatabaseRef, ExecutionContext};
use crate::query::Query;
use crate::tenant::Principal;
use crate::Result;

/// Column description used as translator input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
}

/// Table description used as translator input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

/// Catalog of a target database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub tables: Vec<TableMetadata>,
}

/// Turns natural-language questions into SQL
#[async_trait]
pub trait Translator: Send + Sync {
    /// # Errors
    /// - `Error::Translation` when no SQL could be produced
    async fn translate(&self, nl_query: &str, schema: &SchemaMetadata) -> Result<String>;
}

/// Reads catalog metadata for a target database
#[async_trait]
pub trait SchemaInspector: Send + Sync {
    async fn schema_metadata(&self, database: &DatabaseRef) -> Result<SchemaMetadata>;
}

/// Looks up registered target databases by id
pub trait DatabaseResolver: Send + Sync {
    /// # Errors
    /// - `Error::InvalidRequest` if no database with `id` is registered
    fn resolve_database(&self, id: i64) -> Result<DatabaseRef>;
}

/// Database-specific SQL handling
pub trait DialectAdapter: Send + Sync {
    /// Row limit already present in the SQL text, if any
    fn get_limit_from_sql(&self, sql: &str) -> Option<i64>;

    /// Rewrite the SQL so that it returns at most `limit` rows
    fn apply_limit_to_sql(&self, sql: &str, limit: i64) -> String;
}

/// Renders parameterised SQL against an execution context
pub trait TemplateRenderer: Send + Sync {
    /// # Errors
    /// - `Error::Template` when the context carries no SQL or rendering fails
    fn render(&self, context: &ExecutionContext) -> Result<String>;
}

/// Decides whether a principal may run a (rendered) query
#[async_trait]
pub trait AccessValidator: Send + Sync {
    async fn validate(&self, query: &Query, principal: &Principal) -> Result<()>;
}

/// Result summary of running a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOutcome {
    pub rows: u64,
}

/// Executes SQL against a target database
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run(&self, database: &DatabaseRef, sql: &str) -> Result<QueryOutcome>;
}
