//! Persisted query records and the store contract used to mutate them

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::tenant::Storable;
use crate::{Error, Result};

/// Identifier of a persisted query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(i64);

impl QueryId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for QueryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a persisted query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    TimedOut,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Running => "running",
            QueryStatus::Success => "success",
            QueryStatus::Failed => "failed",
            QueryStatus::TimedOut => "timed_out",
        }
    }

    /// Whether no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Success | QueryStatus::Failed | QueryStatus::TimedOut
        )
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueryStatus::Pending),
            "running" => Ok(QueryStatus::Running),
            "success" => Ok(QueryStatus::Success),
            "failed" => Ok(QueryStatus::Failed),
            "timed_out" => Ok(QueryStatus::TimedOut),
            other => Err(Error::Database(format!("Unknown query status '{}'", other))),
        }
    }
}

/// Provenance of the effective row limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitingFactor {
    #[default]
    Unknown,
    /// The limit embedded in the SQL text won
    Query,
    /// The caller-requested limit won
    Dropdown,
    /// Both candidates were equal
    QueryAndDropdown,
    NotLimited,
}

impl LimitingFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitingFactor::Unknown => "UNKNOWN",
            LimitingFactor::Query => "QUERY",
            LimitingFactor::Dropdown => "DROPDOWN",
            LimitingFactor::QueryAndDropdown => "QUERY_AND_DROPDOWN",
            LimitingFactor::NotLimited => "NOT_LIMITED",
        }
    }
}

impl fmt::Display for LimitingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitingFactor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UNKNOWN" => Ok(LimitingFactor::Unknown),
            "QUERY" => Ok(LimitingFactor::Query),
            "DROPDOWN" => Ok(LimitingFactor::Dropdown),
            "QUERY_AND_DROPDOWN" => Ok(LimitingFactor::QueryAndDropdown),
            "NOT_LIMITED" => Ok(LimitingFactor::NotLimited),
            other => Err(Error::Database(format!(
                "Unknown limiting factor '{}'",
                other
            ))),
        }
    }
}

/// Outcome reported by an executor strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Dispatched; completion is observed through the persisted status
    Running,
    Success,
    Failed,
    TimedOut,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Persisted query record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub database_id: i64,
    pub sql: Option<String>,
    pub nl_query: Option<String>,
    pub status: QueryStatus,
    pub limit: Option<i64>,
    pub limiting_factor: LimitingFactor,
    #[serde(default)]
    pub select_as_cta: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub rows: Option<i64>,
}

impl Query {
    pub fn new(id: impl Into<QueryId>, database_id: i64) -> Self {
        Self {
            id: id.into(),
            database_id,
            sql: None,
            nl_query: None,
            status: QueryStatus::Pending,
            limit: None,
            limiting_factor: LimitingFactor::Unknown,
            select_as_cta: false,
            error_message: None,
            rows: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_nl_query(mut self, nl_query: impl Into<String>) -> Self {
        self.nl_query = Some(nl_query.into());
        self
    }

    /// Natural-language source that still needs translating
    pub fn needs_translation(&self) -> bool {
        let has_nl = self.nl_query.as_deref().is_some_and(|s| !s.trim().is_empty());
        let has_sql = self.sql.as_deref().is_some_and(|s| !s.trim().is_empty());
        has_nl && !has_sql
    }
}

impl Storable for Query {}

/// Field changes applied to a query record in a single update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryChanges {
    pub sql: Option<String>,
    pub status: Option<QueryStatus>,
    pub limit: Option<i64>,
    pub limiting_factor: Option<LimitingFactor>,
    pub error_message: Option<String>,
    pub rows: Option<i64>,
}

impl QueryChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn status(mut self, status: QueryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn limiting_factor(mut self, factor: LimitingFactor) -> Self {
        self.limiting_factor = Some(factor);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn rows(mut self, rows: i64) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the changes to an in-memory record
    pub fn apply_to(&self, query: &mut Query) {
        if let Some(sql) = &self.sql {
            query.sql = Some(sql.clone());
        }
        if let Some(status) = self.status {
            query.status = status;
        }
        if let Some(limit) = self.limit {
            query.limit = Some(limit);
        }
        if let Some(factor) = self.limiting_factor {
            query.limiting_factor = factor;
        }
        if let Some(message) = &self.error_message {
            query.error_message = Some(message.clone());
        }
        if let Some(rows) = self.rows {
            query.rows = Some(rows);
        }
    }
}

/// Query store trait
///
/// The only persistence contract the execution pipeline relies on: load a
/// record by id and apply field changes to it.
///
/// Implementations:
/// - `SqlQueryStore`: sqlx-backed store bound to the request's active resource
///
/// # Example
/// ```no_run
/// # use querydesk_core::{QueryChanges, QueryId, QueryStatus, QueryStore};
/// # async fn example(store: &dyn QueryStore) -> querydesk_core::Result<()> {
/// let mut query = store.get_query(QueryId::new(42)).await?;
/// store
///     .update_query(&mut query, QueryChanges::new().status(QueryStatus::Running))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Load a query by id
    ///
    /// # Errors
    /// - `Error::QueryNotFound` if no record exists
    /// - `Error::Database` for read errors
    async fn get_query(&self, id: QueryId) -> Result<Query>;

    /// Persist field changes and mirror them onto `query`
    ///
    /// # Errors
    /// - `Error::Database` for write errors
    async fn update_query(&self, query: &mut Query, changes: QueryChanges) -> Result<()>;

    /// Convenience wrapper for status-only updates
    async fn set_status(&self, query: &mut Query, status: QueryStatus) -> Result<()> {
        self.update_query(query, QueryChanges::new().status(status))
            .await
    }
}

/// Reopens a query store outside the request that created the query.
///
/// Detached workers use this to reach the same tenant store the request was
/// routed to.
pub trait QueryStoreResolver: Send + Sync {
    fn resolve(&self, store_key: Option<&str>) -> Result<Arc<dyn QueryStore>>;
}
