//! Error types for QueryDesk Core

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::query::QueryId;

/// Category of a user-facing SQL Lab error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    GenericBackendError,
    AsyncWorkersError,
    QueryAccessForbiddenError,
    SqllabTimeoutError,
    InvalidPayloadFormatError,
    QueryNotFoundError,
    TenantNotFoundError,
    NlTranslationError,
    TemplateRenderError,
    ConfigurationError,
}

/// Severity attached to a user-facing error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
}

/// Structured, leveled error payload handed to the calling layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlLabError {
    pub message: String,
    pub error_type: ErrorType,
    pub level: ErrorLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl SqlLabError {
    pub fn new(message: impl Into<String>, error_type: ErrorType, level: ErrorLevel) -> Self {
        Self {
            message: message.into(),
            error_type,
            level,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl fmt::Display for SqlLabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Query not found: {0}")]
    QueryNotFound(QueryId),

    // Multi-tenancy errors
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    // Collaborator errors
    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Template error: {0}")]
    Template(String),

    // SQL Lab execution errors
    #[error("Query is forbidden to access: {source}")]
    AccessForbidden {
        context: Box<ExecutionContext>,
        #[source]
        source: Box<Error>,
    },

    #[error("The query exceeded the {seconds} seconds timeout.")]
    ExecutionTimeout { seconds: u64 },

    #[error("{0}")]
    AsyncDispatchFailure(SqlLabError),

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a validation failure together with the context it was raised for
    pub fn access_forbidden(context: ExecutionContext, cause: Error) -> Self {
        Error::AccessForbidden {
            context: Box::new(context),
            source: Box::new(cause),
        }
    }

    /// Whether a pipeline failure of this kind is written back as `FAILED`.
    ///
    /// Timeouts leave the underlying task running, and dispatch failures are
    /// left for the caller to reconcile.
    pub fn marks_query_failed(&self) -> bool {
        !matches!(
            self,
            Error::ExecutionTimeout { .. } | Error::AsyncDispatchFailure(_)
        )
    }

    /// Translate into the structured payload shown to users
    pub fn to_sqllab_error(&self) -> SqlLabError {
        match self {
            Error::AsyncDispatchFailure(err) => err.clone(),
            Error::AccessForbidden { source, .. } => SqlLabError::new(
                format!("The database returned an unexpected error: {}", source),
                ErrorType::QueryAccessForbiddenError,
                ErrorLevel::Error,
            ),
            Error::ExecutionTimeout { .. } => SqlLabError::new(
                self.to_string(),
                ErrorType::SqllabTimeoutError,
                ErrorLevel::Error,
            ),
            Error::InvalidRequest(_) => SqlLabError::new(
                self.to_string(),
                ErrorType::InvalidPayloadFormatError,
                ErrorLevel::Error,
            ),
            Error::QueryNotFound(_) => SqlLabError::new(
                self.to_string(),
                ErrorType::QueryNotFoundError,
                ErrorLevel::Error,
            ),
            Error::TenantNotFound(_) => SqlLabError::new(
                self.to_string(),
                ErrorType::TenantNotFoundError,
                ErrorLevel::Error,
            ),
            Error::Translation(_) => SqlLabError::new(
                self.to_string(),
                ErrorType::NlTranslationError,
                ErrorLevel::Error,
            ),
            Error::Template(_) => SqlLabError::new(
                self.to_string(),
                ErrorType::TemplateRenderError,
                ErrorLevel::Error,
            ),
            Error::Config(_) => SqlLabError::new(
                self.to_string(),
                ErrorType::ConfigurationError,
                ErrorLevel::Error,
            ),
            _ => SqlLabError::new(
                self.to_string(),
                ErrorType::GenericBackendError,
                ErrorLevel::Error,
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
