//! QueryDesk Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout QueryDesk:
//! - Tenant, query and execution-context types
//! - Collaborator traits (translator, dialect, renderer, validator, runner)
//! - The row-limit resolver
//! - Core error types

pub mod collaborators;
pub mod context;
pub mod error;
pub mod limit;
pub mod query;
pub mod template;
pub mod tenant;

pub use context::{DatabaseRef, ExecutionContext, LogParams};
pub use error::{Error, ErrorLevel, ErrorType, Result, SqlLabError};
pub use limit::{ResolvedLimit, resolve};
pub use query::{
    ExecutionStatus, LimitingFactor, Query, QueryChanges, QueryId, QueryStatus, QueryStore,
    QueryStoreResolver,
};
pub use tenant::{DEFAULT_BIND_KEY, Principal, Storable, Tenant, TenantId, UserTenant};
