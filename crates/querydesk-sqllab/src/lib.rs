//! QueryDesk SQL Lab
//!
//! Query execution pipeline:
//! - [`QueryOrchestrator`]: translate, render, validate, limit and dispatch a query
//! - [`SynchronousSqlExecutor`] / [`AsynchronousSqlExecutor`]: in-process with a
//!   deadline, or detached through a [`WorkQueue`]
//! - [`RunQueryTask`]: the task both strategies run
//! - [`GenericDialect`], [`SqlxDatabaseBackend`], [`DatabaseAccessValidator`]:
//!   reference collaborators for sqlx-reachable databases

pub mod database;
pub mod dialect;
pub mod executor;
pub mod orchestrator;
pub mod runner;
pub mod task;
pub mod validator;
pub mod work_queue;

#[cfg(test)]
mod test_support;

pub use database::{DatabaseCatalog, DatabaseEntry};
pub use dialect::GenericDialect;
pub use executor::{AsynchronousSqlExecutor, SqlExecutor, SynchronousSqlExecutor};
pub use orchestrator::{Collaborators, QueryOrchestrator};
pub use runner::SqlxDatabaseBackend;
pub use task::RunQueryTask;
pub use validator::DatabaseAccessValidator;
pub use work_queue::{
    ExecuteTask, LocalWorkQueue, TaskHandle, TaskOutcome, TaskRequest, WorkQueue, WorkQueueConfig,
};
