//! QueryDesk server
//!
//! Configuration, HTTP API and translator client around the tenancy and
//! SQL Lab crates.

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod principal;
pub mod translator;

pub use app::{AppState, build_router};
pub use bootstrap::{build_state, init_databases};
pub use config::ServerConfig;
