//! Per-database access checks

use async_trait::async_trait;
use querydesk_core::collaborators::AccessValidator;
use querydesk_core::{Error, Principal, Query, Result};
use std::sync::Arc;

use crate::database::DatabaseCatalog;
use crate::dialect::is_select;

/// Allows a query when its database is registered, the principal is on the
/// database's allow-list (an empty list admits everyone) and the statement is
/// read-only unless the database permits DML.
pub struct DatabaseAccessValidator {
    catalog: Arc<DatabaseCatalog>,
}

impl DatabaseAccessValidator {
    pub fn new(catalog: Arc<DatabaseCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl AccessValidator for DatabaseAccessValidator {
    async fn validate(&self, query: &Query, principal: &Principal) -> Result<()> {
        let database = self.catalog.get(query.database_id).ok_or_else(|| {
            Error::InvalidRequest(format!("Unknown database id {}", query.database_id))
        })?;

        if !database.allowed_users.is_empty() {
            if principal.is_anonymous() {
                return Err(Error::InvalidRequest(format!(
                    "Anonymous users may not query database '{}'",
                    database.name
                )));
            }
            let allowed = database
                .allowed_users
                .iter()
                .any(|user| *user == principal.user_id || *user == principal.username);
            if !allowed {
                return Err(Error::InvalidRequest(format!(
                    "User '{}' may not query database '{}'",
                    principal.username, database.name
                )));
            }
        }

        if !database.allow_dml
            && let Some(sql) = query.sql.as_deref()
            && !is_select(sql)
        {
            return Err(Error::InvalidRequest(format!(
                "Only SELECT statements are allowed against database '{}'",
                database.name
            )));
        }

        Ok(())
    }
}
