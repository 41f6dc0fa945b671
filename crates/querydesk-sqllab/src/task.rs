//! The execute task: runs a prepared query and records its final status

use async_trait::async_trait;
use querydesk_core::collaborators::{DialectAdapter, QueryRunner};
use querydesk_core::{
    Error, ExecutionContext, ExecutionStatus, Query, QueryChanges, QueryId, QueryStatus,
    QueryStoreResolver, Result,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::work_queue::{ExecuteTask, TaskRequest};

/// Name of the table a select-as-create-table query materialises into
pub fn ctas_table_name(query_id: QueryId) -> String {
    format!("tmp_query_{}", query_id)
}

/// Runs the query's SQL against its database
///
/// The query record is reopened through the resolver so the task writes to
/// the same store the request was routed to, even on a worker.
pub struct RunQueryTask {
    stores: Arc<dyn QueryStoreResolver>,
    dialect: Arc<dyn DialectAdapter>,
    runner: Arc<dyn QueryRunner>,
}

impl RunQueryTask {
    pub fn new(
        stores: Arc<dyn QueryStoreResolver>,
        dialect: Arc<dyn DialectAdapter>,
        runner: Arc<dyn QueryRunner>,
    ) -> Self {
        Self {
            stores,
            dialect,
            runner,
        }
    }

    /// Final statement text: the rendered SQL with the persisted limit applied,
    /// wrapped in `CREATE TABLE ... AS` for select-as-create-table queries
    pub fn statement(
        &self,
        context: &ExecutionContext,
        query: &Query,
        ctas_no_limit: bool,
    ) -> Result<String> {
        let sql = context
            .executable_sql()
            .or(query.sql.as_deref())
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| Error::InvalidRequest(format!("Query {} has no SQL", query.id)))?;

        let mut statement = match query.limit {
            Some(limit) if !(ctas_no_limit && context.select_as_cta) => {
                self.dialect.apply_limit_to_sql(sql, limit)
            }
            _ => sql.to_string(),
        };

        if context.select_as_cta {
            statement = format!(
                "CREATE TABLE {} AS\n{}",
                ctas_table_name(query.id),
                statement
            );
        }
        Ok(statement)
    }

    async fn run(
        &self,
        context: &ExecutionContext,
        query: &Query,
        ctas_no_limit: bool,
    ) -> Result<u64> {
        let database = context
            .database
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("No database selected".to_string()))?;
        let statement = self.statement(context, query, ctas_no_limit)?;
        Ok(self.runner.run(database, &statement).await?.rows)
    }
}

#[async_trait]
impl ExecuteTask for RunQueryTask {
    async fn execute(&self, request: TaskRequest) -> Result<ExecutionStatus> {
        let TaskRequest {
            context,
            query_id,
            ctas_no_limit,
            log_params,
        } = request;

        let store = self.stores.resolve(context.store_key.as_deref())?;
        let mut query = store.get_query(query_id).await?;

        info!(
            query_id = %query_id,
            user = context.username.as_deref().unwrap_or("anonymous"),
            log_params = ?log_params,
            "Executing query"
        );
        store
            .update_query(&mut query, QueryChanges::new().status(QueryStatus::Running))
            .await?;

        match self.run(&context, &query, ctas_no_limit).await {
            Ok(rows) => {
                store
                    .update_query(
                        &mut query,
                        QueryChanges::new()
                            .status(QueryStatus::Success)
                            .rows(i64::try_from(rows).unwrap_or(i64::MAX)),
                    )
                    .await?;
                info!(query_id = %query_id, rows, "Query succeeded");
                Ok(ExecutionStatus::Success)
            }
            Err(e) => {
                warn!(query_id = %query_id, "Query failed: {}", e);
                store
                    .update_query(
                        &mut query,
                        QueryChanges::new()
                            .status(QueryStatus::Failed)
                            .error_message(e.to_string()),
                    )
                    .await?;
                Ok(ExecutionStatus::Failed)
            }
        }
    }
}
