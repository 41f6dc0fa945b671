//! Query execution orchestrator
//!
//! Prepares a persisted query for execution and hands it to the configured
//! executor strategy. Steps run in a fixed order:
//!
//! 1. load the query record from the request's store and bind the context to
//!    the record's database
//! 2. translate a natural-language question into SQL when there is no SQL yet
//! 3. render the SQL template against the execution context
//! 4. validate the caller's access to the rendered query
//! 5. resolve and persist the row limit, unless it is a CTAS run with limits disabled
//! 6. dispatch through the executor
//!
//! A failure in any step marks the query `FAILED`, except for timeouts and
//! dispatch failures which are returned untouched.

use querydesk_core::collaborators::{
    AccessValidator, DatabaseResolver, DialectAdapter, SchemaInspector, TemplateRenderer,
    Translator,
};
use querydesk_core::{
    Error, ExecutionContext, ExecutionStatus, LogParams, Principal, Query, QueryChanges, QueryId,
    QueryStatus, QueryStore, ResolvedLimit, Result, resolve,
};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::executor::SqlExecutor;

/// Collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub translator: Arc<dyn Translator>,
    pub schema: Arc<dyn SchemaInspector>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub validator: Arc<dyn AccessValidator>,
    pub dialect: Arc<dyn DialectAdapter>,
    pub databases: Arc<dyn DatabaseResolver>,
}

pub struct QueryOrchestrator {
    collaborators: Collaborators,
    executor: Arc<dyn SqlExecutor>,
}

impl QueryOrchestrator {
    pub fn new(collaborators: Collaborators, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            collaborators,
            executor,
        }
    }

    /// Run the pipeline for `query_id` on behalf of `principal`
    ///
    /// `store` is the request's active store. On failure the original error is
    /// returned unchanged after the query has been marked `FAILED` where that
    /// applies.
    pub async fn prepare_and_run(
        &self,
        store: &dyn QueryStore,
        context: &mut ExecutionContext,
        query_id: QueryId,
        ctas_no_limit: bool,
        log_params: &LogParams,
        principal: &Principal,
    ) -> Result<ExecutionStatus> {
        let span = info_span!("sqllab_execute", query_id = %query_id, user = %principal.username);

        async {
            context.username = Some(principal.username.clone());

            let result = self
                .run_pipeline(store, context, query_id, ctas_no_limit, log_params, principal)
                .await;

            match result {
                Ok(status) => {
                    info!(%status, "Query dispatched");
                    Ok(status)
                }
                Err(e) => {
                    if e.marks_query_failed() {
                        self.mark_failed(store, query_id, &e).await;
                    } else {
                        warn!("Query not marked failed: {}", e);
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(
        &self,
        store: &dyn QueryStore,
        context: &mut ExecutionContext,
        query_id: QueryId,
        ctas_no_limit: bool,
        log_params: &LogParams,
        principal: &Principal,
    ) -> Result<ExecutionStatus> {
        let mut query = store.get_query(query_id).await?;
        self.bind_database(context, &query)?;
        context.select_as_cta = context.select_as_cta || query.select_as_cta;
        context.set_query(query.clone());

        self.translate_if_needed(store, context, &mut query).await?;

        let rendered = self.render_sql(context)?;
        self.validate_access(context, &query, &rendered, principal)
            .await?;

        if let Some(resolved) = self.apply_limit_if_required(context, ctas_no_limit, &rendered) {
            store
                .update_query(
                    &mut query,
                    QueryChanges::new()
                        .limit(resolved.limit)
                        .limiting_factor(resolved.factor),
                )
                .await?;
        }
        context.query = Some(query);

        self.executor
            .execute(context, query_id, ctas_no_limit, log_params)
            .await
    }

    /// Point the context at the database the record belongs to, replacing
    /// whatever the caller put there
    pub fn bind_database(&self, context: &mut ExecutionContext, query: &Query) -> Result<()> {
        let database = self
            .collaborators
            .databases
            .resolve_database(query.database_id)?;
        if let Some(requested) = &context.database
            && requested.id != database.id
        {
            warn!(
                requested = requested.id,
                record = database.id,
                "Execution context rebound to the query's database"
            );
        }
        context.set_database(database);
        Ok(())
    }

    /// Fill in SQL from the natural-language question, on the context and the record
    pub async fn translate_if_needed(
        &self,
        store: &dyn QueryStore,
        context: &mut ExecutionContext,
        query: &mut Query,
    ) -> Result<()> {
        if !query.needs_translation() {
            return Ok(());
        }
        let nl_query = query.nl_query.clone().unwrap_or_default();
        let database = context
            .database
            .clone()
            .ok_or_else(|| Error::InvalidRequest("No database selected".to_string()))?;

        let schema = self.collaborators.schema.schema_metadata(&database).await?;
        let sql = self
            .collaborators
            .translator
            .translate(&nl_query, &schema)
            .await?;
        debug!(tables = schema.tables.len(), "Translated natural-language query");

        context.set_sql(sql.clone());
        store
            .update_query(query, QueryChanges::new().sql(sql))
            .await?;
        context.query = Some(query.clone());
        Ok(())
    }

    /// Rendered SQL for the context; the record keeps the unrendered text
    pub fn render_sql(&self, context: &mut ExecutionContext) -> Result<String> {
        let rendered = self.collaborators.renderer.render(context)?;
        context.rendered_sql = Some(rendered.clone());
        Ok(rendered)
    }

    /// Check the principal may run the rendered query
    ///
    /// # Errors
    /// - `Error::AccessForbidden` wrapping the validator's error
    pub async fn validate_access(
        &self,
        context: &ExecutionContext,
        query: &Query,
        rendered: &str,
        principal: &Principal,
    ) -> Result<()> {
        let mut candidate = query.clone();
        candidate.sql = Some(rendered.to_string());

        self.collaborators
            .validator
            .validate(&candidate, principal)
            .await
            .map_err(|cause| Error::access_forbidden(context.clone(), cause))
    }

    /// Effective limit for the rendered SQL, or `None` when no limit is injected
    pub fn apply_limit_if_required(
        &self,
        context: &ExecutionContext,
        ctas_no_limit: bool,
        rendered: &str,
    ) -> Option<ResolvedLimit> {
        if ctas_no_limit && context.select_as_cta {
            return None;
        }
        let engine_limit = self.collaborators.dialect.get_limit_from_sql(rendered);
        Some(resolve(engine_limit, context.limit))
    }

    async fn mark_failed(&self, store: &dyn QueryStore, query_id: QueryId, cause: &Error) {
        let mut query = match store.get_query(query_id).await {
            Ok(query) => query,
            Err(e) => {
                error!("Unable to mark query failed, record not loaded: {}", e);
                return;
            }
        };

        let changes = QueryChanges::new()
            .status(QueryStatus::Failed)
            .error_message(cause.to_string());
        if let Err(e) = store.update_query(&mut query, changes).await {
            error!("Unable to mark query failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseCatalog, DatabaseEntry};
    use crate::dialect::GenericDialect;
    use crate::test_support::MemoryQueryStore;
    use async_trait::async_trait;
    use querydesk_core::collaborators::SchemaMetadata;
    use querydesk_core::template::SqlTemplateRenderer;
    use querydesk_core::{DatabaseRef, LimitingFactor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoTranslator;

    #[async_trait]
    impl Translator for NoTranslator {
        async fn translate(&self, _nl: &str, _schema: &SchemaMetadata) -> Result<String> {
            Err(Error::Translation("translator unavailable".to_string()))
        }
    }

    struct EmptySchema;

    #[async_trait]
    impl SchemaInspector for EmptySchema {
        async fn schema_metadata(&self, _database: &DatabaseRef) -> Result<SchemaMetadata> {
            Ok(SchemaMetadata::default())
        }
    }

    struct AllowAll;

    #[async_trait]
    impl AccessValidator for AllowAll {
        async fn validate(&self, _query: &Query, _principal: &Principal) -> Result<()> {
            Ok(())
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SqlExecutor for CountingExecutor {
        async fn execute(
            &self,
            _context: &ExecutionContext,
            _query_id: QueryId,
            _ctas_no_limit: bool,
            _log_params: &LogParams,
        ) -> Result<ExecutionStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionStatus::Success)
        }
    }

    fn orchestrator(executor: Arc<CountingExecutor>) -> QueryOrchestrator {
        QueryOrchestrator::new(
            Collaborators {
                translator: Arc::new(NoTranslator),
                schema: Arc::new(EmptySchema),
                renderer: Arc::new(SqlTemplateRenderer::new()),
                validator: Arc::new(AllowAll),
                dialect: Arc::new(GenericDialect::new()),
                databases: Arc::new(DatabaseCatalog::new(vec![
                    DatabaseEntry::new(1, "sales", "sqlite", "sqlite::memory:"),
                    DatabaseEntry::new(2, "inventory", "sqlite", "sqlite::memory:"),
                ])),
            },
            executor,
        )
    }

    fn executor() -> Arc<CountingExecutor> {
        Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        })
    }

    fn context(limit: i64) -> ExecutionContext {
        ExecutionContext::new(DatabaseRef::new(1, "sales", "sqlite"), limit)
    }

    #[test]
    fn test_limit_skipped_only_for_ctas_without_limit() {
        let orchestrator = orchestrator(executor());
        for (ctas_no_limit, select_as_cta, skipped) in [
            (true, true, true),
            (true, false, false),
            (false, true, false),
            (false, false, false),
        ] {
            let ctx = context(100).with_select_as_cta(select_as_cta);
            let resolved = orchestrator.apply_limit_if_required(&ctx, ctas_no_limit, "SELECT 1");
            assert_eq!(resolved.is_none(), skipped);
        }
    }

    #[test]
    fn test_render_keeps_raw_sql() {
        let orchestrator = orchestrator(executor());
        let mut ctx = context(100);
        ctx.set_sql("SELECT * FROM t LIMIT ${limit}");

        let rendered = orchestrator.render_sql(&mut ctx).unwrap();
        assert_eq!(rendered, "SELECT * FROM t LIMIT 100");
        assert_eq!(ctx.sql.as_deref(), Some("SELECT * FROM t LIMIT ${limit}"));
        assert_eq!(ctx.rendered_sql.as_deref(), Some("SELECT * FROM t LIMIT 100"));
    }

    #[tokio::test]
    async fn test_limit_is_persisted_before_dispatch() {
        let store = MemoryQueryStore::with(vec![
            Query::new(1, 1).with_sql("SELECT * FROM orders LIMIT 20"),
        ]);
        let executor = executor();
        let orchestrator = orchestrator(executor.clone());

        let status = orchestrator
            .prepare_and_run(
                store.as_ref(),
                &mut context(10),
                QueryId::new(1),
                false,
                &LogParams::new(),
                &Principal::new("u-1", "alice"),
            )
            .await
            .unwrap();

        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        let stored = store.stored(1);
        assert_eq!(stored.limit, Some(10));
        assert_eq!(stored.limiting_factor, LimitingFactor::Dropdown);
    }

    #[tokio::test]
    async fn test_translation_failure_marks_failed() {
        let store = MemoryQueryStore::with(vec![
            Query::new(3, 1).with_nl_query("top customers"),
        ]);
        let executor = executor();
        let orchestrator = orchestrator(executor.clone());

        let err = orchestrator
            .prepare_and_run(
                store.as_ref(),
                &mut context(10),
                QueryId::new(3),
                false,
                &LogParams::new(),
                &Principal::new("u-1", "alice"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Translation(_)));
        assert_eq!(store.stored(3).status, QueryStatus::Failed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_query_is_returned_unchanged() {
        let store = MemoryQueryStore::with(Vec::new());
        let orchestrator = orchestrator(executor());

        let err = orchestrator
            .prepare_and_run(
                store.as_ref(),
                &mut context(10),
                QueryId::new(9),
                false,
                &LogParams::new(),
                &Principal::new("u-1", "alice"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::QueryNotFound(_)));
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test]
    async fn test_username_recorded_on_context() {
        let store = MemoryQueryStore::with(vec![Query::new(1, 1).with_sql("SELECT 1")]);
        let orchestrator = orchestrator(executor());
        let mut ctx = context(10);

        orchestrator
            .prepare_and_run(
                store.as_ref(),
                &mut ctx,
                QueryId::new(1),
                false,
                &LogParams::new(),
                &Principal::new("u-1", "alice"),
            )
            .await
            .unwrap();

        assert_eq!(ctx.username.as_deref(), Some("alice"));
        assert_eq!(ctx.query.unwrap().limit, Some(10));
    }

    #[tokio::test]
    async fn test_context_follows_record_database() {
        let store = MemoryQueryStore::with(vec![Query::new(4, 2).with_sql("SELECT 1")]);
        let orchestrator = orchestrator(executor());
        let mut ctx = context(10);

        orchestrator
            .prepare_and_run(
                store.as_ref(),
                &mut ctx,
                QueryId::new(4),
                false,
                &LogParams::new(),
                &Principal::new("u-1", "alice"),
            )
            .await
            .unwrap();

        assert_eq!(
            ctx.database,
            Some(DatabaseRef::new(2, "inventory", "sqlite"))
        );
    }

    #[tokio::test]
    async fn test_unregistered_record_database_marks_failed() {
        let store = MemoryQueryStore::with(vec![Query::new(5, 77).with_sql("SELECT 1")]);
        let executor = executor();
        let orchestrator = orchestrator(executor.clone());

        let err = orchestrator
            .prepare_and_run(
                store.as_ref(),
                &mut ExecutionContext::unbound(10),
                QueryId::new(5),
                false,
                &LogParams::new(),
                &Principal::new("u-1", "alice"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(store.stored(5).status, QueryStatus::Failed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }
}
