//! Assemble the application from configuration

use anyhow::Context;
use querydesk_core::collaborators::Translator;
use querydesk_core::template::SqlTemplateRenderer;
use querydesk_sqllab::{
    AsynchronousSqlExecutor, Collaborators, DatabaseAccessValidator, DatabaseCatalog,
    GenericDialect, LocalWorkQueue, QueryOrchestrator, RunQueryTask, SqlxDatabaseBackend,
    SynchronousSqlExecutor, WorkQueueConfig,
};
use querydesk_tenancy::{
    BindRegistry, RegistryQueryStoreResolver, SqlTenantDirectory, TenantRouterConfig,
    TenantSessionRouter, run_migrations,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::app::AppState;
use crate::config::ServerConfig;
use crate::translator::{HttpTranslator, UnconfiguredTranslator};

/// Build the shared state; starts the work queue's workers
///
/// Must be called from within a tokio runtime.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let tenancy = &config.tenancy;
    let registry = Arc::new(BindRegistry::with_binds(
        tenancy.database_uri.clone(),
        &tenancy.binds,
        tenancy.pool.clone(),
    ));
    info!("✓ Bind registry created ({} binds)", registry.len());

    let tenant_router = Arc::new(TenantSessionRouter::new(
        registry.clone(),
        Arc::new(SqlTenantDirectory::new(registry.clone())),
        TenantRouterConfig::new(tenancy.database_template.clone())
            .with_exemptions(tenancy.exemptions.clone()),
    ));

    let catalog = Arc::new(DatabaseCatalog::new(config.databases.clone()));
    let backend = Arc::new(SqlxDatabaseBackend::new(&catalog, tenancy.pool.clone()));
    let dialect = Arc::new(GenericDialect::new());
    info!("✓ {} target databases registered", catalog.len());

    let translator: Arc<dyn Translator> = match &config.translator.endpoint {
        Some(endpoint) => {
            info!("✓ Translator endpoint: {}", endpoint);
            Arc::new(
                HttpTranslator::new(
                    endpoint.clone(),
                    Duration::from_secs(config.translator.timeout_seconds),
                )
                .context("Failed to create translator client")?,
            )
        }
        None => {
            info!("Natural-language translation disabled (no translator endpoint)");
            Arc::new(UnconfiguredTranslator)
        }
    };

    let collaborators = Collaborators {
        translator,
        schema: backend.clone(),
        renderer: Arc::new(SqlTemplateRenderer::new()),
        validator: Arc::new(DatabaseAccessValidator::new(catalog.clone())),
        dialect: dialect.clone(),
        databases: catalog.clone(),
    };

    let task = Arc::new(RunQueryTask::new(
        Arc::new(RegistryQueryStoreResolver::new(registry.clone())),
        dialect,
        backend,
    ));

    let sqllab = &config.sqllab;
    let queue = Arc::new(LocalWorkQueue::start(
        task.clone(),
        WorkQueueConfig {
            worker_count: sqllab.worker_count,
            capacity: sqllab.queue_capacity,
            task_time_limit: sqllab.task_time_limit(),
            results_backend: sqllab.backend_persistence,
        },
    ));
    info!(
        "✓ Work queue started ({} workers, timeout {}s for synchronous runs)",
        sqllab.worker_count, sqllab.timeout_seconds
    );

    Ok(AppState {
        sync_orchestrator: Arc::new(QueryOrchestrator::new(
            collaborators.clone(),
            Arc::new(SynchronousSqlExecutor::new(task, sqllab.timeout())),
        )),
        async_orchestrator: Arc::new(QueryOrchestrator::new(
            collaborators,
            Arc::new(AsynchronousSqlExecutor::new(queue)),
        )),
        catalog,
        registry,
        tenant_router,
        sqllab: sqllab.clone(),
    })
}

/// Apply the bootstrap schema to the default store and every configured bind
pub async fn init_databases(registry: &BindRegistry) -> anyhow::Result<()> {
    for key in registry.keys() {
        let Some(target) = registry.get(&key) else {
            continue;
        };
        let pool = target
            .pool()
            .with_context(|| format!("Failed to open bind '{}'", key))?;
        run_migrations(&pool)
            .await
            .with_context(|| format!("Failed to migrate bind '{}'", key))?;
        info!("✓ Schema ready on bind '{}'", key);
    }
    Ok(())
}
