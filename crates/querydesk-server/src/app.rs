//! HTTP API
//!
//! SQL Lab endpoints run behind two middlewares: the principal is read from
//! the trusted upstream headers, then the tenant session router binds the
//! request to the caller's store. Handlers only see the request's
//! [`SessionHandle`], never a process-wide store.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use querydesk_core::{
    Error, ExecutionContext, ExecutionStatus, LogParams, Principal, Query, QueryId, QueryStore,
};
use querydesk_sqllab::{DatabaseCatalog, QueryOrchestrator};
use querydesk_tenancy::{BindRegistry, SessionHandle, TenantSessionRouter, tenant_session_middleware};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::SqlLabConfig;
use crate::error::ApiError;
use crate::principal::principal_middleware;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Runs queries in-process under the configured deadline
    pub sync_orchestrator: Arc<QueryOrchestrator>,
    /// Dispatches queries to the work queue
    pub async_orchestrator: Arc<QueryOrchestrator>,
    pub catalog: Arc<DatabaseCatalog>,
    pub registry: Arc<BindRegistry>,
    pub tenant_router: Arc<TenantSessionRouter>,
    pub sqllab: SqlLabConfig,
}

impl AppState {
    fn orchestrator(&self, run_async: bool) -> &QueryOrchestrator {
        if run_async {
            &self.async_orchestrator
        } else {
            &self.sync_orchestrator
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub query_id: i64,
    /// Requested row limit; the configured default applies when absent
    pub limit: Option<i64>,
    #[serde(default)]
    pub select_as_cta: bool,
    /// Only `TABLE` is supported
    pub ctas_method: Option<String>,
    #[serde(default)]
    pub template_params: serde_json::Map<String, serde_json::Value>,
    /// Overrides the configured execution mode
    pub run_async: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub query_id: i64,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQueryRequest {
    pub database_id: i64,
    pub sql: Option<String>,
    pub nl_query: Option<String>,
    #[serde(default)]
    pub select_as_cta: bool,
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let sqllab = Router::new()
        .route("/api/v1/sqllab/execute", post(execute_query))
        .route("/api/v1/sqllab/query", post(create_query))
        .route("/api/v1/sqllab/query/{id}", get(get_query))
        .layer(middleware::from_fn_with_state(
            state.tenant_router.clone(),
            tenant_session_middleware,
        ))
        .layer(middleware::from_fn(principal_middleware))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(sqllab)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run a stored query through the execution pipeline
async fn execute_query(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(session): Extension<SessionHandle>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    if let Some(method) = &request.ctas_method
        && !method.eq_ignore_ascii_case("TABLE")
    {
        return Err(Error::InvalidRequest(format!("Unsupported CTAS method: {}", method)).into());
    }

    let limit = request.limit.unwrap_or(state.sqllab.default_limit);
    if limit <= 0 {
        return Err(Error::InvalidRequest("limit must be positive".to_string()).into());
    }

    // The database is taken from the stored query
    let mut context = ExecutionContext::unbound(limit)
        .with_select_as_cta(request.select_as_cta)
        .with_template_params(request.template_params)
        .with_store_key(session.store_key());

    let run_async = request.run_async.unwrap_or(state.sqllab.run_async);
    let mut log_params = LogParams::new();
    log_params.insert("run_async".to_string(), run_async.into());

    let store = session.query_store()?;
    let status = state
        .orchestrator(run_async)
        .prepare_and_run(
            &store,
            &mut context,
            QueryId::new(request.query_id),
            state.sqllab.ctas_no_limit,
            &log_params,
            &principal,
        )
        .await?;

    let code = match status {
        ExecutionStatus::Running => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((
        code,
        Json(ExecuteResponse {
            query_id: request.query_id,
            status,
        }),
    ))
}

/// Store a new query record on the request's store
async fn create_query(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Json(request): Json<CreateQueryRequest>,
) -> Result<(StatusCode, Json<Query>), ApiError> {
    state.catalog.database_ref(request.database_id)?;
    if request.sql.is_none() && request.nl_query.is_none() {
        return Err(Error::InvalidRequest("Either sql or nl_query is required".to_string()).into());
    }

    let mut query = Query::new(0, request.database_id);
    query.sql = request.sql;
    query.nl_query = request.nl_query;
    query.select_as_cta = request.select_as_cta;

    let query = session.query_store()?.create_query(query).await?;
    info!(query_id = %query.id, tenant = ?session.store_key(), "Created query");
    Ok((StatusCode::CREATED, Json(query)))
}

/// Poll the persisted state of a query
async fn get_query(
    Extension(session): Extension<SessionHandle>,
    Path(id): Path<i64>,
) -> Result<Json<Query>, ApiError> {
    let query = session.query_store()?.get_query(QueryId::new(id)).await?;
    Ok(Json(query))
}
