//! axum wiring for the tenant session router

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use querydesk_core::Principal;
use std::sync::Arc;

use crate::router::TenantSessionRouter;

/// Bind the request to its caller's tenant store for the duration of the handler
///
/// Reads the [`Principal`] placed in the request extensions by an upstream
/// authenticator and exposes the request's
/// [`SessionHandle`](crate::session::SessionHandle) to handlers as an
/// extension. The default store is restored once the handler has produced a
/// response; if the handler future is dropped or panics the scope's `Drop`
/// does the same.
pub async fn tenant_session_middleware(
    State(router): State<Arc<TenantSessionRouter>>,
    mut req: Request,
    next: Next,
) -> Response {
    let principal = req.extensions().get::<Principal>().cloned();
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let mut scope = router
        .before_handling(principal.as_ref(), &path, method.as_str())
        .await;
    req.extensions_mut().insert(scope.handle());

    let response = next.run(req).await;

    router.after_handling(&mut scope);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind_registry::BindRegistry;
    use crate::directory::TenantDirectory;
    use crate::pool::PoolConfig;
    use crate::router::TenantRouterConfig;
    use crate::session::SessionHandle;
    use async_trait::async_trait;
    use axum::{Extension, Router, body::Body, http::StatusCode, middleware, routing::get};
    use querydesk_core::{Result, Tenant};
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct SingleTenant;

    #[async_trait]
    impl TenantDirectory for SingleTenant {
        async fn tenants_for_user(&self, _user_id: &str) -> Result<Vec<Tenant>> {
            Ok(vec![Tenant::new(1, "acme", "acme_db")])
        }
    }

    fn tenant_router() -> Arc<TenantSessionRouter> {
        Arc::new(TenantSessionRouter::new(
            Arc::new(BindRegistry::new("sqlite::memory:", PoolConfig::default())),
            Arc::new(SingleTenant),
            TenantRouterConfig::new("sqlite:file:${db_name}?mode=memory&cache=shared"),
        ))
    }

    fn app(captured: Arc<Mutex<Option<SessionHandle>>>) -> Router {
        let router = tenant_router();
        Router::new()
            .route(
                "/api/v1/sqllab/execute",
                get(move |Extension(handle): Extension<SessionHandle>| {
                    let captured = Arc::clone(&captured);
                    async move {
                        let key = handle.store_key().unwrap_or_else(|| "default".to_string());
                        *captured.lock().unwrap() = Some(handle);
                        key
                    }
                }),
            )
            .route(
                "/login",
                get(|Extension(handle): Extension<SessionHandle>| async move {
                    handle.store_key().unwrap_or_else(|| "default".to_string())
                }),
            )
            .layer(middleware::from_fn_with_state(
                router,
                tenant_session_middleware,
            ))
    }

    fn request(uri: &str, principal: Option<Principal>) -> Request {
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        if let Some(principal) = principal {
            req.extensions_mut().insert(principal);
        }
        req
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_handler_sees_tenant_and_default_is_restored() {
        let captured = Arc::new(Mutex::new(None));
        let response = app(Arc::clone(&captured))
            .oneshot(request(
                "/api/v1/sqllab/execute",
                Some(Principal::new("u-1", "alice")),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "acme");

        let handle = captured.lock().unwrap().take().unwrap();
        assert!(!handle.is_tenant_bound());
    }

    #[tokio::test]
    async fn test_anonymous_request_uses_default() {
        let captured = Arc::new(Mutex::new(None));
        let response = app(captured)
            .oneshot(request("/api/v1/sqllab/execute", None))
            .await
            .unwrap();

        assert_eq!(body_text(response).await, "default");
    }

    #[tokio::test]
    async fn test_exempt_route_uses_default() {
        let captured = Arc::new(Mutex::new(None));
        let response = app(captured)
            .oneshot(request("/login", Some(Principal::new("u-1", "alice"))))
            .await
            .unwrap();

        assert_eq!(body_text(response).await, "default");
    }
}
