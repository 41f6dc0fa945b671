//! Caller identity from trusted upstream headers

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use querydesk_core::Principal;

pub const USER_ID_HEADER: &str = "x-querydesk-user-id";
pub const USERNAME_HEADER: &str = "x-querydesk-username";

/// Principal named by the request headers; anonymous without a user id
pub fn principal_from_headers(headers: &HeaderMap) -> Principal {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    match header(USER_ID_HEADER) {
        Some(user_id) => {
            let username = header(USERNAME_HEADER).unwrap_or_else(|| user_id.clone());
            Principal::new(user_id, username)
        }
        None => Principal::anonymous(),
    }
}

/// Attach the caller's [`Principal`] to the request extensions
pub async fn principal_middleware(mut req: Request, next: Next) -> Response {
    let principal = principal_from_headers(req.headers());
    req.extensions_mut().insert(principal);
    next.run(req).await
}
