//! API-key authentication middleware.
//!
//! Protected routes require `Authorization: Bearer <api-key>`; the key is
//! resolved through the user store and the resulting identity is attached
//! to the request for downstream handlers.

use crate::{metrics, AppState};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Identity resolved from a bearer credential.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// User row id.
    pub id: i64,
    /// Display name.
    pub name: String,
}

/// Reject requests without a valid API key.
pub async fn require_api_key(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(header_value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, "authorization required").into_response();
    };

    let api_key = header_value.strip_prefix("Bearer ").unwrap_or(header_value);

    match state.store.user_by_api_key(api_key).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(AuthUser {
                id: user.id,
                name: user.name,
            });
            next.run(req).await
        }
        Ok(None) => {
            metrics::record_auth_failure();
            (StatusCode::UNAUTHORIZED, "invalid api key").into_response()
        }
        Err(err) => {
            error!(error = %err, "credential lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "credential lookup failed").into_response()
        }
    }
}
