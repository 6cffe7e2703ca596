//! Admin key authentication.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use voidnet_state::StateStore;
use voidnet_uplink::API_KEY_HEADER;

use crate::handlers::error_response;

/// Reject requests whose `X-API-Key` does not match the admin credential.
pub async fn require_admin_key(
    State(store): State<StateStore>,
    req: Request,
    next: Next,
) -> Response {
    let Some(presented) = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        debug!(path = %req.uri().path(), "request without API key");
        return error_response("missing API key", StatusCode::UNAUTHORIZED).into_response();
    };

    match store.verify_admin_secret(presented) {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            debug!(path = %req.uri().path(), "request with invalid API key");
            error_response("invalid API key", StatusCode::UNAUTHORIZED).into_response()
        }
        Err(e) => {
            error!(error = %e, "credential lookup failed");
            error_response("credential lookup failed", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}
