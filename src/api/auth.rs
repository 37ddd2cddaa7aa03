//! Shared-token check for worker endpoints.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use super::error::ApiError;
use super::routes::AppState;

/// Proof that a request carried the worker token, either as
/// `Authorization: Bearer <token>` or as a `?token=` query parameter.
///
/// Browsers cannot set headers on `EventSource`, hence the query fallback.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl FromRequestParts<AppState> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .map(String::from);
        let presented = match from_header {
            Some(token) => Some(token),
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|q| q.0.token),
        };

        match presented {
            Some(token) if token == state.token.expose_secret() => Ok(Authorized),
            _ => {
                debug!(path = %parts.uri.path(), "Rejected request without valid token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}
