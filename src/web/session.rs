//! Viewer identity supplied by the session layer.
//!
//! Authentication happens upstream; by the time a request reaches this
//! server the session layer has put the authenticated user id in the
//! `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;

use crate::web::utils::api_error;

pub const VIEWER_HEADER: &str = "x-user-id";

/// The user on whose behalf the request is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(VIEWER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if id.is_empty() {
            return Err(api_error(
                StatusCode::UNAUTHORIZED,
                format!("missing {VIEWER_HEADER} header"),
            ));
        }
        Ok(Viewer(id.to_string()))
    }
}
