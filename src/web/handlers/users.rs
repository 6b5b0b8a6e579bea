//! User identity lookup and publication.
//!
//! The identity provider publishes users with `PUT`; clients look up a
//! partner with `GET` when messaging someone for the first time.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::service::Operation;
use crate::storage::UserRow;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, messaging_error_response, now_secs, user_to_json};

/// GET /api/users/:user_id
pub async fn get_user_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Response {
    let st = match state.lock(Operation::GetUser, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.get_user(&user_id) {
        Ok(user) => (StatusCode::OK, axum::Json(user_to_json(&user))).into_response(),
        Err(e) => messaging_error_response(&e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutUserRequest {
    username: String,
    full_name: Option<String>,
    avatar_url: Option<String>,
}

/// PUT /api/users/:user_id
pub async fn put_user_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    axum::Json(req): axum::Json<PutUserRequest>,
) -> Response {
    if req.username.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "username cannot be empty");
    }
    let row = UserRow {
        user_id,
        username: req.username,
        full_name: req.full_name,
        avatar_url: req.avatar_url,
        updated_at: now_secs(),
    };

    let st = match state.lock(Operation::UpsertUser, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.upsert_user(&row) {
        Ok(()) => (StatusCode::OK, axum::Json(user_to_json(&row))).into_response(),
        Err(e) => messaging_error_response(&e),
    }
}
