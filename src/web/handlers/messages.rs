//! Message sending and lookup handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::service::Operation;
use crate::web::session::Viewer;
use crate::web::state::SharedState;
use crate::web::utils::{message_to_json, messaging_error_response};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    receiver_id: String,
    #[serde(default)]
    content: String,
}

/// POST /api/messages
pub async fn send_message_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
    axum::Json(req): axum::Json<SendMessageRequest>,
) -> Response {
    let st = match state.lock(Operation::Send, Some(&req.receiver_id)).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.send(&viewer, &req.receiver_id, &req.content) {
        Ok(message) => (StatusCode::CREATED, axum::Json(message_to_json(&message))).into_response(),
        Err(e) => messaging_error_response(&e),
    }
}

/// GET /api/messages/unread-count
pub async fn unread_count_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
) -> Response {
    let st = match state.lock(Operation::UnreadTotal, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.unread_total(&viewer) {
        Ok(unread) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "unread": unread })),
        )
            .into_response(),
        Err(e) => messaging_error_response(&e),
    }
}

/// GET /api/messages/:message_id - only visible to its sender and receiver.
pub async fn get_message_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
    Path(message_id): Path<String>,
) -> Response {
    let st = match state.lock(Operation::GetMessage, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.get_message(&viewer, &message_id) {
        Ok(m) => (StatusCode::OK, axum::Json(message_to_json(&m))).into_response(),
        Err(e) => messaging_error_response(&e),
    }
}
