//! Conversation list, thread, and read-state handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::service::Operation;
use crate::web::session::Viewer;
use crate::web::state::SharedState;
use crate::web::utils::{conversation_to_json, message_to_json, messaging_error_response};

/// GET /api/conversations
pub async fn list_conversations_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
) -> Response {
    let st = match state.lock(Operation::ListConversations, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.list_conversations(&viewer) {
        Ok(entries) => {
            let json: Vec<serde_json::Value> = entries.iter().map(conversation_to_json).collect();
            (StatusCode::OK, axum::Json(serde_json::json!(json))).into_response()
        }
        Err(e) => messaging_error_response(&e),
    }
}

/// GET /api/conversations/:partner_id - the thread, oldest first. A partner
/// with no shared messages gets an empty list.
pub async fn get_conversation_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
    Path(partner_id): Path<String>,
) -> Response {
    let st = match state
        .lock(Operation::GetConversation, Some(&partner_id))
        .await
    {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.get_conversation(&viewer, &partner_id) {
        Ok(messages) => {
            let json: Vec<serde_json::Value> = messages.iter().map(message_to_json).collect();
            (StatusCode::OK, axum::Json(serde_json::json!(json))).into_response()
        }
        Err(e) => messaging_error_response(&e),
    }
}

/// POST /api/conversations/:partner_id/read
pub async fn mark_read_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
    Path(partner_id): Path<String>,
) -> Response {
    let st = match state.lock(Operation::MarkRead, Some(&partner_id)).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.mark_conversation_read(&viewer, &partner_id) {
        Ok(receipt) => {
            let json = serde_json::json!({
                "partnerId": partner_id,
                "flipped": receipt.flipped,
                "unreadCount": receipt.conversation_unread,
                "totalUnread": receipt.total_unread,
            });
            (StatusCode::OK, axum::Json(json)).into_response()
        }
        Err(e) => messaging_error_response(&e),
    }
}

/// POST /api/messages/read-all
pub async fn mark_all_read_handler(
    State(state): State<SharedState>,
    Viewer(viewer): Viewer,
) -> Response {
    let st = match state.lock(Operation::MarkAllRead, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    match st.service.mark_all_read(&viewer) {
        Ok(flipped) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "flipped": flipped })),
        )
            .into_response(),
        Err(e) => messaging_error_response(&e),
    }
}
