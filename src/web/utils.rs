//! Shared helpers for the JSON API: error bodies and wire shapes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::service::{ConversationEntry, ErrorKind, MessagingError};
use crate::storage::{MessageRow, UserRow};

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

/// Map a service error to its HTTP status and a body naming the failed
/// operation and conversation.
pub fn messaging_error_response(e: &MessagingError) -> Response {
    let status = match e.kind {
        ErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
        ErrorKind::TransientStore(_) => {
            crate::tlog!("store failure: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    let body = serde_json::json!({
        "error": e.to_string(),
        "kind": e.kind_str(),
        "operation": e.operation.as_str(),
        "partnerId": e.partner_id,
        "retryable": e.is_retryable(),
    });
    (status, axum::Json(body)).into_response()
}

pub fn message_to_json(m: &MessageRow) -> serde_json::Value {
    serde_json::json!({
        "id": m.message_id,
        "senderId": m.sender_id,
        "receiverId": m.receiver_id,
        "content": m.content,
        "createdAt": m.created_at,
        "isRead": m.is_read,
    })
}

pub fn user_to_json(u: &UserRow) -> serde_json::Value {
    serde_json::json!({
        "id": u.user_id,
        "username": u.username,
        "fullName": u.full_name,
        "avatarUrl": u.avatar_url,
    })
}

pub fn conversation_to_json(c: &ConversationEntry) -> serde_json::Value {
    let last = &c.summary.last_message;
    serde_json::json!({
        "partnerId": c.summary.partner_id,
        "partner": c.partner.as_ref().map(user_to_json),
        "lastMessage": {
            "id": last.message_id,
            "content": last.content,
            "createdAt": last.created_at,
            "senderId": last.sender_id,
        },
        "unreadCount": c.summary.unread_count,
    })
}

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
