//! Axum router construction.

use axum::routing::{get, post};
use axum::Router;

use crate::web::handlers;
use crate::web::state::SharedState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health::health_handler))
        // Conversations API
        .route(
            "/api/conversations",
            get(handlers::conversations::list_conversations_handler),
        )
        .route(
            "/api/conversations/:partner_id",
            get(handlers::conversations::get_conversation_handler),
        )
        .route(
            "/api/conversations/:partner_id/read",
            post(handlers::conversations::mark_read_handler),
        )
        // Messages API
        .route(
            "/api/messages",
            post(handlers::messages::send_message_handler),
        )
        .route(
            "/api/messages/read-all",
            post(handlers::conversations::mark_all_read_handler),
        )
        .route(
            "/api/messages/unread-count",
            get(handlers::messages::unread_count_handler),
        )
        .route(
            "/api/messages/conversation/:partner_id",
            get(handlers::conversations::get_conversation_handler),
        )
        .route(
            "/api/messages/:message_id",
            get(handlers::messages::get_message_handler),
        )
        // Users API
        .route(
            "/api/users/:user_id",
            get(handlers::users::get_user_handler).put(handlers::users::put_user_handler),
        )
        .with_state(state)
}
