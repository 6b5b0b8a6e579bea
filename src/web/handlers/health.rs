//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::service::Operation;
use crate::web::state::SharedState;
use crate::web::utils::messaging_error_response;

pub async fn health_handler(State(state): State<SharedState>) -> Response {
    let st = match state.lock(Operation::ListConversations, None).await {
        Ok(st) => st,
        Err(e) => return messaging_error_response(&e),
    };
    let store_ok = st.service.storage().read_watermark().is_ok();

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "maxContentChars": st.service.storage().max_content_chars(),
    });
    (status, axum::Json(body)).into_response()
}
