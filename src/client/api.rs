//! Client transport: the network contract the synchronizer depends on, and
//! a blocking HTTP implementation of it.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use urlencoding::encode;

use crate::web::session::VIEWER_HEADER;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: u64,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: String,
    pub content: String,
    pub created_at: u64,
    pub sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub partner_id: String,
    pub partner: Option<UserProfile>,
    pub last_message: LastMessage,
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub flipped: u32,
    pub unread_count: u32,
    pub total_unread: u32,
}

#[derive(Deserialize)]
struct Flipped {
    flipped: u32,
}

#[derive(Deserialize)]
struct Unread {
    unread: u32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    /// The server could not reach its store.
    Transient(String),
    /// No response within the request timeout.
    Timeout,
    Unauthorized,
    Http(u16, String),
    Decode(String),
}

impl ApiError {
    /// Whether the user could reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transient(_) | ApiError::Timeout => true,
            ApiError::Http(code, _) => *code >= 500,
            _ => false,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "rejected: {msg}"),
            ApiError::NotFound(msg) => write!(f, "not found: {msg}"),
            ApiError::Transient(msg) => write!(f, "temporarily unavailable: {msg}"),
            ApiError::Timeout => write!(f, "request timed out"),
            ApiError::Unauthorized => write!(f, "not signed in"),
            ApiError::Http(code, msg) => write!(f, "http error {code}: {msg}"),
            ApiError::Decode(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Everything the synchronizer needs from the messaging server, on behalf of
/// one signed-in viewer.
pub trait MessagingApi {
    fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;
    fn get_thread(&self, partner_id: &str) -> Result<Vec<Message>, ApiError>;
    fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message, ApiError>;
    fn mark_read(&self, partner_id: &str) -> Result<ReadResult, ApiError>;
    fn mark_all_read(&self) -> Result<u32, ApiError>;
    fn unread_total(&self) -> Result<u32, ApiError>;
    fn get_user(&self, user_id: &str) -> Result<UserProfile, ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpApi {
    base_url: String,
    viewer_id: String,
    agent: ureq::Agent,
}

impl HttpApi {
    /// Every request made through this client gives up after `timeout`.
    pub fn new(base_url: impl Into<String>, viewer_id: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            viewer_id: viewer_id.into(),
            agent,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .agent
            .get(&self.url(path))
            .set(VIEWER_HEADER, &self.viewer_id)
            .call()
            .map_err(map_ureq_error)?;
        decode(response)
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self
            .agent
            .post(&self.url(path))
            .set(VIEWER_HEADER, &self.viewer_id)
            .send_json(body)
            .map_err(map_ureq_error)?;
        decode(response)
    }
}

impl MessagingApi for HttpApi {
    fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/api/conversations")
    }

    fn get_thread(&self, partner_id: &str) -> Result<Vec<Message>, ApiError> {
        self.get_json(&format!("/api/conversations/{}", encode(partner_id)))
    }

    fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message, ApiError> {
        self.post_json(
            "/api/messages",
            serde_json::json!({ "receiverId": receiver_id, "content": content }),
        )
    }

    fn mark_read(&self, partner_id: &str) -> Result<ReadResult, ApiError> {
        self.post_json(
            &format!("/api/conversations/{}/read", encode(partner_id)),
            serde_json::json!({}),
        )
    }

    fn mark_all_read(&self) -> Result<u32, ApiError> {
        let body: Flipped = self.post_json("/api/messages/read-all", serde_json::json!({}))?;
        Ok(body.flipped)
    }

    fn unread_total(&self) -> Result<u32, ApiError> {
        let body: Unread = self.get_json("/api/messages/unread-count")?;
        Ok(body.unread)
    }

    fn get_user(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        self.get_json(&format!("/api/users/{}", encode(user_id)))
    }
}

fn decode<T: DeserializeOwned>(response: ureq::Response) -> Result<T, ApiError> {
    response
        .into_json()
        .map_err(|e| ApiError::Decode(e.to_string()))
}

fn map_ureq_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(code, response) => {
            let message = response
                .into_json::<serde_json::Value>()
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| format!("status {code}"));
            match code {
                400 => ApiError::Validation(message),
                401 => ApiError::Unauthorized,
                404 => ApiError::NotFound(message),
                503 => ApiError::Transient(message),
                _ => ApiError::Http(code, message),
            }
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                ApiError::Timeout
            } else {
                ApiError::Http(0, transport.to_string())
            }
        }
    }
}

fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes_are_camel_case() {
        let json = serde_json::json!({
            "partnerId": "b",
            "partner": null,
            "lastMessage": {"id": "m1", "content": "hi", "createdAt": 5, "senderId": "a"},
            "unreadCount": 2,
        });
        let c: Conversation = serde_json::from_value(json).unwrap();
        assert_eq!(c.partner_id, "b");
        assert_eq!(c.last_message.created_at, 5);
        assert_eq!(c.unread_count, 2);
        assert!(c.partner.is_none());
    }

    #[test]
    fn retryable_errors() {
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::Transient("locked".into()).is_retryable());
        assert!(ApiError::Http(502, "bad gateway".into()).is_retryable());
        assert!(!ApiError::Validation("empty".into()).is_retryable());
        assert!(!ApiError::Unauthorized.is_retryable());
    }

    #[test]
    fn timeout_found_in_source_chain() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "wrapped")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let timed_out = Wrapper(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(is_timeout(&timed_out));
        let refused = Wrapper(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "down",
        ));
        assert!(!is_timeout(&refused));
    }

    #[test]
    fn unreachable_server_is_not_a_status_error() {
        let api = HttpApi::new("http://127.0.0.1:1/", "alice", Duration::from_millis(200));
        match api.unread_total() {
            Err(ApiError::Http(0, _)) | Err(ApiError::Timeout) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
