//! Messaging service: the operations the HTTP surface exposes, with input
//! validation in front of the store and errors that name the operation and
//! conversation they came from.
//!
//! Nothing here retries. A transient store failure is reported once and the
//! caller decides whether to try again.

use crate::conversations::{self, ConversationSummary};
use crate::logging;
use crate::read_state::{self, ReadReceipt};
use crate::storage::{validate_message, MessageRow, Storage, StorageError, UserRow, ValidationError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListConversations,
    GetConversation,
    GetMessage,
    Send,
    MarkRead,
    MarkAllRead,
    UnreadTotal,
    GetUser,
    UpsertUser,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ListConversations => "list_conversations",
            Operation::GetConversation => "get_conversation",
            Operation::GetMessage => "get_message",
            Operation::Send => "send",
            Operation::MarkRead => "mark_read",
            Operation::MarkAllRead => "mark_all_read",
            Operation::UnreadTotal => "unread_total",
            Operation::GetUser => "get_user",
            Operation::UpsertUser => "upsert_user",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    /// Rejected before persistence.
    Validation(ValidationError),
    /// A user that does not exist.
    NotFound(String),
    /// The store could not complete the operation. Safe to retry by hand.
    TransientStore(String),
}

#[derive(Debug)]
pub struct MessagingError {
    pub operation: Operation,
    pub partner_id: Option<String>,
    pub kind: ErrorKind,
}

impl MessagingError {
    pub fn validation(operation: Operation, partner_id: Option<&str>, e: ValidationError) -> Self {
        Self {
            operation,
            partner_id: partner_id.map(str::to_string),
            kind: ErrorKind::Validation(e),
        }
    }

    pub fn not_found(operation: Operation, what: impl Into<String>) -> Self {
        Self {
            operation,
            partner_id: None,
            kind: ErrorKind::NotFound(what.into()),
        }
    }

    pub fn transient(operation: Operation, partner_id: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            operation,
            partner_id: partner_id.map(str::to_string),
            kind: ErrorKind::TransientStore(detail.into()),
        }
    }

    fn from_storage(operation: Operation, partner_id: Option<&str>, e: StorageError) -> Self {
        match e {
            StorageError::Invalid(v) => Self::validation(operation, partner_id, v),
            other => Self::transient(operation, partner_id, other.to_string()),
        }
    }

    /// Whether a user-triggered retry could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::TransientStore(_))
    }

    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation(_) => "validation",
            ErrorKind::NotFound(_) => "not_found",
            ErrorKind::TransientStore(_) => "transient_store",
        }
    }
}

impl std::fmt::Display for MessagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(partner) = &self.partner_id {
            write!(f, " (partner {partner})")?;
        }
        match &self.kind {
            ErrorKind::Validation(e) => write!(f, ": {e}"),
            ErrorKind::NotFound(what) => write!(f, ": not found: {what}"),
            ErrorKind::TransientStore(detail) => write!(f, ": store unavailable: {detail}"),
        }
    }
}

impl std::error::Error for MessagingError {}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A conversation summary joined with the partner's identity, when known.
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub summary: ConversationSummary,
    pub partner: Option<UserRow>,
}

pub struct MessagingService {
    storage: Storage,
}

impl MessagingService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn list_conversations(
        &self,
        viewer_id: &str,
    ) -> Result<Vec<ConversationEntry>, MessagingError> {
        let op = Operation::ListConversations;
        let summaries = conversations::list_conversations(&self.storage, viewer_id)
            .map_err(|e| MessagingError::from_storage(op, None, e))?;

        summaries
            .into_iter()
            .map(|summary| {
                let partner = self
                    .storage
                    .get_user(&summary.partner_id)
                    .map_err(|e| MessagingError::from_storage(op, Some(&summary.partner_id), e))?;
                Ok(ConversationEntry { summary, partner })
            })
            .collect()
    }

    /// The thread with `partner_id`. An unknown partner or a partner with no
    /// shared messages yields an empty thread.
    pub fn get_conversation(
        &self,
        viewer_id: &str,
        partner_id: &str,
    ) -> Result<Vec<MessageRow>, MessagingError> {
        conversations::get_conversation(&self.storage, viewer_id, partner_id).map_err(|e| {
            MessagingError::from_storage(Operation::GetConversation, Some(partner_id), e)
        })
    }

    /// A single message, visible only to its sender and receiver. Anyone
    /// else gets the same NotFound as for a missing id.
    pub fn get_message(
        &self,
        viewer_id: &str,
        message_id: &str,
    ) -> Result<MessageRow, MessagingError> {
        let op = Operation::GetMessage;
        match self.storage.get_message(message_id) {
            Ok(Some(m)) if m.sender_id == viewer_id || m.receiver_id == viewer_id => Ok(m),
            Ok(_) => Err(MessagingError::not_found(op, format!("message {message_id}"))),
            Err(e) => Err(MessagingError::from_storage(op, None, e)),
        }
    }

    pub fn send(
        &self,
        viewer_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<MessageRow, MessagingError> {
        let op = Operation::Send;
        let partner = Some(receiver_id);
        validate_message(viewer_id, receiver_id, content, self.storage.max_content_chars())
            .map_err(|e| MessagingError::validation(op, partner, e))?;

        let known = self
            .storage
            .has_user(receiver_id)
            .map_err(|e| MessagingError::from_storage(op, partner, e))?;
        if !known {
            return Err(MessagingError::validation(
                op,
                partner,
                ValidationError::UnknownReceiver(receiver_id.to_string()),
            ));
        }

        let message = self
            .storage
            .append(viewer_id, receiver_id, content)
            .map_err(|e| MessagingError::from_storage(op, partner, e))?;

        crate::tlog!(
            "send: {} -> {} (id={})",
            logging::user_id(viewer_id),
            logging::user_id(receiver_id),
            logging::msg_id(&message.message_id)
        );
        Ok(message)
    }

    pub fn mark_conversation_read(
        &self,
        viewer_id: &str,
        partner_id: &str,
    ) -> Result<ReadReceipt, MessagingError> {
        let op = Operation::MarkRead;
        let partner = Some(partner_id);
        if partner_id.trim().is_empty() {
            return Err(MessagingError::validation(op, partner, ValidationError::MissingPartner));
        }
        if partner_id == viewer_id {
            return Err(MessagingError::validation(op, partner, ValidationError::SelfMessage));
        }

        let receipt = read_state::mark_conversation_read(&self.storage, viewer_id, partner_id)
            .map_err(|e| MessagingError::from_storage(op, partner, e))?;

        if receipt.flipped > 0 {
            crate::tlog!(
                "read: {} read {} message(s) from {}",
                logging::user_id(viewer_id),
                receipt.flipped,
                logging::user_id(partner_id)
            );
        }
        Ok(receipt)
    }

    pub fn mark_all_read(&self, viewer_id: &str) -> Result<u32, MessagingError> {
        let flipped = read_state::mark_all_read(&self.storage, viewer_id)
            .map_err(|e| MessagingError::from_storage(Operation::MarkAllRead, None, e))?;
        if flipped > 0 {
            crate::tlog!(
                "read: {} marked {} message(s) read",
                logging::user_id(viewer_id),
                flipped
            );
        }
        Ok(flipped)
    }

    pub fn unread_total(&self, viewer_id: &str) -> Result<u32, MessagingError> {
        conversations::total_unread(&self.storage, viewer_id)
            .map_err(|e| MessagingError::from_storage(Operation::UnreadTotal, None, e))
    }

    pub fn get_user(&self, user_id: &str) -> Result<UserRow, MessagingError> {
        let op = Operation::GetUser;
        match self.storage.get_user(user_id) {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(MessagingError::not_found(op, format!("user {user_id}"))),
            Err(e) => Err(MessagingError::from_storage(op, None, e)),
        }
    }

    pub fn upsert_user(&self, row: &UserRow) -> Result<(), MessagingError> {
        self.storage
            .upsert_user(row)
            .map_err(|e| MessagingError::from_storage(Operation::UpsertUser, None, e))
    }
}
