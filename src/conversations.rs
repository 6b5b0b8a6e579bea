//! Per-viewer conversation summaries derived from the message log.
//!
//! Conversations are never stored. Each call folds the viewer's messages,
//! grouped by counterpart, into one summary per partner.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::storage::{MessageRow, Storage, StorageError};

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub partner_id: String,
    pub last_message: MessageRow,
    pub unread_count: u32,
}

/// `true` when `candidate` was created after `current`.
fn is_later(candidate: &MessageRow, current: &MessageRow) -> bool {
    (candidate.created_at, candidate.seq) > (current.created_at, current.seq)
}

/// List the viewer's conversations, most recent first.
///
/// Scans the viewer's messages once. Conversations whose last messages share
/// a timestamp are ordered by partner id.
pub fn list_conversations(
    storage: &Storage,
    viewer_id: &str,
) -> Result<Vec<ConversationSummary>, StorageError> {
    let mut by_partner: HashMap<String, ConversationSummary> = HashMap::new();

    for message in storage.messages_involving(viewer_id)? {
        let unread = message.receiver_id == viewer_id && !message.is_read;
        let partner_id = message.partner_of(viewer_id).to_string();

        match by_partner.entry(partner_id) {
            Entry::Occupied(mut entry) => {
                let summary = entry.get_mut();
                if unread {
                    summary.unread_count += 1;
                }
                if is_later(&message, &summary.last_message) {
                    summary.last_message = message;
                }
            }
            Entry::Vacant(entry) => {
                let partner_id = entry.key().clone();
                entry.insert(ConversationSummary {
                    partner_id,
                    last_message: message,
                    unread_count: u32::from(unread),
                });
            }
        }
    }

    let mut summaries: Vec<ConversationSummary> = by_partner.into_values().collect();
    summaries.sort_by(|a, b| {
        b.last_message
            .created_at
            .cmp(&a.last_message.created_at)
            .then_with(|| a.partner_id.cmp(&b.partner_id))
    });
    Ok(summaries)
}

/// The full thread between viewer and partner, oldest first. Empty when the
/// two have never exchanged a message.
pub fn get_conversation(
    storage: &Storage,
    viewer_id: &str,
    partner_id: &str,
) -> Result<Vec<MessageRow>, StorageError> {
    if partner_id.is_empty() || partner_id == viewer_id {
        return Ok(Vec::new());
    }
    storage.list_between(viewer_id, partner_id)
}

/// Sum of unread counts over every conversation of the viewer.
pub fn total_unread(storage: &Storage, viewer_id: &str) -> Result<u32, StorageError> {
    Ok(list_conversations(storage, viewer_id)?
        .iter()
        .map(|c| c.unread_count)
        .sum())
}
