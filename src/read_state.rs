//! Read-state reconciliation.
//!
//! Marking a conversation read is a two-step protocol: take a
//! [`ReadWatermark`], then flip every unread message from the partner whose
//! sequence is at or below it. The flip is a single predicate-scoped UPDATE,
//! so a message the partner sends between the two steps stays unread and no
//! message that was unread at the watermark is skipped.

use crate::storage::{ReadWatermark, Storage, StorageError};

/// Outcome of a mark-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceipt {
    /// Messages that went from unread to read.
    pub flipped: u32,
    /// Unread messages still left in this conversation (arrivals after the
    /// watermark).
    pub conversation_unread: u32,
    /// Unread messages left across all of the viewer's conversations.
    pub total_unread: u32,
}

/// A mark-read that has taken its watermark but not yet written.
#[derive(Debug, Clone)]
pub struct PendingRead {
    viewer_id: String,
    partner_id: String,
    watermark: ReadWatermark,
}

/// First half of a mark-read: record which messages it may touch.
pub fn begin_read(
    storage: &Storage,
    viewer_id: &str,
    partner_id: &str,
) -> Result<PendingRead, StorageError> {
    Ok(PendingRead {
        viewer_id: viewer_id.to_string(),
        partner_id: partner_id.to_string(),
        watermark: storage.read_watermark()?,
    })
}

/// Second half of a mark-read: flip what was unread at the watermark.
pub fn commit_read(storage: &Storage, pending: &PendingRead) -> Result<ReadReceipt, StorageError> {
    let flipped =
        storage.mark_read_up_to(&pending.viewer_id, &pending.partner_id, pending.watermark)?;
    receipt(storage, &pending.viewer_id, &pending.partner_id, flipped)
}

/// Mark every message the partner has sent the viewer so far as read.
pub fn mark_conversation_read(
    storage: &Storage,
    viewer_id: &str,
    partner_id: &str,
) -> Result<ReadReceipt, StorageError> {
    let flipped = storage.mark_read(viewer_id, partner_id)?;
    receipt(storage, viewer_id, partner_id, flipped)
}

/// Mark everything addressed to the viewer so far as read, across all
/// conversations. Returns how many messages flipped.
pub fn mark_all_read(storage: &Storage, viewer_id: &str) -> Result<u32, StorageError> {
    let watermark = storage.read_watermark()?;
    storage.mark_all_read_up_to(viewer_id, watermark)
}

fn receipt(
    storage: &Storage,
    viewer_id: &str,
    partner_id: &str,
    flipped: u32,
) -> Result<ReadReceipt, StorageError> {
    Ok(ReadReceipt {
        flipped,
        conversation_unread: storage.count_unread_from(viewer_id, partner_id)?,
        total_unread: storage.count_unread(viewer_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{list_conversations, total_unread};

    fn test_storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn mark_read_twice_flips_nothing_the_second_time() {
        let storage = test_storage();
        storage.append("a", "b", "hi").unwrap();
        storage.append("b", "a", "hello").unwrap();

        let first = mark_conversation_read(&storage, "a", "b").unwrap();
        assert_eq!(first.flipped, 1);
        assert_eq!(first.conversation_unread, 0);

        let second = mark_conversation_read(&storage, "a", "b").unwrap();
        assert_eq!(second.flipped, 0);
        assert_eq!(second.total_unread, 0);

        let list = list_conversations(&storage, "a").unwrap();
        assert_eq!(list[0].unread_count, 0);
    }

    #[test]
    fn append_between_snapshot_and_write_stays_unread() {
        let storage = test_storage();
        storage.append("partner", "viewer", "old").unwrap();

        let pending = begin_read(&storage, "viewer", "partner").unwrap();
        let late = storage.append("partner", "viewer", "new").unwrap();
        let receipt = commit_read(&storage, &pending).unwrap();

        assert_eq!(receipt.flipped, 1);
        assert_eq!(receipt.conversation_unread, 1);
        let stored = storage.get_message(&late.message_id).unwrap().unwrap();
        assert!(!stored.is_read);
        assert_eq!(total_unread(&storage, "viewer").unwrap(), 1);
    }

    #[test]
    fn commit_skips_messages_read_elsewhere() {
        let storage = test_storage();
        storage.append("partner", "viewer", "one").unwrap();
        storage.append("partner", "viewer", "two").unwrap();

        // Two tabs start a mark-read; the first to commit flips both
        let tab_one = begin_read(&storage, "viewer", "partner").unwrap();
        let tab_two = begin_read(&storage, "viewer", "partner").unwrap();
        assert_eq!(commit_read(&storage, &tab_one).unwrap().flipped, 2);
        assert_eq!(commit_read(&storage, &tab_two).unwrap().flipped, 0);
    }

    #[test]
    fn mark_read_does_not_touch_other_conversations() {
        let storage = test_storage();
        storage.append("bob", "alice", "from bob").unwrap();
        storage.append("carol", "alice", "from carol").unwrap();

        let receipt = mark_conversation_read(&storage, "alice", "bob").unwrap();
        assert_eq!(receipt.flipped, 1);
        assert_eq!(receipt.total_unread, 1);
    }

    #[test]
    fn mark_all_read_clears_every_conversation() {
        let storage = test_storage();
        storage.append("bob", "alice", "from bob").unwrap();
        storage.append("carol", "alice", "from carol").unwrap();
        storage.append("alice", "bob", "mine").unwrap();

        assert_eq!(mark_all_read(&storage, "alice").unwrap(), 2);
        assert_eq!(total_unread(&storage, "alice").unwrap(), 0);
        assert!(list_conversations(&storage, "alice")
            .unwrap()
            .iter()
            .all(|c| c.unread_count == 0));
        assert_eq!(mark_all_read(&storage, "alice").unwrap(), 0);
        // Bob still has Alice's message unread
        assert_eq!(total_unread(&storage, "bob").unwrap(), 1);
    }
}
