//! Conversation view synchronizer.
//!
//! Keeps the client's cached conversations, threads and unread counter in
//! step with the server, tracks the view state of every conversation the
//! user has opened, and owns the per-partner drafts.
//!
//! Per-conversation view state:
//!
//! ```text
//! Idle -> Loading -> Ready -> Sending -> Ready
//!                      ^                 \-> ReadyWithError
//!                      \------------------------/
//! ```
//!
//! A send keeps going when the user switches conversations; its outcome is
//! applied to the conversation it was sent from.

use std::collections::HashMap;

use crate::client::api::{ApiError, Conversation, Message, MessagingApi, ReadResult, UserProfile};
use crate::client::cache::{CacheKey, CachedValue, Mutation, QueryCache};
use crate::logging;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
    Sending,
    ReadyWithError(String),
}

/// A send that has been handed to the transport and not yet resolved.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingSend {
    partner_id: String,
    content: String,
}

pub struct ConversationSync<A: MessagingApi> {
    api: A,
    cache: QueryCache,
    active: Option<String>,
    views: HashMap<String, ViewState>,
    drafts: HashMap<String, String>,
    /// Unresolved sends per partner. The view leaves Sending at zero.
    in_flight_sends: HashMap<String, u32>,
    /// First failure among overlapping sends, shown once they all resolve.
    send_failures: HashMap<String, String>,
}

impl<A: MessagingApi> ConversationSync<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            cache: QueryCache::new(),
            active: None,
            views: HashMap::new(),
            drafts: HashMap::new(),
            in_flight_sends: HashMap::new(),
            send_failures: HashMap::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    pub fn active_partner(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn view_state(&self, partner_id: &str) -> ViewState {
        self.views
            .get(partner_id)
            .cloned()
            .unwrap_or(ViewState::Idle)
    }

    // -----------------------------------------------------------------------
    // Drafts
    // -----------------------------------------------------------------------

    pub fn draft(&self, partner_id: &str) -> &str {
        self.drafts.get(partner_id).map(String::as_str).unwrap_or("")
    }

    pub fn set_draft(&mut self, partner_id: &str, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            self.drafts.remove(partner_id);
        } else {
            self.drafts.insert(partner_id.to_string(), text);
        }
    }

    // -----------------------------------------------------------------------
    // Cached reads
    // -----------------------------------------------------------------------

    pub fn conversations(&self) -> Option<&[Conversation]> {
        match self.cache.get(&CacheKey::ConversationList) {
            Some(CachedValue::Conversations(list)) => Some(list),
            _ => None,
        }
    }

    pub fn thread(&self, partner_id: &str) -> Option<&[Message]> {
        match self.cache.get(&CacheKey::thread(partner_id)) {
            Some(CachedValue::Thread(messages)) => Some(messages),
            _ => None,
        }
    }

    pub fn unread_total(&self) -> Option<u32> {
        match self.cache.get(&CacheKey::UnreadTotal) {
            Some(CachedValue::UnreadTotal(n)) => Some(*n),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Fetching
    // -----------------------------------------------------------------------

    /// Fetch `key` from the server and cache it unless a newer fetch or an
    /// invalidation overtook it.
    pub fn fetch(&mut self, key: CacheKey) -> Result<(), ApiError> {
        let ticket = self.cache.begin_fetch(key.clone());
        let result = match &key {
            CacheKey::ConversationList => self
                .api
                .list_conversations()
                .map(CachedValue::Conversations),
            CacheKey::Thread { partner_id } => {
                self.api.get_thread(partner_id).map(CachedValue::Thread)
            }
            CacheKey::UnreadTotal => self.api.unread_total().map(CachedValue::UnreadTotal),
            CacheKey::User { user_id } => self.api.get_user(user_id).map(CachedValue::User),
        };
        match result {
            Ok(value) => {
                if !self.cache.complete_fetch(ticket, value) {
                    crate::tlog!("sync: discarded superseded fetch for {:?}", key);
                }
                Ok(())
            }
            Err(e) => {
                self.cache.fail_fetch(ticket);
                Err(e)
            }
        }
    }

    pub fn load_conversations(&mut self) -> Result<&[Conversation], ApiError> {
        self.fetch(CacheKey::ConversationList)?;
        Ok(self.conversations().unwrap_or(&[]))
    }

    /// Refetch every stale cached key. Failures leave the key stale for the
    /// next refresh and are returned; drafts and view states are untouched.
    pub fn refresh(&mut self) -> Vec<(CacheKey, ApiError)> {
        let mut failures = Vec::new();
        for key in self.cache.stale_keys() {
            if let Err(e) = self.fetch(key.clone()) {
                crate::tlog!("sync: refresh of {:?} failed: {}", key, e);
                failures.push((key, e));
            }
        }
        failures
    }

    /// Pick up changes made elsewhere (another tab or device, or the
    /// partner): stale the list, the counter and the open thread, then
    /// refresh.
    pub fn poll(&mut self) -> Vec<(CacheKey, ApiError)> {
        self.cache.invalidate(&CacheKey::ConversationList);
        self.cache.invalidate(&CacheKey::UnreadTotal);
        if let Some(partner) = self.active.clone() {
            self.cache.invalidate(&CacheKey::thread(&partner));
        }
        self.refresh()
    }

    fn apply_mutation(&mut self, mutation: Mutation) {
        for key in self.cache.apply_mutation(&mutation) {
            if let Err(e) = self.fetch(key.clone()) {
                crate::tlog!("sync: refetch of {:?} after {:?} failed: {}", key, mutation, e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Open the conversation with `partner_id`, loading its thread unless a
    /// fresh copy is cached. An in-flight send elsewhere is left alone.
    pub fn select_conversation(&mut self, partner_id: &str) -> Result<(), ApiError> {
        self.active = Some(partner_id.to_string());
        let key = CacheKey::thread(partner_id);
        if self.cache.is_fresh(&key) {
            if self.view_state(partner_id) == ViewState::Idle {
                self.views.insert(partner_id.to_string(), ViewState::Ready);
            }
            return Ok(());
        }

        if self.view_state(partner_id) != ViewState::Sending {
            self.views.insert(partner_id.to_string(), ViewState::Loading);
        }
        let result = self.fetch(key);
        if self.view_state(partner_id) != ViewState::Sending {
            let next = match &result {
                Ok(()) => ViewState::Ready,
                Err(e) => ViewState::ReadyWithError(e.to_string()),
            };
            self.views.insert(partner_id.to_string(), next);
        }
        result
    }

    pub fn close_conversation(&mut self) {
        self.active = None;
    }

    /// Identity of `partner_id`: from the conversation list when there is a
    /// shared history, otherwise looked up and cached.
    pub fn lookup_partner(&mut self, partner_id: &str) -> Result<UserProfile, ApiError> {
        let listed = self
            .conversations()
            .and_then(|list| list.iter().find(|c| c.partner_id == partner_id))
            .and_then(|c| c.partner.clone());
        if let Some(profile) = listed {
            return Ok(profile);
        }

        let key = CacheKey::user(partner_id);
        if !self.cache.is_fresh(&key) {
            self.fetch(key.clone())?;
        }
        match self.cache.get(&key) {
            Some(CachedValue::User(profile)) => Ok(profile.clone()),
            _ => Err(ApiError::NotFound(format!("user {partner_id}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Move `partner_id`'s view to Sending. Pair with `finish_send`.
    pub fn begin_send(&mut self, partner_id: &str, content: &str) -> PendingSend {
        *self
            .in_flight_sends
            .entry(partner_id.to_string())
            .or_insert(0) += 1;
        self.views
            .insert(partner_id.to_string(), ViewState::Sending);
        PendingSend {
            partner_id: partner_id.to_string(),
            content: content.to_string(),
        }
    }

    /// Apply a send's outcome to the conversation it was sent from, whatever
    /// is active now. Success clears the draft only if it still holds the
    /// sent text. Failure keeps the draft and is not retried. The view stays
    /// Sending while other sends to the same partner are unresolved.
    pub fn finish_send(
        &mut self,
        pending: PendingSend,
        result: Result<Message, ApiError>,
    ) -> Result<Message, ApiError> {
        let partner_id = pending.partner_id;
        let remaining = match self.in_flight_sends.get_mut(&partner_id) {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => 0,
        };
        if let Err(e) = &result {
            self.send_failures
                .entry(partner_id.clone())
                .or_insert_with(|| e.to_string());
        }
        if remaining == 0 {
            self.in_flight_sends.remove(&partner_id);
            let next = match self.send_failures.remove(&partner_id) {
                Some(msg) => ViewState::ReadyWithError(msg),
                None => ViewState::Ready,
            };
            self.views.insert(partner_id.clone(), next);
        }

        match result {
            Ok(message) => {
                if self.drafts.get(&partner_id) == Some(&pending.content) {
                    self.drafts.remove(&partner_id);
                }
                self.apply_mutation(Mutation::Sent {
                    partner_id: partner_id.clone(),
                });
                crate::tlog!(
                    "sync: sent {} to {}",
                    logging::msg_id(&message.id),
                    logging::user_id(&partner_id)
                );
                Ok(message)
            }
            Err(e) => {
                crate::tlog!(
                    "sync: send to {} failed: {}",
                    logging::user_id(&partner_id),
                    e
                );
                Err(e)
            }
        }
    }

    pub fn send(&mut self, partner_id: &str, content: &str) -> Result<Message, ApiError> {
        let pending = self.begin_send(partner_id, content);
        let result = self.api.send_message(partner_id, content);
        self.finish_send(pending, result)
    }

    /// Send whatever is drafted for `partner_id`.
    pub fn send_draft(&mut self, partner_id: &str) -> Result<Message, ApiError> {
        let content = self.draft(partner_id).to_string();
        self.send(partner_id, &content)
    }

    pub fn mark_conversation_read(&mut self, partner_id: &str) -> Result<ReadResult, ApiError> {
        let result = self.api.mark_read(partner_id)?;
        self.apply_mutation(Mutation::MarkedRead {
            partner_id: partner_id.to_string(),
        });
        Ok(result)
    }

    pub fn mark_all_read(&mut self) -> Result<u32, ApiError> {
        let flipped = self.api.mark_all_read()?;
        self.apply_mutation(Mutation::MarkedAllRead);
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::service::{ErrorKind, MessagingError, MessagingService};
    use crate::storage::{Storage, UserRow};
    use crate::web::utils::{conversation_to_json, message_to_json, user_to_json};

    /// In-process transport over a shared service, speaking the same JSON
    /// shapes as the HTTP API.
    struct FakeApi {
        service: Rc<MessagingService>,
        viewer: String,
        calls: RefCell<Vec<String>>,
        fail_sends: Cell<bool>,
    }

    impl FakeApi {
        fn new(service: Rc<MessagingService>, viewer: &str) -> Self {
            Self {
                service,
                viewer: viewer.to_string(),
                calls: RefCell::new(Vec::new()),
                fail_sends: Cell::new(false),
            }
        }

        fn record(&self, call: &str) {
            self.calls.borrow_mut().push(call.to_string());
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    fn to_api(e: MessagingError) -> ApiError {
        match e.kind {
            ErrorKind::Validation(v) => ApiError::Validation(v.to_string()),
            ErrorKind::NotFound(what) => ApiError::NotFound(what),
            ErrorKind::TransientStore(detail) => ApiError::Transient(detail),
        }
    }

    fn wire<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> T {
        serde_json::from_value(v).unwrap()
    }

    impl MessagingApi for FakeApi {
        fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
            self.record("list");
            let entries = self.service.list_conversations(&self.viewer).map_err(to_api)?;
            Ok(entries.iter().map(|e| wire(conversation_to_json(e))).collect())
        }

        fn get_thread(&self, partner_id: &str) -> Result<Vec<Message>, ApiError> {
            self.record(&format!("thread:{partner_id}"));
            let rows = self
                .service
                .get_conversation(&self.viewer, partner_id)
                .map_err(to_api)?;
            Ok(rows.iter().map(|m| wire(message_to_json(m))).collect())
        }

        fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message, ApiError> {
            self.record(&format!("send:{receiver_id}"));
            if self.fail_sends.get() {
                return Err(ApiError::Timeout);
            }
            let row = self
                .service
                .send(&self.viewer, receiver_id, content)
                .map_err(to_api)?;
            Ok(wire(message_to_json(&row)))
        }

        fn mark_read(&self, partner_id: &str) -> Result<ReadResult, ApiError> {
            self.record(&format!("read:{partner_id}"));
            let receipt = self
                .service
                .mark_conversation_read(&self.viewer, partner_id)
                .map_err(to_api)?;
            Ok(ReadResult {
                flipped: receipt.flipped,
                unread_count: receipt.conversation_unread,
                total_unread: receipt.total_unread,
            })
        }

        fn mark_all_read(&self) -> Result<u32, ApiError> {
            self.record("read-all");
            self.service.mark_all_read(&self.viewer).map_err(to_api)
        }

        fn unread_total(&self) -> Result<u32, ApiError> {
            self.record("unread");
            self.service.unread_total(&self.viewer).map_err(to_api)
        }

        fn get_user(&self, user_id: &str) -> Result<UserProfile, ApiError> {
            self.record(&format!("user:{user_id}"));
            let row = self.service.get_user(user_id).map_err(to_api)?;
            Ok(wire(user_to_json(&row)))
        }
    }

    fn shared_service() -> Rc<MessagingService> {
        let service = MessagingService::new(Storage::open_in_memory().unwrap());
        for id in ["alice", "bob", "carol"] {
            service
                .upsert_user(&UserRow {
                    user_id: id.to_string(),
                    username: id.to_string(),
                    full_name: None,
                    avatar_url: None,
                    updated_at: 0,
                })
                .unwrap();
        }
        Rc::new(service)
    }

    fn client(service: &Rc<MessagingService>, viewer: &str) -> ConversationSync<FakeApi> {
        ConversationSync::new(FakeApi::new(Rc::clone(service), viewer))
    }

    #[test]
    fn select_loads_thread_and_becomes_ready() {
        let service = shared_service();
        service.send("bob", "alice", "hi").unwrap();
        let mut sync = client(&service, "alice");

        assert_eq!(sync.view_state("bob"), ViewState::Idle);
        sync.select_conversation("bob").unwrap();
        assert_eq!(sync.view_state("bob"), ViewState::Ready);
        assert_eq!(sync.active_partner(), Some("bob"));
        assert_eq!(sync.thread("bob").unwrap().len(), 1);

        // Fresh thread is not fetched again.
        sync.select_conversation("bob").unwrap();
        assert_eq!(sync.api().count("thread:bob"), 1);
    }

    #[test]
    fn background_refresh_keeps_draft() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.load_conversations().unwrap();
        sync.fetch(CacheKey::UnreadTotal).unwrap();
        sync.set_draft("bob", "half-typed");

        service.send("bob", "alice", "new").unwrap();
        assert!(sync.poll().is_empty());

        assert_eq!(sync.draft("bob"), "half-typed");
        assert_eq!(sync.conversations().unwrap().len(), 1);
        assert_eq!(sync.unread_total(), Some(1));
    }

    #[test]
    fn successful_send_clears_matching_draft_only() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.select_conversation("bob").unwrap();

        sync.set_draft("bob", "hello");
        sync.send_draft("bob").unwrap();
        assert_eq!(sync.draft("bob"), "");
        assert_eq!(sync.thread("bob").unwrap().len(), 1);

        // The user kept typing after the send went out.
        sync.set_draft("bob", "first");
        let pending = sync.begin_send("bob", "first");
        sync.set_draft("bob", "first, and more");
        let result = sync.api().send_message("bob", "first");
        sync.finish_send(pending, result).unwrap();
        assert_eq!(sync.draft("bob"), "first, and more");
    }

    #[test]
    fn send_finished_after_switching_updates_original_conversation() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.load_conversations().unwrap();
        sync.select_conversation("bob").unwrap();

        let pending = sync.begin_send("bob", "hi bob");
        assert_eq!(sync.view_state("bob"), ViewState::Sending);

        sync.select_conversation("carol").unwrap();
        let result = sync.api().send_message("bob", "hi bob");
        sync.finish_send(pending, result).unwrap();

        assert_eq!(sync.active_partner(), Some("carol"));
        assert_eq!(sync.view_state("bob"), ViewState::Ready);
        assert_eq!(sync.view_state("carol"), ViewState::Ready);
        let bob_thread = sync.thread("bob").unwrap();
        assert_eq!(bob_thread.len(), 1);
        assert_eq!(bob_thread[0].content, "hi bob");
        assert!(sync.thread("carol").unwrap().is_empty());
        assert_eq!(sync.conversations().unwrap()[0].partner_id, "bob");
    }

    #[test]
    fn failed_send_keeps_draft_and_is_not_retried() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.select_conversation("bob").unwrap();
        sync.set_draft("bob", "important");
        sync.api().fail_sends.set(true);

        let err = sync.send_draft("bob").unwrap_err();
        assert_eq!(err, ApiError::Timeout);
        assert!(matches!(sync.view_state("bob"), ViewState::ReadyWithError(_)));
        assert_eq!(sync.draft("bob"), "important");
        assert_eq!(sync.api().count("send:"), 1);
        assert!(service.get_conversation("alice", "bob").unwrap().is_empty());

        // A manual retry succeeds and recovers the view.
        sync.api().fail_sends.set(false);
        sync.send_draft("bob").unwrap();
        assert_eq!(sync.view_state("bob"), ViewState::Ready);
        assert_eq!(sync.draft("bob"), "");
    }

    #[test]
    fn overlapping_sends_stay_sending_until_both_resolve() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.select_conversation("bob").unwrap();

        let first = sync.begin_send("bob", "one");
        let second = sync.begin_send("bob", "two");

        let result = sync.api().send_message("bob", "one");
        sync.finish_send(first, result).unwrap();
        assert_eq!(sync.view_state("bob"), ViewState::Sending);

        let result = sync.api().send_message("bob", "two");
        sync.finish_send(second, result).unwrap();
        assert_eq!(sync.view_state("bob"), ViewState::Ready);
        assert_eq!(sync.thread("bob").unwrap().len(), 2);
    }

    #[test]
    fn earlier_failure_surfaces_after_overlapping_sends_resolve() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.select_conversation("bob").unwrap();

        let first = sync.begin_send("bob", "one");
        let second = sync.begin_send("bob", "two");

        sync.api().fail_sends.set(true);
        let result = sync.api().send_message("bob", "one");
        assert!(sync.finish_send(first, result).is_err());
        assert_eq!(sync.view_state("bob"), ViewState::Sending);

        sync.api().fail_sends.set(false);
        let result = sync.api().send_message("bob", "two");
        sync.finish_send(second, result).unwrap();
        assert!(matches!(sync.view_state("bob"), ViewState::ReadyWithError(_)));

        // The next clean send clears the error.
        sync.send("bob", "three").unwrap();
        assert_eq!(sync.view_state("bob"), ViewState::Ready);
    }

    #[test]
    fn send_to_bob_never_refetches_carol_thread() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.select_conversation("carol").unwrap();
        sync.select_conversation("bob").unwrap();

        sync.send("bob", "hi").unwrap();

        assert!(sync.cache().is_fresh(&CacheKey::thread("carol")));
        assert_eq!(sync.api().count("thread:carol"), 1);
        assert_eq!(sync.api().count("thread:bob"), 2);
    }

    #[test]
    fn mutation_during_fetch_discards_stale_result() {
        let service = shared_service();
        let mut sync = client(&service, "alice");
        sync.load_conversations().unwrap();

        let ticket = sync.cache_mut().begin_fetch(CacheKey::ConversationList);
        let stale = sync.api().list_conversations().unwrap();
        sync.send("bob", "hi").unwrap();

        assert!(!sync
            .cache_mut()
            .complete_fetch(ticket, CachedValue::Conversations(stale)));
        assert_eq!(sync.conversations().unwrap().len(), 1);
    }

    #[test]
    fn two_tabs_agree_after_mark_read() {
        let service = shared_service();
        service.send("bob", "alice", "one").unwrap();
        service.send("bob", "alice", "two").unwrap();

        let mut tab1 = client(&service, "alice");
        let mut tab2 = client(&service, "alice");
        for tab in [&mut tab1, &mut tab2] {
            tab.load_conversations().unwrap();
            tab.fetch(CacheKey::UnreadTotal).unwrap();
            assert_eq!(tab.unread_total(), Some(2));
        }

        let result = tab1.mark_conversation_read("bob").unwrap();
        assert_eq!(result.flipped, 2);
        assert_eq!(tab1.unread_total(), Some(0));

        // The second tab's read-all finds nothing left to flip.
        assert_eq!(tab2.mark_all_read().unwrap(), 0);
        assert!(tab2.poll().is_empty());
        assert_eq!(tab2.unread_total(), Some(0));
        assert_eq!(tab2.conversations().unwrap()[0].unread_count, 0);
    }

    #[test]
    fn partner_lookup_falls_back_to_user_fetch() {
        let service = shared_service();
        service.send("bob", "alice", "hi").unwrap();
        let mut sync = client(&service, "alice");
        sync.load_conversations().unwrap();

        assert_eq!(sync.lookup_partner("bob").unwrap().username, "bob");
        assert_eq!(sync.api().count("user:"), 0);

        assert_eq!(sync.lookup_partner("carol").unwrap().username, "carol");
        assert_eq!(sync.lookup_partner("carol").unwrap().username, "carol");
        assert_eq!(sync.api().count("user:carol"), 1);

        sync.select_conversation("carol").unwrap();
        assert!(sync.thread("carol").unwrap().is_empty());

        assert!(matches!(
            sync.lookup_partner("nobody"),
            Err(ApiError::NotFound(_))
        ));
    }
}
