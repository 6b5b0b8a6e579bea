//! Query cache keyed by (operation, parameters).
//!
//! Cached conversations and threads are perishable. A local mutation stales
//! the keys it affects and nothing else; the synchronizer refetches them.
//! Each fetch carries a generation, and a result whose generation is no
//! longer current is dropped.

use std::collections::HashMap;

use crate::client::api::{Conversation, Message, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    ConversationList,
    Thread { partner_id: String },
    UnreadTotal,
    User { user_id: String },
}

impl CacheKey {
    pub fn thread(partner_id: &str) -> Self {
        CacheKey::Thread {
            partner_id: partner_id.to_string(),
        }
    }

    pub fn user(user_id: &str) -> Self {
        CacheKey::User {
            user_id: user_id.to_string(),
        }
    }
}

/// A successful local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Sent { partner_id: String },
    MarkedRead { partner_id: String },
    MarkedAllRead,
}

/// The keys a mutation makes stale. Threads with other partners are never
/// included. `MarkedAllRead` additionally stales every cached thread, which
/// `QueryCache::apply_mutation` handles since the set depends on the cache.
pub fn invalidated_by(mutation: &Mutation) -> Vec<CacheKey> {
    match mutation {
        Mutation::Sent { partner_id } | Mutation::MarkedRead { partner_id } => vec![
            CacheKey::thread(partner_id),
            CacheKey::ConversationList,
            CacheKey::UnreadTotal,
        ],
        Mutation::MarkedAllRead => vec![CacheKey::ConversationList, CacheKey::UnreadTotal],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Conversations(Vec<Conversation>),
    Thread(Vec<Message>),
    UnreadTotal(u32),
    User(UserProfile),
}

#[derive(Debug)]
struct Entry {
    value: CachedValue,
    stale: bool,
}

/// Proof that a fetch was started. Hand it back with the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<CacheKey, Entry>,
    in_flight: HashMap<CacheKey, u64>,
    next_generation: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last value fetched for `key`, stale or not.
    pub fn get(&self, key: &CacheKey) -> Option<&CachedValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some_and(|e| !e.stale)
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Start a fetch for `key`, superseding any fetch already in flight.
    pub fn begin_fetch(&mut self, key: CacheKey) -> FetchTicket {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.in_flight.insert(key.clone(), generation);
        FetchTicket { key, generation }
    }

    /// Store a fetched value. Returns false, leaving the cache untouched,
    /// when the ticket was superseded or invalidated in the meantime.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, value: CachedValue) -> bool {
        if self.in_flight.get(&ticket.key) != Some(&ticket.generation) {
            return false;
        }
        self.in_flight.remove(&ticket.key);
        self.entries.insert(
            ticket.key,
            Entry {
                value,
                stale: false,
            },
        );
        true
    }

    /// Give up on a fetch. The previous value, if any, stays cached.
    pub fn fail_fetch(&mut self, ticket: FetchTicket) -> bool {
        if self.in_flight.get(&ticket.key) != Some(&ticket.generation) {
            return false;
        }
        self.in_flight.remove(&ticket.key);
        true
    }

    /// Mark `key` stale. A fetch in flight for it started before the change
    /// and is dropped too.
    pub fn invalidate(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        self.in_flight.remove(key);
    }

    /// Stale everything `mutation` affects and return the keys that were
    /// cached, which are the ones worth refetching.
    pub fn apply_mutation(&mut self, mutation: &Mutation) -> Vec<CacheKey> {
        let mut keys = invalidated_by(mutation);
        if *mutation == Mutation::MarkedAllRead {
            keys.extend(
                self.entries
                    .keys()
                    .filter(|k| matches!(k, CacheKey::Thread { .. }))
                    .cloned(),
            );
        }

        let mut refetch = Vec::new();
        for key in keys {
            self.invalidate(&key);
            if self.entries.contains_key(&key) {
                refetch.push(key);
            }
        }
        refetch
    }

    /// Cached keys waiting for a refetch, in a stable order.
    pub fn stale_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}
