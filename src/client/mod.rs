//! Client side of direct messaging: the transport contract, a query cache
//! with mutation-driven invalidation, and the conversation view synchronizer.

pub mod api;
pub mod cache;
pub mod sync;

pub use api::{ApiError, HttpApi, MessagingApi};
pub use cache::{CacheKey, Mutation, QueryCache};
pub use sync::{ConversationSync, ViewState};
