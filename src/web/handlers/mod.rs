//! Route handler modules for the keepsake-web REST API.

pub mod conversations;
pub mod health;
pub mod messages;
pub mod users;
