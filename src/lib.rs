pub mod client;
pub mod conversations;
pub mod logging;
pub mod read_state;
pub mod service;
pub mod storage;
pub mod web;
