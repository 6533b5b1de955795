//! Data contracts shared by the easel engine and its front ends.
//!
//! Nothing in this crate talks to the network. It holds the request/response
//! shapes, the conversation model and the append-only logs a session writes.

pub mod chat;
pub mod conversation;
pub mod events;
pub mod jobs;
pub mod models;
pub mod transcript;
