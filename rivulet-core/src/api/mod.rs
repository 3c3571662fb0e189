//! Chat service REST API
//!
//! CRUD for chats and task-handler discovery. The streaming event channel is
//! not here; this surface only covers the request/response endpoints used to
//! hydrate the store and to enumerate models before a generation.

mod client;

pub use client::{ChatApiClient, ChatPage, ChatWithMessages};
