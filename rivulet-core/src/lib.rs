//! # rivulet-core
//!
//! Core library for rivulet - a streaming conversation-state orchestrator.
//!
//! This library provides:
//! - Domain types for chats, messages, parts, and research progress
//! - The event reducer store reconstructing conversation state from an
//!   out-of-order event stream
//! - Branch-tree navigation over edited and regenerated messages
//! - Render segmentation of event histories
//! - Chat service REST client, configuration management, and logging
//!
//! ## Architecture
//!
//! State flows through three stages:
//! - **Wire:** [`protocol::StreamEvent`]s arrive from the transport, in any
//!   order across message ids
//! - **Canonical:** [`store::ChatStore`] reduces them into the message tree,
//!   buffering early arrivals and gating research-phase output
//! - **Render:** [`segment`] folds a message's event history into display
//!   segments, purely and idempotently
//!
//! ## Example
//!
//! ```rust,no_run
//! use rivulet_core::{ChatStore, Config};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Create the store and feed it events from the transport
//! let mut store = ChatStore::new(&config);
//! # let event: rivulet_core::protocol::StreamEvent = todo!();
//! store.apply_event(event);
//! ```

// Re-export commonly used items at the crate root
pub use api::ChatApiClient;
pub use config::Config;
pub use error::{Error, Result};
pub use segment::Segment;
pub use store::ChatStore;
pub use types::*;

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod segment;
pub mod store;
pub mod tree;
pub mod types;
