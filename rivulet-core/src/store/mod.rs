//! Message/chat store and event reducers
//!
//! The single mutable state container for the conversation subsystem: all
//! messages, per-chat message lists, per-chat active path, the global
//! streaming flag, the pending-generation record, the event buffer and the
//! research tracker.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ Event stream  │ ──► │ ChatStore         │ ──► │ Segmenter        │
//! │ (transport)   │     │  apply_event      │     │ (render output)  │
//! └───────────────┘     │  ├─ EventBuffer   │     └──────────────────┘
//!                       │  └─ ResearchTracker│
//!                       └───────────────────┘
//! ```
//!
//! Every state transition is synchronous and total: an operation against a
//! missing id is a warn-logged no-op, never a fault. Events for one message
//! id apply in arrival order on both the immediate and buffered paths; no
//! ordering holds across ids. There is exactly one write path: the buffer
//! queues and research state are private store sub-state, not independently
//! shared resources.

mod buffer;
pub mod research;

pub use buffer::EventBuffer;
pub use research::ResearchTracker;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{parse_status_message, Command, CommandSink, StreamEvent};
use crate::segment::{merge_tool_args, segment_history, segment_parts, Segment};
use crate::tree::{self, Direction};
use crate::types::{
    Chat, ErrorDetail, Message, MessageKind, MessageStatus, Part, ResearchProgress, TaskHandler,
};

/// Generation awaiting its `response_start`.
///
/// Recorded by [`ChatStore::start_generation`] and consumed exactly once by
/// the matching `response_start` event; cleared on transport error.
#[derive(Debug, Clone)]
pub struct PendingGeneration {
    /// Client-side correlation id (for logging only; the backend assigns
    /// all message ids)
    pub correlation_id: Uuid,
    pub chat_id: String,
    pub content: String,
    pub parent_id: Option<String>,
    pub task: String,
    pub model_id: String,
    pub requested_at: DateTime<Utc>,
}

/// The conversation-state store
pub struct ChatStore {
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Message>,
    /// Per-chat message ids in creation order
    messages_by_chat: HashMap<String, Vec<String>>,
    /// Per-chat linear path currently rendered
    active_paths: HashMap<String, Vec<String>>,
    is_streaming: bool,
    current_response_id: Option<String>,
    pending: Option<PendingGeneration>,
    global_error: Option<String>,
    buffer: EventBuffer,
    research: ResearchTracker,
    default_task: String,
    persona: Option<String>,
}

impl ChatStore {
    pub fn new(config: &Config) -> Self {
        Self {
            chats: HashMap::new(),
            messages: HashMap::new(),
            messages_by_chat: HashMap::new(),
            active_paths: HashMap::new(),
            is_streaming: false,
            current_response_id: None,
            pending: None,
            global_error: None,
            buffer: EventBuffer::new(config.buffer.clone()),
            research: ResearchTracker::new(config.generation.research_task.clone()),
            default_task: config.generation.default_task.clone(),
            persona: config.generation.persona.clone(),
        }
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn chat(&self, chat_id: &str) -> Option<&Chat> {
        self.chats.get(chat_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.get(message_id)
    }

    /// All chat ids with at least one message, sorted
    pub fn chat_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.messages_by_chat.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Message ids for a chat, in creation order
    pub fn chat_message_ids(&self, chat_id: &str) -> &[String] {
        self.messages_by_chat
            .get(chat_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The linear path currently rendered for a chat
    pub fn active_path(&self, chat_id: &str) -> &[String] {
        self.active_paths
            .get(chat_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn global_error(&self) -> Option<&str> {
        self.global_error.as_deref()
    }

    pub fn pending(&self) -> Option<&PendingGeneration> {
        self.pending.as_ref()
    }

    pub fn research_progress(&self, message_id: &str) -> Option<&ResearchProgress> {
        self.research.progress(message_id)
    }

    /// Sibling position of a message, as (index, count)
    pub fn sibling_position(&self, message_id: &str) -> Option<(usize, usize)> {
        tree::sibling_position(&self.messages, message_id)
    }

    /// Render segments for a message.
    ///
    /// Streamed messages segment their event history; REST-loaded historical
    /// messages have none and segment their parts instead.
    pub fn segments(&self, message_id: &str) -> Vec<Segment> {
        match self.messages.get(message_id) {
            Some(m) if !m.event_data.event_history.is_empty() => {
                segment_history(&m.event_data.event_history)
            }
            Some(m) => segment_parts(&m.parts),
            None => Vec::new(),
        }
    }

    // ============================================
    // Store operations (public contract)
    // ============================================

    /// Append a text delta to a message. Missing id: warn + no-op.
    pub fn append(&mut self, message_id: &str, delta: &str) {
        match self.messages.get_mut(message_id) {
            Some(message) => append_text(message, delta),
            None => {
                tracing::warn!(message_id = %message_id, "append to unknown message, ignoring");
            }
        }
    }

    /// Set a message's status. Missing id: warn + no-op.
    pub fn set_status(&mut self, message_id: &str, status: MessageStatus) {
        match self.messages.get_mut(message_id) {
            Some(message) => message.status = status,
            None => {
                tracing::warn!(message_id = %message_id, "set_status on unknown message, ignoring");
            }
        }
    }

    /// Replace a chat's active path. Invalid paths (broken parent chain,
    /// duplicates, unknown ids) are rejected with a warning.
    pub fn set_active_path(&mut self, chat_id: &str, ids: Vec<String>) {
        if !tree::validate_path(&self.messages, &ids) {
            tracing::warn!(chat_id = %chat_id, "rejecting invalid active path");
            return;
        }
        self.active_paths.insert(chat_id.to_string(), ids);
    }

    /// Move the active path to a sibling branch of `message_id`.
    ///
    /// Returns false when the message is not on the path or there is no
    /// sibling in that direction.
    pub fn navigate_branch(&mut self, chat_id: &str, message_id: &str, direction: Direction) -> bool {
        let path = self.active_path(chat_id);
        match tree::navigate(&self.messages, path, message_id, direction) {
            Some(next) => {
                self.active_paths.insert(chat_id.to_string(), next);
                true
            }
            None => false,
        }
    }

    /// Begin a generation: resolve a model, record the pending record, and
    /// hand the generate command to the transport.
    ///
    /// The pending record is consumed exactly once, by `response_start`. On
    /// model-resolution failure it is rolled back and a user-visible error
    /// set before anything is sent; on transport failure it is likewise
    /// cleared.
    pub fn start_generation(
        &mut self,
        chat_id: &str,
        content: &str,
        parent_id: Option<String>,
        task: Option<&str>,
        model_id: Option<String>,
        handlers: &[TaskHandler],
        sink: &mut dyn CommandSink,
    ) -> Result<()> {
        if self.pending.is_some() {
            tracing::warn!(chat_id = %chat_id, "generation already pending, replacing");
        }
        let task = task.unwrap_or(&self.default_task).to_string();

        self.pending = Some(PendingGeneration {
            correlation_id: Uuid::new_v4(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            parent_id: parent_id.clone(),
            task: task.clone(),
            model_id: String::new(),
            requested_at: Utc::now(),
        });

        let model_id = match resolve_model(&task, model_id, handlers) {
            Some(m) => m,
            None => {
                self.pending = None;
                let error = Error::ModelResolution { task: task.clone() };
                self.global_error = Some(error.to_string());
                return Err(error);
            }
        };
        if let Some(pending) = self.pending.as_mut() {
            pending.model_id = model_id.clone();
        }

        let command = Command::Generate {
            task,
            chat_id: chat_id.to_string(),
            parent_id,
            model_id,
            parts: vec![Part::Text {
                content: content.to_string(),
            }],
            persona: self.persona.clone(),
        };

        if let Err(e) = sink.send(command) {
            tracing::error!(chat_id = %chat_id, error = %e, "failed to send generate command");
            self.pending = None;
            self.global_error = Some(e.to_string());
            return Err(e);
        }

        self.is_streaming = true;
        Ok(())
    }

    /// Regenerate a response: re-send its request's content as a new
    /// branch. The prior response and its descendants are untouched and stay
    /// reachable via sibling navigation.
    pub fn regenerate(
        &mut self,
        response_id: &str,
        handlers: &[TaskHandler],
        sink: &mut dyn CommandSink,
    ) -> Result<()> {
        let response = self
            .messages
            .get(response_id)
            .ok_or_else(|| Error::MessageNotFound(response_id.to_string()))?;
        if response.kind != MessageKind::Response {
            return Err(Error::MessageNotFound(format!(
                "{} is not a response",
                response_id
            )));
        }

        let request_id = response
            .parent_id
            .clone()
            .ok_or_else(|| Error::MessageNotFound(format!("{} has no parent", response_id)))?;
        let request = self
            .messages
            .get(&request_id)
            .ok_or_else(|| Error::MessageNotFound(request_id.clone()))?;

        let chat_id = request.chat_id.clone();
        let content = request.text_content();
        let parent_id = request.parent_id.clone();
        let task = response.event_data.task.clone();

        self.start_generation(
            &chat_id,
            &content,
            parent_id,
            task.as_deref(),
            None,
            handlers,
            sink,
        )
    }

    /// Edit a request: send new content as a sibling branch of the original
    /// request. Existing descendants are never deleted or mutated.
    pub fn edit_request(
        &mut self,
        request_id: &str,
        new_content: &str,
        handlers: &[TaskHandler],
        sink: &mut dyn CommandSink,
    ) -> Result<()> {
        let request = self
            .messages
            .get(request_id)
            .ok_or_else(|| Error::MessageNotFound(request_id.to_string()))?;
        if request.kind != MessageKind::Request {
            return Err(Error::MessageNotFound(format!(
                "{} is not a request",
                request_id
            )));
        }

        let chat_id = request.chat_id.clone();
        let parent_id = request.parent_id.clone();

        self.start_generation(&chat_id, new_content, parent_id, None, None, handlers, sink)
    }

    /// Interrupt the current generation.
    ///
    /// The interrupt command goes out of band; locally the streaming message
    /// is marked complete and the pending record cleared. Already-buffered
    /// events keep their own timeout-driven lifecycle.
    pub fn interrupt(&mut self, sink: &mut dyn CommandSink) -> Result<()> {
        let send_result = sink.send(Command::Interrupt);

        if let Some(response_id) = self.current_response_id.take() {
            if let Some(message) = self.messages.get_mut(&response_id) {
                if message.status == MessageStatus::Streaming {
                    message.status = MessageStatus::Complete;
                }
            }
        }
        self.pending = None;
        self.is_streaming = false;

        send_result
    }

    /// Record a transport failure: global error, streaming flag cleared, no
    /// message left dangling in streaming status.
    pub fn transport_error(&mut self, message: &str) {
        tracing::error!(error = %message, "transport error");
        self.global_error = Some(message.to_string());
        self.is_streaming = false;
        self.pending = None;
        self.current_response_id = None;

        for msg in self.messages.values_mut() {
            if msg.status == MessageStatus::Streaming {
                msg.status = MessageStatus::Complete;
            }
        }
    }

    /// Wipe all state (logout)
    pub fn clear(&mut self) {
        self.chats.clear();
        self.messages.clear();
        self.messages_by_chat.clear();
        self.active_paths.clear();
        self.is_streaming = false;
        self.current_response_id = None;
        self.pending = None;
        self.global_error = None;
        self.buffer.clear();
        self.research.clear();
    }

    /// Hydrate a chat from a REST fetch: insert its messages and compute the
    /// default active path: earliest root, then descendants in timestamp
    /// order.
    pub fn load_chat(&mut self, chat: Chat, messages: Vec<Message>) {
        let chat_id = chat.chat_id.clone();
        self.chats.insert(chat_id.clone(), chat);

        let mut ordered = messages;
        ordered.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });

        let ids = self.messages_by_chat.entry(chat_id.clone()).or_default();
        ids.clear();
        for message in ordered {
            ids.push(message.message_id.clone());
            self.messages.insert(message.message_id.clone(), message);
        }

        let path = tree::default_path(&self.messages, &chat_id);
        self.active_paths.insert(chat_id, path);
    }

    // ============================================
    // Event ingestion
    // ============================================

    /// Apply one inbound event (immediate or buffered path)
    pub fn apply_event(&mut self, event: StreamEvent) {
        self.apply_event_at(event, Instant::now());
    }

    /// Apply one inbound event with an explicit clock, for deterministic
    /// buffer-expiry behavior in tests and replays.
    pub fn apply_event_at(&mut self, event: StreamEvent, now: Instant) {
        if let StreamEvent::ResponseStart { .. } = event {
            self.handle_response_start(event);
            return;
        }

        let message_id = event.response_id().to_string();
        if self.messages.contains_key(&message_id) {
            self.apply_to_message(&message_id, event);
        } else {
            // Target not created yet: park the event until `response_start`
            // lands or the cleanup deadline fires
            self.buffer.push(event, now);
        }
    }

    /// Expire overdue pending queues.
    ///
    /// Called from the transport's event loop tick. Each expired queue gets
    /// one final replay attempt (the message may have appeared since the
    /// events were buffered) and is then discarded either way.
    pub fn flush_expired(&mut self, now: Instant) {
        for (message_id, events) in self.buffer.take_expired(now) {
            if self.messages.contains_key(&message_id) {
                tracing::debug!(
                    message_id = %message_id,
                    count = events.len(),
                    "replaying buffered events at expiry"
                );
                for event in events {
                    self.apply_to_message(&message_id, event);
                }
            } else {
                tracing::warn!(
                    message_id = %message_id,
                    dropped = events.len(),
                    "discarding buffered events for message that never appeared"
                );
            }
        }
    }

    /// `response_start` atomically creates the request/response pair,
    /// consumes the pending-generation record, splices the active path, and
    /// replays any events that raced ahead of it.
    fn handle_response_start(&mut self, event: StreamEvent) {
        let (response_id, request_id, chat_id, task, model_id, event_parent, timestamp) =
            match &event {
                StreamEvent::ResponseStart {
                    response_id,
                    request_id,
                    chat_id,
                    task,
                    model_id,
                    parent_id,
                    timestamp,
                } => (
                    response_id.clone(),
                    request_id.clone(),
                    chat_id.clone(),
                    task.clone(),
                    model_id.clone(),
                    parent_id.clone(),
                    *timestamp,
                ),
                _ => unreachable!("handle_response_start called with non-start event"),
            };

        if self.messages.contains_key(&response_id) {
            tracing::warn!(response_id = %response_id, "duplicate response_start, ignoring");
            return;
        }

        // Consume the pending record (exactly once). A start with no pending
        // record still creates the pair so the stream is not lost.
        let pending = match self.pending.take() {
            Some(p) if p.chat_id == chat_id => Some(p),
            Some(p) => {
                tracing::warn!(
                    expected_chat = %p.chat_id,
                    got_chat = %chat_id,
                    "response_start for a different chat than pending, dropping pending"
                );
                None
            }
            None => {
                tracing::warn!(
                    response_id = %response_id,
                    "response_start with no pending generation"
                );
                None
            }
        };

        let parent_id = event_parent.or_else(|| pending.as_ref().and_then(|p| p.parent_id.clone()));
        let content = pending.map(|p| p.content).unwrap_or_default();

        let mut request =
            Message::request(&request_id, &chat_id, parent_id.clone(), content, timestamp);
        request.event_data.task = Some(task.clone());
        let mut response =
            Message::streaming_response(&response_id, &chat_id, &request_id, timestamp);
        response.event_data.task = Some(task);
        response.event_data.model_id = Some(model_id);
        response.event_data.event_history.push(event);

        self.messages.insert(request_id.clone(), request);
        self.messages.insert(response_id.clone(), response);
        let chat_ids = self.messages_by_chat.entry(chat_id.clone()).or_default();
        chat_ids.push(request_id.clone());
        chat_ids.push(response_id.clone());

        // Path prefix up to the branch point, then the new pair
        let mut path = match &parent_id {
            Some(parent) => tree::path_to(&self.messages, parent),
            None => Vec::new(),
        };
        path.push(request_id);
        path.push(response_id.clone());
        self.active_paths.insert(chat_id.clone(), path);

        if let Some(chat) = self.chats.get_mut(&chat_id) {
            chat.updated_at = timestamp;
        }

        self.is_streaming = true;
        self.current_response_id = Some(response_id.clone());

        // Synchronously drain and replay anything that raced ahead
        for buffered in self.buffer.drain(&response_id) {
            self.apply_to_message(&response_id, buffered);
        }
    }

    /// Apply an event to an existing message (the reducer proper)
    fn apply_to_message(&mut self, message_id: &str, event: StreamEvent) {
        let task = self
            .messages
            .get(message_id)
            .and_then(|m| m.event_data.task.clone());

        match &event {
            StreamEvent::Content { content, .. } => {
                if self.research.suppresses_content(message_id, task.as_deref()) {
                    self.research
                        .redirect(message_id, "Research", content.clone(), event.timestamp());
                    return;
                }
                // First real token after `complete`: flip the finalizing
                // marker to finished, once
                if self.research.latch_finish(message_id) {
                    if let Some(message) = self.messages.get_mut(message_id) {
                        mark_history_finished(message);
                    }
                }
                if let Some(message) = self.messages.get_mut(message_id) {
                    append_text(message, content);
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::Reasoning { text, .. } => {
                if let Some(message) = self.messages.get_mut(message_id) {
                    let delta = text.as_deref().unwrap_or("");
                    match message.parts.last_mut() {
                        Some(Part::Reasoning { content }) => content.push_str(delta),
                        _ => message.parts.push(Part::Reasoning {
                            content: delta.to_string(),
                        }),
                    }
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::Status { message: text, .. } => {
                let payload = parse_status_message(text.as_deref());
                self.research
                    .on_status(message_id, &payload, event.timestamp());
                if let Some(message) = self.messages.get_mut(message_id) {
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::ToolCall {
                tool_name,
                tool_id,
                tool_args,
                ..
            } => {
                if self.research.suppresses_side_events(message_id) {
                    self.research.redirect(
                        message_id,
                        "Tool call",
                        tool_name.clone(),
                        event.timestamp(),
                    );
                    return;
                }
                if let Some(message) = self.messages.get_mut(message_id) {
                    merge_tool_call_part(message, tool_name, tool_id, tool_args);
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::ToolReturn {
                tool_name, tool_id, result, ..
            } => {
                if let Some(message) = self.messages.get_mut(message_id) {
                    attach_tool_result(message, tool_name, tool_id, result);
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::Metadata { metadata, .. } => {
                if let Some(message) = self.messages.get_mut(message_id) {
                    merge_tool_args(&mut message.event_data.metadata, metadata);
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::Document {
                document_id,
                title,
                pointer,
                mime_type,
                page_count,
                word_count,
                ..
            } => {
                if self.research.suppresses_side_events(message_id) {
                    self.research
                        .redirect(message_id, "Document", title.clone(), event.timestamp());
                    return;
                }
                if let Some(message) = self.messages.get_mut(message_id) {
                    message.parts.push(Part::Document {
                        document_id: document_id.clone(),
                        title: title.clone(),
                        pointer: pointer.clone(),
                        mime_type: mime_type.clone(),
                        page_count: *page_count,
                        word_count: *word_count,
                    });
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::Citation {
                document_id,
                text,
                page,
                section,
                reference_number,
                ..
            } => {
                if let Some(message) = self.messages.get_mut(message_id) {
                    message.parts.push(Part::Citation {
                        document_id: document_id.clone(),
                        text: text.clone(),
                        page: *page,
                        section: section.clone(),
                        reference_number: *reference_number,
                    });
                    message.event_data.event_history.push(event);
                }
            }
            StreamEvent::Error {
                error_type,
                message: error_message,
                details,
                ..
            } => {
                if let Some(message) = self.messages.get_mut(message_id) {
                    message.status = MessageStatus::Error;
                    message.event_data.error = Some(ErrorDetail {
                        error_type: error_type.clone(),
                        message: error_message.clone(),
                        details: details.clone(),
                    });
                    message.event_data.event_history.push(event);
                }
                if self.current_response_id.as_deref() == Some(message_id) {
                    self.is_streaming = false;
                    self.current_response_id = None;
                }
            }
            StreamEvent::ResponseEnd { status, usage, .. } => {
                if let Some(message) = self.messages.get_mut(message_id) {
                    // A richer error from an earlier `error` event wins over
                    // the end event's coarse status
                    if message.event_data.error.is_none() {
                        message.status = match status.parse::<MessageStatus>() {
                            Ok(s) => s,
                            Err(_) => {
                                tracing::warn!(
                                    message_id = %message_id,
                                    status = %status,
                                    "unknown response_end status, treating as complete"
                                );
                                MessageStatus::Complete
                            }
                        };
                        if message.status == MessageStatus::Error {
                            message.event_data.error = Some(ErrorDetail {
                                error_type: "response_end".to_string(),
                                message: format!("generation ended with status '{}'", status),
                                details: None,
                            });
                        }
                    }
                    if let Some(usage) = usage {
                        message.event_data.usage = Some(*usage);
                    }
                    message.event_data.event_history.push(event);
                }
                if self.current_response_id.as_deref() == Some(message_id) {
                    self.is_streaming = false;
                    self.current_response_id = None;
                }
            }
            StreamEvent::ResponseStart { .. } => {
                tracing::warn!(message_id = %message_id, "unexpected response_start in reducer");
            }
        }
    }
}

/// Resolve the model for a generation: explicit choice, handler default,
/// first available, in that order.
fn resolve_model(
    task: &str,
    explicit: Option<String>,
    handlers: &[TaskHandler],
) -> Option<String> {
    if let Some(model) = explicit {
        return Some(model);
    }
    let handler = handlers.iter().find(|h| h.name == task)?;
    handler
        .default_model_id
        .clone()
        .or_else(|| handler.model_ids.first().cloned())
}

fn append_text(message: &mut Message, delta: &str) {
    match message.parts.last_mut() {
        Some(Part::Text { content }) => content.push_str(delta),
        _ => message.parts.push(Part::Text {
            content: delta.to_string(),
        }),
    }
}

fn merge_tool_call_part(
    message: &mut Message,
    name: &str,
    id: &str,
    args: &serde_json::Value,
) {
    let existing = message.parts.iter_mut().find(|p| {
        matches!(
            p,
            Part::ToolCall { tool_name, tool_id, .. } if tool_name == name && tool_id == id
        )
    });
    match existing {
        Some(Part::ToolCall { tool_args, .. }) => merge_tool_args(tool_args, args),
        _ => message.parts.push(Part::ToolCall {
            tool_name: name.to_string(),
            tool_id: id.to_string(),
            tool_args: args.clone(),
            result: None,
        }),
    }
}

fn attach_tool_result(
    message: &mut Message,
    name: &str,
    id: &str,
    result: &serde_json::Value,
) {
    let existing = message.parts.iter_mut().find(|p| {
        matches!(
            p,
            Part::ToolCall { tool_name, tool_id, .. } if tool_name == name && tool_id == id
        )
    });
    match existing {
        Some(Part::ToolCall { result: slot, .. }) => *slot = Some(result.clone()),
        _ => tracing::debug!(
            tool_id = %id,
            "tool_return without matching tool_call part"
        ),
    }
}

/// Rewrite the last complete-phase status event in a message's history so
/// the segmenter renders a "Finished" marker instead of "Finalizing".
fn mark_history_finished(message: &mut Message) {
    let finished = message
        .event_data
        .event_history
        .iter_mut()
        .rev()
        .find_map(|event| match event {
            StreamEvent::Status { message: text, .. } => {
                let payload = parse_status_message(text.as_deref());
                if payload.phase.map(|p| p.is_terminal()).unwrap_or(false) {
                    Some(text)
                } else {
                    None
                }
            }
            _ => None,
        });

    if let Some(text) = finished {
        let body = parse_status_message(text.as_deref());
        *text = Some(
            serde_json::json!({
                "phase": "complete",
                "title": "Finished",
                "text": body.text,
            })
            .to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelTransport;

    fn store() -> ChatStore {
        ChatStore::new(&Config::default())
    }

    fn handlers() -> Vec<TaskHandler> {
        vec![TaskHandler {
            name: "chat".to_string(),
            description: None,
            default_model_id: Some("m1".to_string()),
            model_ids: vec!["m1".to_string(), "m2".to_string()],
        }]
    }

    fn start_event(chat: &str, request: &str, response: &str) -> StreamEvent {
        StreamEvent::ResponseStart {
            response_id: response.to_string(),
            request_id: request.to_string(),
            chat_id: chat.to_string(),
            task: "chat".to_string(),
            model_id: "m1".to_string(),
            parent_id: None,
            timestamp: Utc::now(),
        }
    }

    fn content_event(id: &str, text: &str) -> StreamEvent {
        StreamEvent::Content {
            response_id: id.to_string(),
            content: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_missing_id_operations_are_noops() {
        let mut s = store();
        s.append("missing", "x");
        s.set_status("missing", MessageStatus::Complete);
        assert!(s.message("missing").is_none());
    }

    #[test]
    fn test_start_generation_records_pending_and_sends() {
        let mut s = store();
        let (mut transport, mut rx) = ChannelTransport::new();

        s.start_generation("c1", "Hi", None, None, None, &handlers(), &mut transport)
            .unwrap();

        let pending = s.pending().unwrap();
        assert_eq!(pending.chat_id, "c1");
        assert_eq!(pending.content, "Hi");
        assert_eq!(pending.model_id, "m1");
        assert!(s.is_streaming());

        match rx.try_recv().unwrap() {
            Command::Generate { task, model_id, .. } => {
                assert_eq!(task, "chat");
                assert_eq!(model_id, "m1");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_model_resolution_failure_rolls_back() {
        let mut s = store();
        let (mut transport, _rx) = ChannelTransport::new();

        let result =
            s.start_generation("c1", "Hi", None, Some("unknown"), None, &handlers(), &mut transport);

        assert!(matches!(result, Err(Error::ModelResolution { .. })));
        assert!(s.pending().is_none());
        assert!(s.global_error().is_some());
        assert!(!s.is_streaming());
    }

    #[test]
    fn test_response_start_consumes_pending_once() {
        let mut s = store();
        let (mut transport, _rx) = ChannelTransport::new();
        s.start_generation("c1", "Hi", None, None, None, &handlers(), &mut transport)
            .unwrap();

        s.apply_event(start_event("c1", "q1", "a1"));

        assert!(s.pending().is_none());
        assert_eq!(s.message("q1").unwrap().text_content(), "Hi");
        assert_eq!(s.message("q1").unwrap().kind, MessageKind::Request);
        assert_eq!(
            s.message("a1").unwrap().status,
            MessageStatus::Streaming
        );
        assert_eq!(s.active_path("c1"), ["q1", "a1"]);
    }

    #[test]
    fn test_duplicate_response_start_ignored() {
        let mut s = store();
        s.apply_event(start_event("c1", "q1", "a1"));
        s.apply_event(content_event("a1", "Hello"));
        s.apply_event(start_event("c1", "q1", "a1"));

        assert_eq!(s.message("a1").unwrap().text_content(), "Hello");
        assert_eq!(s.chat_message_ids("c1").len(), 2);
    }

    #[test]
    fn test_interrupt_completes_streaming_message() {
        let mut s = store();
        let (mut transport, mut rx) = ChannelTransport::new();
        s.apply_event(start_event("c1", "q1", "a1"));

        s.interrupt(&mut transport).unwrap();

        assert_eq!(s.message("a1").unwrap().status, MessageStatus::Complete);
        assert!(!s.is_streaming());
        assert!(s.pending().is_none());
        // The command went out of band
        match rx.try_recv().unwrap() {
            Command::Interrupt => {}
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_leaves_no_dangling_streaming() {
        let mut s = store();
        s.apply_event(start_event("c1", "q1", "a1"));

        s.transport_error("connection lost");

        assert_eq!(s.global_error(), Some("connection lost"));
        assert!(!s.is_streaming());
        assert_ne!(s.message("a1").unwrap().status, MessageStatus::Streaming);
    }

    #[test]
    fn test_error_event_survives_response_end() {
        let mut s = store();
        s.apply_event(start_event("c1", "q1", "a1"));
        s.apply_event(StreamEvent::Error {
            response_id: "a1".to_string(),
            error_type: "throttled".to_string(),
            message: "rate limited".to_string(),
            details: Some(serde_json::json!({"retry_after": 30})),
            timestamp: Utc::now(),
        });
        s.apply_event(StreamEvent::ResponseEnd {
            response_id: "a1".to_string(),
            status: "error".to_string(),
            usage: None,
            chat_id: None,
            timestamp: Utc::now(),
        });

        let message = s.message("a1").unwrap();
        assert_eq!(message.status, MessageStatus::Error);
        let error = message.event_data.error.as_ref().unwrap();
        assert_eq!(error.error_type, "throttled");
        assert_eq!(error.details.as_ref().unwrap()["retry_after"], 30);
    }

    #[test]
    fn test_set_active_path_rejects_invalid() {
        let mut s = store();
        s.apply_event(start_event("c1", "q1", "a1"));

        s.set_active_path("c1", vec!["a1".to_string(), "q1".to_string()]);
        assert_eq!(s.active_path("c1"), ["q1", "a1"]);

        s.set_active_path("c1", vec!["q1".to_string(), "a1".to_string()]);
        assert_eq!(s.active_path("c1"), ["q1", "a1"]);
    }

    #[test]
    fn test_tool_call_deltas_accumulate() {
        let mut s = store();
        s.apply_event(start_event("c1", "q1", "a1"));
        s.apply_event(StreamEvent::ToolCall {
            response_id: "a1".to_string(),
            tool_name: "search".to_string(),
            tool_id: "t1".to_string(),
            tool_args: serde_json::json!({"query": "ru"}),
            timestamp: Utc::now(),
        });
        s.apply_event(StreamEvent::ToolCall {
            response_id: "a1".to_string(),
            tool_name: "search".to_string(),
            tool_id: "t1".to_string(),
            tool_args: serde_json::json!({"query": "st"}),
            timestamp: Utc::now(),
        });
        s.apply_event(StreamEvent::ToolReturn {
            response_id: "a1".to_string(),
            tool_name: "search".to_string(),
            tool_id: "t1".to_string(),
            result: serde_json::json!({"hits": 2}),
            timestamp: Utc::now(),
        });

        let message = s.message("a1").unwrap();
        let tool_parts: Vec<_> = message
            .parts
            .iter()
            .filter(|p| matches!(p, Part::ToolCall { .. }))
            .collect();
        assert_eq!(tool_parts.len(), 1);
        match tool_parts[0] {
            Part::ToolCall { tool_args, result, .. } => {
                assert_eq!(tool_args["query"], "rust");
                assert_eq!(result.as_ref().unwrap()["hits"], 2);
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[test]
    fn test_clear_wipes_everything() {
        let mut s = store();
        s.apply_event(start_event("c1", "q1", "a1"));
        s.apply_event(content_event("a1", "Hello"));

        s.clear();

        assert!(s.message("a1").is_none());
        assert!(s.active_path("c1").is_empty());
        assert!(!s.is_streaming());
    }
}
