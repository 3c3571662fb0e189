//! Core domain types for rivulet
//!
//! These types form the canonical data model reconstructed by the store from
//! the incrementally delivered event stream.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Chat** | A conversation thread containing an ordered forest of messages |
//! | **Message** | One request (user turn) or response (assistant turn) node in the tree |
//! | **Part** | A typed content fragment within a message (text, document, citation, ...) |
//! | **Active path** | The linear sequence of message ids currently rendered for a chat |
//! | **Branch** | An alternate subtree created by editing a request or regenerating a response |
//! | **Research phase** | A gating sub-workflow suppressing intermediate output from final content |
//!
//! ## Identity
//!
//! Message ids are assigned by the backend, never by the client. The only
//! client-generated id is the correlation id on a pending generation record,
//! which exists purely so a transport failure can be matched back to the
//! request that caused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::StreamEvent;

// ============================================
// Chat
// ============================================

/// A conversation thread.
///
/// The chat itself is a thin record; its structure lives in the store as the
/// per-chat message-id list and active path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier (assigned by the backend)
    pub chat_id: String,
    /// Human-friendly title
    pub title: String,
    /// When the chat was created
    pub created_at: DateTime<Utc>,
    /// Most recent update timestamp
    pub updated_at: DateTime<Utc>,
    /// Extensible metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A task handler advertised by the backend, with the models it accepts.
///
/// Used during model resolution: an explicit model choice wins, then the
/// handler's default, then the first available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHandler {
    /// Handler name, e.g. `chat` or `rag_oss`
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Model used when the caller does not pick one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model_id: Option<String>,
    /// All models this handler accepts
    #[serde(default)]
    pub model_ids: Vec<String>,
}

// ============================================
// Messages
// ============================================

/// Whether a message is a user turn or an assistant turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// User turn
    Request,
    /// Assistant turn
    Response,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(MessageKind::Request),
            "response" => Ok(MessageKind::Response),
            _ => Err(format!("unknown message kind: {}", s)),
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Events are still arriving for this message
    Streaming,
    /// Terminal: all content delivered
    Complete,
    /// Terminal: the backend reported a failure
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Streaming => "streaming",
            MessageStatus::Complete => "complete",
            MessageStatus::Error => "error",
        }
    }

    /// Whether this status is terminal (no further events expected)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streaming" => Ok(MessageStatus::Streaming),
            "complete" | "completed" => Ok(MessageStatus::Complete),
            "error" => Ok(MessageStatus::Error),
            _ => Err(format!("unknown message status: {}", s)),
        }
    }
}

/// Structured error detail attached to a message in `Error` status.
///
/// Kept separate from the global transport error so the UI can render an
/// inline failure without losing the surrounding conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error class from the `error` event
    pub error_type: String,
    /// Human-readable message
    pub message: String,
    /// Free-form provider detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Token usage reported on `response_end`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

/// Per-message event bookkeeping.
///
/// `event_history` is the raw applied-event sequence the segmenter consumes;
/// the rest is terminal metadata that arrives out of band of the parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    /// Every event applied to this message, in application order
    #[serde(default)]
    pub event_history: Vec<StreamEvent>,
    /// Structured error, if the message ended in `Error` status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Token usage from `response_end`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Model that produced this response (from `response_start`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Task handler that produced this response (from `response_start`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Metadata merged from `metadata` events
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One node in a chat's message tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier (assigned by the backend)
    pub message_id: String,
    /// Chat this message belongs to
    pub chat_id: String,
    /// Parent message id; `None` only for a chat's first message
    pub parent_id: Option<String>,
    /// Request or response
    pub kind: MessageKind,
    /// Ordered content fragments
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Delivery status
    pub status: MessageStatus,
    /// Creation timestamp (orders siblings)
    pub timestamp: DateTime<Utc>,
    /// Event bookkeeping (history, error, usage)
    #[serde(default)]
    pub event_data: EventData,
}

impl Message {
    /// Create an empty streaming response message
    pub fn streaming_response(
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        parent_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            chat_id: chat_id.into(),
            parent_id: Some(parent_id.into()),
            kind: MessageKind::Response,
            parts: Vec::new(),
            status: MessageStatus::Streaming,
            timestamp,
            event_data: EventData::default(),
        }
    }

    /// Create a complete request message with a single text part
    pub fn request(
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        parent_id: Option<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            chat_id: chat_id.into(),
            parent_id,
            kind: MessageKind::Request,
            parts: vec![Part::Text {
                content: content.into(),
            }],
            status: MessageStatus::Complete,
            timestamp,
            event_data: EventData::default(),
        }
    }

    /// Concatenated text content of all text parts
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { content } = part {
                out.push_str(content);
            }
        }
        out
    }
}

// ============================================
// Parts
// ============================================

/// A typed content fragment within a message.
///
/// Part kinds mirror the wire protocol: text and reasoning stream as deltas,
/// tool calls accumulate argument fragments, documents and citations arrive
/// whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum Part {
    /// Plain text content
    Text { content: String },
    /// Model reasoning/thinking output
    Reasoning { content: String },
    /// A source document surfaced by retrieval
    Document {
        document_id: String,
        title: String,
        /// s3://<bucket>/<key> or file://<path>
        pointer: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        word_count: Option<u32>,
    },
    /// A citation into a previously surfaced document
    Citation {
        document_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        section: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference_number: Option<u32>,
    },
    /// A tool invocation (args may accumulate across delta events)
    ToolCall {
        tool_name: String,
        tool_id: String,
        tool_args: serde_json::Value,
        /// Result attached once the matching `tool_return` arrives
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    /// Inline image content
    Image {
        pointer: String,
        mime_type: String,
    },
}

impl Part {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Part::Text { .. } => "text",
            Part::Reasoning { .. } => "reasoning",
            Part::Document { .. } => "document",
            Part::Citation { .. } => "citation",
            Part::ToolCall { .. } => "tool-call",
            Part::Image { .. } => "image",
        }
    }
}

// ============================================
// Research Progress
// ============================================

/// Phase of the research sub-workflow.
///
/// Phases are ordered; the tracker only ever moves forward (see
/// [`crate::store::research`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Start,
    Planning,
    Searching,
    Evaluating,
    Analyzing,
    Complete,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Start => "start",
            ResearchPhase::Planning => "planning",
            ResearchPhase::Searching => "searching",
            ResearchPhase::Evaluating => "evaluating",
            ResearchPhase::Analyzing => "analyzing",
            ResearchPhase::Complete => "complete",
        }
    }

    /// Ordinal rank used to enforce monotonic transitions
    pub fn rank(&self) -> u8 {
        match self {
            ResearchPhase::Start => 0,
            ResearchPhase::Planning => 1,
            ResearchPhase::Searching => 2,
            ResearchPhase::Evaluating => 3,
            ResearchPhase::Analyzing => 4,
            ResearchPhase::Complete => 5,
        }
    }

    /// Whether this phase is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchPhase::Complete)
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResearchPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ResearchPhase::Start),
            "planning" => Ok(ResearchPhase::Planning),
            "searching" => Ok(ResearchPhase::Searching),
            "evaluating" => Ok(ResearchPhase::Evaluating),
            "analyzing" => Ok(ResearchPhase::Analyzing),
            "complete" => Ok(ResearchPhase::Complete),
            _ => Err(format!("unknown research phase: {}", s)),
        }
    }
}

/// One update on the side progress channel.
///
/// Gated events (content, tool calls, documents suppressed from message
/// parts while researching) are redirected here so a UI can render a
/// progress panel without polluting the final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Phase active when this update was recorded (if known)
    pub phase: Option<ResearchPhase>,
    /// Display title ("Searching sources", "Finalizing", ...)
    pub title: String,
    /// Body text of the update
    pub text: String,
    /// When the update was recorded
    pub timestamp: DateTime<Utc>,
}

/// Per-message research workflow state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchProgress {
    /// Current phase (`None` until the first recognized phase status)
    pub phase: Option<ResearchPhase>,
    /// True between the first phase status and `complete`
    pub is_researching: bool,
    /// When the `complete` phase was observed
    pub completed_at: Option<DateTime<Utc>>,
    /// Latch: the finalizing→finished conversion happened already
    pub finish_latched: bool,
    /// Side progress channel (ordered)
    pub updates: Vec<ProgressUpdate>,
}
