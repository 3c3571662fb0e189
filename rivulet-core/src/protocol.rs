//! Wire protocol for the streaming conversation channel
//!
//! Inbound events arrive one per transport frame, discriminated by a `type`
//! tag. Ordering is best-effort: events for a single message id are expected
//! in FIFO order, but an event may still arrive before the `response_start`
//! that creates its target message (the store's buffer absorbs that race).
//!
//! Outbound traffic is exactly two commands: initialize a generation, and
//! interrupt the current one.
//!
//! ## Status payloads
//!
//! `status` events carry a `message` string that may itself contain an
//! embedded JSON envelope describing a research phase. Parsing is defensive
//! and typed ([`StatusPayload`]): a well-formed envelope yields a
//! `{phase, title, text}` triple, anything else degrades to an unparsed
//! best-guess built from the raw string. No speculative extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ResearchPhase;

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

// ============================================
// Inbound events
// ============================================

/// One event delivered over the streaming channel.
///
/// Field names and optionality follow the server's event schema. Every
/// variant carries the `response_id` of the message it addresses;
/// `response_start` additionally names the request/chat pair it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Creates the request/response message pair for a generation
    ResponseStart {
        response_id: String,
        request_id: String,
        chat_id: String,
        task: String,
        model_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A text delta for the response body
    Content {
        response_id: String,
        content: String,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A reasoning/thinking delta
    Reasoning {
        response_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A progress/status update; `message` may embed a JSON envelope
    Status {
        response_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A structured failure scoped to one message
    Error {
        response_id: String,
        error_type: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A tool invocation; `tool_args` may be a partial delta to accumulate
    ToolCall {
        response_id: String,
        tool_name: String,
        tool_id: String,
        tool_args: serde_json::Value,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// The result of an earlier tool invocation
    ToolReturn {
        response_id: String,
        tool_name: String,
        tool_id: String,
        result: serde_json::Value,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// Free-form metadata merged into the message's event data
    Metadata {
        response_id: String,
        metadata: serde_json::Value,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A retrieval document surfaced during generation
    Document {
        response_id: String,
        document_id: String,
        title: String,
        pointer: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        word_count: Option<u32>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// A citation into a surfaced document
    Citation {
        response_id: String,
        document_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        section: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference_number: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        document_title: Option<String>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
    /// Terminal event for a generation
    ResponseEnd {
        response_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<crate::types::Usage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
        #[serde(default = "default_timestamp")]
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    /// The message id this event addresses
    pub fn response_id(&self) -> &str {
        match self {
            StreamEvent::ResponseStart { response_id, .. }
            | StreamEvent::Content { response_id, .. }
            | StreamEvent::Reasoning { response_id, .. }
            | StreamEvent::Status { response_id, .. }
            | StreamEvent::Error { response_id, .. }
            | StreamEvent::ToolCall { response_id, .. }
            | StreamEvent::ToolReturn { response_id, .. }
            | StreamEvent::Metadata { response_id, .. }
            | StreamEvent::Document { response_id, .. }
            | StreamEvent::Citation { response_id, .. }
            | StreamEvent::ResponseEnd { response_id, .. } => response_id,
        }
    }

    /// Event type name as it appears on the wire
    pub fn type_str(&self) -> &'static str {
        match self {
            StreamEvent::ResponseStart { .. } => "response_start",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::Status { .. } => "status",
            StreamEvent::Error { .. } => "error",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolReturn { .. } => "tool_return",
            StreamEvent::Metadata { .. } => "metadata",
            StreamEvent::Document { .. } => "document",
            StreamEvent::Citation { .. } => "citation",
            StreamEvent::ResponseEnd { .. } => "response_end",
        }
    }

    /// The event's own timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StreamEvent::ResponseStart { timestamp, .. }
            | StreamEvent::Content { timestamp, .. }
            | StreamEvent::Reasoning { timestamp, .. }
            | StreamEvent::Status { timestamp, .. }
            | StreamEvent::Error { timestamp, .. }
            | StreamEvent::ToolCall { timestamp, .. }
            | StreamEvent::ToolReturn { timestamp, .. }
            | StreamEvent::Metadata { timestamp, .. }
            | StreamEvent::Document { timestamp, .. }
            | StreamEvent::Citation { timestamp, .. }
            | StreamEvent::ResponseEnd { timestamp, .. } => *timestamp,
        }
    }
}

// ============================================
// Status payload
// ============================================

/// Typed result of parsing a `status` event's `message` string.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPayload {
    /// Recognized research phase, if the envelope named one
    pub phase: Option<ResearchPhase>,
    /// Display title, if the envelope carried one
    pub title: Option<String>,
    /// Body text (envelope text, or the raw string when unparsed)
    pub text: String,
    /// False when we fell back to the raw string
    pub parsed: bool,
}

impl StatusPayload {
    /// Best-guess payload for an unparseable message string
    fn unparsed(raw: &str) -> Self {
        Self {
            phase: None,
            title: None,
            text: raw.to_string(),
            parsed: false,
        }
    }
}

/// Schema for the embedded status envelope.
///
/// Versioned so the server can evolve the shape; unknown versions fall back
/// to the unparsed variant rather than a partial read.
#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    /// Some servers nest the envelope one level deeper
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    message_data: Option<serde_json::Value>,
}

const STATUS_ENVELOPE_VERSION: u32 = 1;

/// Parse a `status` event's `message` string into a [`StatusPayload`].
///
/// Handles one level of nesting (`message`/`message_data` holding either the
/// envelope or a JSON-encoded string of it). Anything malformed degrades to
/// [`StatusPayload::unparsed`], never an error.
pub fn parse_status_message(message: Option<&str>) -> StatusPayload {
    let raw = match message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return StatusPayload::unparsed(""),
    };

    match serde_json::from_str::<StatusEnvelope>(raw) {
        Ok(envelope) => resolve_envelope(envelope, raw, 0),
        Err(_) => StatusPayload::unparsed(raw),
    }
}

fn resolve_envelope(envelope: StatusEnvelope, raw: &str, depth: u8) -> StatusPayload {
    // Unknown future versions: refuse a partial read
    if let Some(v) = envelope.version {
        if v > STATUS_ENVELOPE_VERSION {
            tracing::warn!(version = v, "unknown status envelope version");
            return StatusPayload::unparsed(raw);
        }
    }

    // Nested envelope, at most one level deep
    if depth == 0 {
        if let Some(inner) = envelope.message_data.as_ref().or(envelope.message.as_ref()) {
            if let Some(nested) = parse_nested(inner) {
                // Every JSON object deserializes into the envelope shape, so
                // only treat it as nested when it actually carries content
                if nested.phase.is_some() || nested.title.is_some() || nested.text.is_some() {
                    return resolve_envelope(nested, raw, depth + 1);
                }
            }
        }
    }

    let phase = envelope.phase.as_deref().and_then(|p| p.parse().ok());
    let text = envelope
        .text
        .or_else(|| match envelope.message {
            Some(serde_json::Value::String(s)) => Some(s),
            _ => None,
        })
        .unwrap_or_default();

    StatusPayload {
        phase,
        title: envelope.title,
        text,
        parsed: true,
    }
}

fn parse_nested(value: &serde_json::Value) -> Option<StatusEnvelope> {
    match value {
        serde_json::Value::Object(_) => {
            serde_json::from_value(value.clone()).ok()
        }
        serde_json::Value::String(s) => serde_json::from_str(s).ok(),
        _ => None,
    }
}

// ============================================
// Outbound commands
// ============================================

/// The two client→server commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Begin a generation for a chat
    Generate {
        task: String,
        chat_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        model_id: String,
        parts: Vec<crate::types::Part>,
        #[serde(skip_serializing_if = "Option::is_none")]
        persona: Option<String>,
    },
    /// Out-of-band interrupt of the current generation (no payload)
    Interrupt,
}

/// Outbound half of the transport.
///
/// The store never talks to the network directly; it hands commands to a
/// sink owned by the caller. The inbound half is simply whoever feeds
/// [`StreamEvent`]s into [`crate::store::ChatStore::apply_event`]; owning
/// the receiver *is* the subscription, so there is no global registry of
/// handlers to deduplicate.
pub trait CommandSink {
    fn send(&mut self, command: Command) -> Result<()>;
}

/// Channel-backed [`CommandSink`] for tests and in-process transports
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::UnboundedSender<Command>,
}

impl ChannelTransport {
    /// Create a transport and the receiver that owns its command stream
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CommandSink for ChannelTransport {
    fn send(&mut self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|e| crate::error::Error::Transport(format!("command channel closed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let json = r#"{"type":"content","response_id":"a1","content":"Hello"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.response_id(), "a1");
        assert_eq!(event.type_str(), "content");
        match &event {
            StreamEvent::Content { content, .. } => assert_eq!(content, "Hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_response_start_parses_optional_parent() {
        let json = r#"{"type":"response_start","response_id":"a1","request_id":"q1","chat_id":"c1","task":"chat","model_id":"m1"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::ResponseStart { parent_id, .. } => assert!(parent_id.is_none()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_status_payload_plain_text() {
        let payload = parse_status_message(Some("working on it"));
        assert!(!payload.parsed);
        assert_eq!(payload.text, "working on it");
        assert!(payload.phase.is_none());
    }

    #[test]
    fn test_status_payload_envelope() {
        let payload = parse_status_message(Some(
            r#"{"phase":"searching","title":"Searching sources","text":"querying index"}"#,
        ));
        assert!(payload.parsed);
        assert_eq!(payload.phase, Some(ResearchPhase::Searching));
        assert_eq!(payload.title.as_deref(), Some("Searching sources"));
        assert_eq!(payload.text, "querying index");
    }

    #[test]
    fn test_status_payload_nested_envelope() {
        let payload = parse_status_message(Some(
            r#"{"message_data":"{\"phase\":\"complete\",\"text\":\"done\"}"}"#,
        ));
        assert!(payload.parsed);
        assert_eq!(payload.phase, Some(ResearchPhase::Complete));
        assert_eq!(payload.text, "done");
    }

    #[test]
    fn test_status_payload_unknown_phase_keeps_text() {
        let payload = parse_status_message(Some(
            r#"{"phase":"http_request","text":"GET /search"}"#,
        ));
        assert!(payload.parsed);
        assert!(payload.phase.is_none());
        assert_eq!(payload.text, "GET /search");
    }

    #[test]
    fn test_status_payload_future_version_degrades() {
        let payload =
            parse_status_message(Some(r#"{"version":99,"phase":"searching","text":"x"}"#));
        assert!(!payload.parsed);
        assert!(payload.phase.is_none());
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::Generate {
            task: "chat".to_string(),
            chat_id: "c1".to_string(),
            parent_id: None,
            model_id: "m1".to_string(),
            parts: vec![crate::types::Part::Text {
                content: "Hi".to_string(),
            }],
            persona: None,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "generate");
        assert_eq!(json["parts"][0]["part_kind"], "text");

        let interrupt = serde_json::to_value(Command::Interrupt).unwrap();
        assert_eq!(interrupt["command"], "interrupt");
    }
}
