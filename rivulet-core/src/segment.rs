//! Event history segmentation
//!
//! Groups a message's raw applied-event sequence into render-ready segments:
//! maximal runs of consecutive same-kind events merge into one segment, a
//! kind change starts a new one. Two deliberate exceptions:
//!
//! - Tool-call deltas for the *same* invocation (tool name + id) merge even
//!   across run boundaries; they are one logical call streamed in pieces,
//!   and the matching `tool_return` attaches its result to that segment.
//! - Document segments always come last, regardless of arrival position, so
//!   a renderer can show "citations at the end".
//!
//! Segmentation is pure and side-effect free; recomputing it on every render
//! yields identical output for an unchanged history. Messages loaded from
//! the REST API have no event history, so [`segment_parts`] derives the same
//! segment shape from their parts list.

use serde::Serialize;

use crate::protocol::{parse_status_message, StreamEvent};
use crate::types::{Part, ResearchPhase};

/// One renderable run of a message's content
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "segment_kind", rename_all = "snake_case")]
pub enum Segment {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
    },
    Status {
        phase: Option<ResearchPhase>,
        title: String,
        text: String,
    },
    ToolCall {
        tool_name: String,
        tool_id: String,
        tool_args: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Document {
        document_id: String,
        title: String,
        pointer: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        word_count: Option<u32>,
    },
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
    Image {
        pointer: String,
        mime_type: String,
    },
}

/// Merge a tool-argument delta into accumulated arguments.
///
/// Objects merge key-wise (recursively), string fragments concatenate,
/// anything else replaces the accumulated value. Null never overwrites.
pub fn merge_tool_args(base: &mut serde_json::Value, delta: &serde_json::Value) {
    use serde_json::Value;

    match (&mut *base, delta) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(delta_map)) => {
            for (key, value) in delta_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_tool_args(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::String(base_str), Value::String(delta_str)) => {
            base_str.push_str(delta_str);
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Segment a message's applied-event history.
pub fn segment_history(events: &[StreamEvent]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut documents: Vec<Segment> = Vec::new();

    for event in events {
        match event {
            StreamEvent::Content { content, .. } => {
                if let Some(Segment::Text { content: existing }) = segments.last_mut() {
                    existing.push_str(content);
                } else {
                    segments.push(Segment::Text {
                        content: content.clone(),
                    });
                }
            }
            StreamEvent::Reasoning { text, .. } => {
                let delta = text.as_deref().unwrap_or("");
                if let Some(Segment::Reasoning { content }) = segments.last_mut() {
                    content.push_str(delta);
                } else {
                    segments.push(Segment::Reasoning {
                        content: delta.to_string(),
                    });
                }
            }
            StreamEvent::Status { message, .. } => {
                let payload = parse_status_message(message.as_deref());
                let title = payload.title.clone().unwrap_or_default();
                match segments.last_mut() {
                    // Consecutive statuses for the same phase are one segment;
                    // the latest title/text wins
                    Some(Segment::Status { phase, title: t, text })
                        if *phase == payload.phase =>
                    {
                        if !title.is_empty() {
                            *t = title;
                        }
                        *text = payload.text;
                    }
                    _ => segments.push(Segment::Status {
                        phase: payload.phase,
                        title,
                        text: payload.text,
                    }),
                }
            }
            StreamEvent::ToolCall {
                tool_name,
                tool_id,
                tool_args,
                ..
            } => {
                match find_tool_call(&segments, tool_name, tool_id) {
                    Some(i) => {
                        if let Segment::ToolCall { tool_args: args, .. } = &mut segments[i] {
                            merge_tool_args(args, tool_args);
                        }
                    }
                    None => segments.push(Segment::ToolCall {
                        tool_name: tool_name.clone(),
                        tool_id: tool_id.clone(),
                        tool_args: tool_args.clone(),
                        result: None,
                    }),
                }
            }
            StreamEvent::ToolReturn {
                tool_name,
                tool_id,
                result,
                ..
            } => {
                match find_tool_call(&segments, tool_name, tool_id) {
                    Some(i) => {
                        if let Segment::ToolCall { result: slot, .. } = &mut segments[i] {
                            *slot = Some(result.clone());
                        }
                    }
                    // Return without a visible call (call may have been
                    // suppressed by research gating)
                    None => segments.push(Segment::ToolCall {
                        tool_name: tool_name.clone(),
                        tool_id: tool_id.clone(),
                        tool_args: serde_json::Value::Null,
                        result: Some(result.clone()),
                    }),
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
                documents.push(Segment::Document {
                    document_id: document_id.clone(),
                    title: title.clone(),
                    pointer: pointer.clone(),
                    mime_type: mime_type.clone(),
                    page_count: *page_count,
                    word_count: *word_count,
                });
            }
            StreamEvent::Citation {
                document_id,
                text,
                page,
                section,
                reference_number,
                ..
            } => {
                segments.push(Segment::Citation {
                    document_id: document_id.clone(),
                    text: text.clone(),
                    page: *page,
                    section: section.clone(),
                    reference_number: *reference_number,
                });
            }
            // Lifecycle and bookkeeping events produce no render segments
            StreamEvent::ResponseStart { .. }
            | StreamEvent::ResponseEnd { .. }
            | StreamEvent::Metadata { .. }
            | StreamEvent::Error { .. } => {}
        }
    }

    segments.extend(documents);
    segments
}

fn find_tool_call(segments: &[Segment], name: &str, id: &str) -> Option<usize> {
    segments.iter().position(|s| {
        matches!(
            s,
            Segment::ToolCall {
                tool_name,
                tool_id,
                ..
            } if tool_name == name && tool_id == id
        )
    })
}

/// Segment a historical message's parts list.
///
/// Produces the same segment shape as [`segment_history`] for messages that
/// were loaded via REST and carry no event history.
pub fn segment_parts(parts: &[Part]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut documents: Vec<Segment> = Vec::new();

    for part in parts {
        match part {
            Part::Text { content } => {
                if let Some(Segment::Text { content: existing }) = segments.last_mut() {
                    existing.push_str(content);
                } else {
                    segments.push(Segment::Text {
                        content: content.clone(),
                    });
                }
            }
            Part::Reasoning { content } => {
                if let Some(Segment::Reasoning { content: existing }) = segments.last_mut() {
                    existing.push_str(content);
                } else {
                    segments.push(Segment::Reasoning {
                        content: content.clone(),
                    });
                }
            }
            Part::ToolCall {
                tool_name,
                tool_id,
                tool_args,
                result,
            } => {
                segments.push(Segment::ToolCall {
                    tool_name: tool_name.clone(),
                    tool_id: tool_id.clone(),
                    tool_args: tool_args.clone(),
                    result: result.clone(),
                });
            }
            Part::Document {
                document_id,
                title,
                pointer,
                mime_type,
                page_count,
                word_count,
            } => {
                documents.push(Segment::Document {
                    document_id: document_id.clone(),
                    title: title.clone(),
                    pointer: pointer.clone(),
                    mime_type: mime_type.clone(),
                    page_count: *page_count,
                    word_count: *word_count,
                });
            }
            Part::Citation {
                document_id,
                text,
                page,
                section,
                reference_number,
            } => {
                segments.push(Segment::Citation {
                    document_id: document_id.clone(),
                    text: text.clone(),
                    page: *page,
                    section: section.clone(),
                    reference_number: *reference_number,
                });
            }
            Part::Image { pointer, mime_type } => {
                segments.push(Segment::Image {
                    pointer: pointer.clone(),
                    mime_type: mime_type.clone(),
                });
            }
        }
    }

    segments.extend(documents);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content {
            response_id: "a1".to_string(),
            content: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn reasoning(text: &str) -> StreamEvent {
        StreamEvent::Reasoning {
            response_id: "a1".to_string(),
            text: Some(text.to_string()),
            timestamp: Utc::now(),
        }
    }

    fn tool_call(id: &str, args: serde_json::Value) -> StreamEvent {
        StreamEvent::ToolCall {
            response_id: "a1".to_string(),
            tool_name: "search".to_string(),
            tool_id: id.to_string(),
            tool_args: args,
            timestamp: Utc::now(),
        }
    }

    fn document(id: &str) -> StreamEvent {
        StreamEvent::Document {
            response_id: "a1".to_string(),
            document_id: id.to_string(),
            title: format!("Doc {}", id),
            pointer: format!("s3://bucket/{}", id),
            mime_type: "application/pdf".to_string(),
            page_count: Some(3),
            word_count: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_consecutive_content_merges() {
        let events = vec![content("Hel"), content("lo"), reasoning("think"), content("!")];
        let segments = segment_history(&events);

        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[0],
            Segment::Text {
                content: "Hello".to_string()
            }
        );
        assert_eq!(
            segments[2],
            Segment::Text {
                content: "!".to_string()
            }
        );
    }

    #[test]
    fn test_idempotent() {
        let events = vec![
            content("a"),
            tool_call("t1", serde_json::json!({"query": "rust"})),
            content("b"),
            document("d1"),
            content("c"),
        ];
        let first = segment_history(&events);
        let second = segment_history(&events);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tool_deltas_merge_across_boundaries() {
        let events = vec![
            tool_call("t1", serde_json::json!({"query": "ru"})),
            content("interleaved"),
            tool_call("t1", serde_json::json!({"query": "st"})),
            StreamEvent::ToolReturn {
                response_id: "a1".to_string(),
                tool_name: "search".to_string(),
                tool_id: "t1".to_string(),
                result: serde_json::json!({"hits": 3}),
                timestamp: Utc::now(),
            },
        ];
        let segments = segment_history(&events);

        assert_eq!(segments.len(), 2);
        match &segments[0] {
            Segment::ToolCall {
                tool_args, result, ..
            } => {
                assert_eq!(tool_args["query"], "rust");
                assert_eq!(result.as_ref().unwrap()["hits"], 3);
            }
            other => panic!("unexpected segment: {:?}", other),
        }
    }

    #[test]
    fn test_distinct_tool_ids_stay_separate() {
        let events = vec![
            tool_call("t1", serde_json::json!({"query": "a"})),
            tool_call("t2", serde_json::json!({"query": "b"})),
        ];
        let segments = segment_history(&events);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_documents_emitted_last() {
        let events = vec![document("d1"), content("answer"), document("d2")];
        let segments = segment_history(&events);

        assert_eq!(segments.len(), 3);
        assert!(matches!(segments[0], Segment::Text { .. }));
        match (&segments[1], &segments[2]) {
            (
                Segment::Document { document_id: d1, .. },
                Segment::Document { document_id: d2, .. },
            ) => {
                assert_eq!(d1, "d1");
                assert_eq!(d2, "d2");
            }
            other => panic!("unexpected segments: {:?}", other),
        }
    }

    #[test]
    fn test_same_phase_statuses_merge() {
        let status = |msg: &str| StreamEvent::Status {
            response_id: "a1".to_string(),
            status: "status_update".to_string(),
            message: Some(msg.to_string()),
            timestamp: Utc::now(),
        };
        let events = vec![
            status(r#"{"phase":"searching","text":"query 1"}"#),
            status(r#"{"phase":"searching","text":"query 2"}"#),
            status(r#"{"phase":"complete","title":"Finished","text":""}"#),
        ];
        let segments = segment_history(&events);

        assert_eq!(segments.len(), 2);
        match &segments[0] {
            Segment::Status { phase, text, .. } => {
                assert_eq!(*phase, Some(ResearchPhase::Searching));
                assert_eq!(text, "query 2");
            }
            other => panic!("unexpected segment: {:?}", other),
        }
        match &segments[1] {
            Segment::Status { title, .. } => assert_eq!(title, "Finished"),
            other => panic!("unexpected segment: {:?}", other),
        }
    }

    #[test]
    fn test_segment_parts_mirrors_history_shape() {
        let parts = vec![
            Part::Document {
                document_id: "d1".to_string(),
                title: "Doc".to_string(),
                pointer: "s3://bucket/d1".to_string(),
                mime_type: "application/pdf".to_string(),
                page_count: None,
                word_count: None,
            },
            Part::Text {
                content: "Hel".to_string(),
            },
            Part::Text {
                content: "lo".to_string(),
            },
        ];
        let segments = segment_parts(&parts);

        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[0],
            Segment::Text {
                content: "Hello".to_string()
            }
        );
        assert!(matches!(segments[1], Segment::Document { .. }));
    }

    #[test]
    fn test_merge_tool_args_string_fragments() {
        let mut base = serde_json::json!({"arg": "par"});
        merge_tool_args(&mut base, &serde_json::json!({"arg": "tial"}));
        assert_eq!(base["arg"], "partial");

        // Null never clobbers accumulated state
        merge_tool_args(&mut base, &serde_json::Value::Null);
        assert_eq!(base["arg"], "partial");
    }
}
