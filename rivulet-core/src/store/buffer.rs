//! Pending event buffer
//!
//! Holds events that arrived before their target message existed. An event
//! addressed to an unknown message id is queued here keyed by that id; when
//! the `response_start` that creates the message is processed, the queue is
//! drained and replayed synchronously in arrival order.
//!
//! Each key carries exactly one cleanup deadline, set when its first event
//! is queued. State transitions are single-threaded, so deadlines are plain
//! instants checked by [`EventBuffer::take_expired`] from the transport's
//! event loop rather than OS timers. Expiry discards the queue after one
//! final drain attempt; delivery is best-effort, never guaranteed.
//!
//! Queues are capped with a drop-oldest policy. Overflow bounds memory, not
//! correctness: dropped events are gone, warn-logged only.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::config::BufferConfig;
use crate::protocol::StreamEvent;

/// Queue of events awaiting a not-yet-created message
struct PendingQueue {
    events: VecDeque<StreamEvent>,
    /// Single cleanup deadline for this key (never extended)
    deadline: Instant,
    /// Events evicted by the cap, for logging
    dropped: usize,
}

/// Per-message pending event queues with bounded size and cleanup deadlines
pub struct EventBuffer {
    config: BufferConfig,
    queues: HashMap<String, PendingQueue>,
}

impl EventBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            queues: HashMap::new(),
        }
    }

    /// Queue an event for a message that does not exist yet.
    ///
    /// The first event for an id sets the key's cleanup deadline, tuned by
    /// that event's type (document events use the shorter window). Past the
    /// cap the oldest queued event is evicted. Never fails.
    pub fn push(&mut self, event: StreamEvent, now: Instant) {
        let message_id = event.response_id().to_string();
        let timeout = self.config.timeout_for(event.type_str());
        let cap = self.config.queue_cap;

        let queue = self.queues.entry(message_id.clone()).or_insert_with(|| {
            tracing::debug!(
                message_id = %message_id,
                timeout_ms = timeout.as_millis() as u64,
                "buffering events for unknown message"
            );
            PendingQueue {
                events: VecDeque::new(),
                deadline: now + timeout,
                dropped: 0,
            }
        });

        if queue.events.len() >= cap {
            queue.events.pop_front();
            queue.dropped += 1;
            tracing::warn!(
                message_id = %message_id,
                dropped = queue.dropped,
                cap,
                "pending event queue overflow, dropping oldest"
            );
        }

        queue.events.push_back(event);
    }

    /// Whether any events are queued for the given message id
    pub fn has_pending(&self, message_id: &str) -> bool {
        self.queues
            .get(message_id)
            .map(|q| !q.events.is_empty())
            .unwrap_or(false)
    }

    /// Remove and return all queued events for a message, in arrival order.
    ///
    /// Called when the target message is created; also cancels the key's
    /// cleanup deadline (the queue entry is gone).
    pub fn drain(&mut self, message_id: &str) -> Vec<StreamEvent> {
        match self.queues.remove(message_id) {
            Some(queue) => {
                if queue.dropped > 0 {
                    tracing::warn!(
                        message_id = %message_id,
                        dropped = queue.dropped,
                        replayed = queue.events.len(),
                        "draining queue that overflowed; oldest events were lost"
                    );
                }
                queue.events.into()
            }
            None => Vec::new(),
        }
    }

    /// Remove and return all queues whose deadline has passed.
    ///
    /// The caller attempts one final replay for each (the message may have
    /// appeared between buffering and expiry) and discards the rest.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(String, Vec<StreamEvent>)> {
        let expired: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| now >= q.deadline)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .map(|id| {
                let events = self.drain(&id);
                (id, events)
            })
            .collect()
    }

    /// Total queued events across all keys
    pub fn pending_count(&self) -> usize {
        self.queues.values().map(|q| q.events.len()).sum()
    }

    /// Drop all queues (store clear/logout)
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn content_event(id: &str, text: &str) -> StreamEvent {
        StreamEvent::Content {
            response_id: id.to_string(),
            content: text.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buffer = EventBuffer::new(BufferConfig::default());
        let now = Instant::now();

        buffer.push(content_event("a1", "Hel"), now);
        buffer.push(content_event("a1", "lo"), now);

        let drained = buffer.drain("a1");
        assert_eq!(drained.len(), 2);
        match (&drained[0], &drained[1]) {
            (
                StreamEvent::Content { content: c0, .. },
                StreamEvent::Content { content: c1, .. },
            ) => {
                assert_eq!(c0, "Hel");
                assert_eq!(c1, "lo");
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // Queue entry is gone after drain
        assert!(!buffer.has_pending("a1"));
        assert!(buffer.drain("a1").is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let config = BufferConfig {
            queue_cap: 10,
            ..Default::default()
        };
        let mut buffer = EventBuffer::new(config);
        let now = Instant::now();

        for i in 0..20 {
            buffer.push(content_event("a1", &format!("chunk-{}", i)), now);
        }

        let drained = buffer.drain("a1");
        assert_eq!(drained.len(), 10);
        // The 10 most recent survive
        match &drained[0] {
            StreamEvent::Content { content, .. } => assert_eq!(content, "chunk-10"),
            other => panic!("unexpected event: {:?}", other),
        }
        match &drained[9] {
            StreamEvent::Content { content, .. } => assert_eq!(content, "chunk-19"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_expiry_uses_first_event_deadline() {
        let mut buffer = EventBuffer::new(BufferConfig::default());
        let start = Instant::now();

        buffer.push(content_event("a1", "x"), start);
        // A later push must not extend the deadline
        buffer.push(content_event("a1", "y"), start + Duration::from_millis(150));

        assert!(buffer.take_expired(start + Duration::from_millis(100)).is_empty());

        let expired = buffer.take_expired(start + Duration::from_millis(200));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "a1");
        assert_eq!(expired[0].1.len(), 2);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_document_events_use_shorter_window() {
        let mut buffer = EventBuffer::new(BufferConfig::default());
        let start = Instant::now();

        buffer.push(
            StreamEvent::Document {
                response_id: "a1".to_string(),
                document_id: "d1".to_string(),
                title: "Doc".to_string(),
                pointer: "s3://bucket/key".to_string(),
                mime_type: "application/pdf".to_string(),
                page_count: None,
                word_count: None,
                timestamp: chrono::Utc::now(),
            },
            start,
        );
        buffer.push(content_event("a2", "x"), start);

        // 120ms < t < 200ms: only the document queue expires
        let expired = buffer.take_expired(start + Duration::from_millis(150));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "a1");
        assert!(buffer.has_pending("a2"));
    }
}
