//! Research phase tracker
//!
//! A small per-message state machine gating whether intermediate "thinking"
//! output is surfaced as message content or redirected to a side progress
//! channel.
//!
//! Phases advance `start → planning → searching → evaluating → analyzing →
//! complete` and never regress; a status naming an earlier phase is recorded
//! on the progress channel but leaves the machine where it is. Statuses with
//! no recognized phase are generic progress updates.
//!
//! Gating is asymmetric on purpose, mirroring the backend's behavior:
//! content suppression applies only to the research-capable task handler,
//! while tool-call and document suppression applies to every handler.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::protocol::StatusPayload;
use crate::types::{ProgressUpdate, ResearchPhase, ResearchProgress};

/// Default display title for a phase, used when the envelope has none
fn phase_title(phase: ResearchPhase) -> &'static str {
    match phase {
        ResearchPhase::Start => "Starting research",
        ResearchPhase::Planning => "Planning",
        ResearchPhase::Searching => "Searching sources",
        ResearchPhase::Evaluating => "Evaluating results",
        ResearchPhase::Analyzing => "Analyzing",
        ResearchPhase::Complete => "Finalizing",
    }
}

/// Per-message research workflow state machine
pub struct ResearchTracker {
    progress: HashMap<String, ResearchProgress>,
    /// Task handler whose content output is gated behind phases
    research_task: String,
}

impl ResearchTracker {
    pub fn new(research_task: impl Into<String>) -> Self {
        Self {
            progress: HashMap::new(),
            research_task: research_task.into(),
        }
    }

    /// Current progress for a message, if any status has been seen
    pub fn progress(&self, message_id: &str) -> Option<&ResearchProgress> {
        self.progress.get(message_id)
    }

    /// Apply a parsed `status` payload to a message's state machine.
    ///
    /// Recognized phases advance the machine monotonically; unrecognized
    /// ones record a generic update without moving it.
    pub fn on_status(&mut self, message_id: &str, payload: &StatusPayload, ts: DateTime<Utc>) {
        let entry = self.progress.entry(message_id.to_string()).or_default();

        match payload.phase {
            Some(phase) => {
                let advanced = match entry.phase {
                    Some(current) => phase.rank() > current.rank(),
                    None => true,
                };

                if advanced {
                    entry.phase = Some(phase);
                    entry.is_researching = !phase.is_terminal();
                    if phase.is_terminal() {
                        entry.completed_at = Some(ts);
                    }
                } else {
                    tracing::debug!(
                        message_id = %message_id,
                        current = ?entry.phase,
                        reported = %phase,
                        "ignoring backwards phase transition"
                    );
                }

                entry.updates.push(ProgressUpdate {
                    phase: Some(phase),
                    title: payload
                        .title
                        .clone()
                        .unwrap_or_else(|| phase_title(phase).to_string()),
                    text: payload.text.clone(),
                    timestamp: ts,
                });
            }
            None => {
                // Generic progress sub-state; the machine stays put
                entry.updates.push(ProgressUpdate {
                    phase: entry.phase,
                    title: payload.title.clone().unwrap_or_else(|| "Progress".to_string()),
                    text: payload.text.clone(),
                    timestamp: ts,
                });
            }
        }
    }

    /// Whether a `content` event for this message must be redirected to the
    /// progress channel instead of the message body.
    ///
    /// Content gating is handler-specific: it only applies when the message
    /// was produced by the research-capable task.
    pub fn suppresses_content(&self, message_id: &str, task: Option<&str>) -> bool {
        if task != Some(self.research_task.as_str()) {
            return false;
        }
        self.in_research(message_id)
    }

    /// Whether a `tool_call` or `document` event for this message must be
    /// redirected. Applies to every task handler.
    pub fn suppresses_side_events(&self, message_id: &str) -> bool {
        self.in_research(message_id)
    }

    fn in_research(&self, message_id: &str) -> bool {
        self.progress
            .get(message_id)
            .and_then(|p| p.phase)
            .map(|phase| !phase.is_terminal())
            .unwrap_or(false)
    }

    /// Record a gated event on the progress channel
    pub fn redirect(&mut self, message_id: &str, title: &str, text: String, ts: DateTime<Utc>) {
        let entry = self.progress.entry(message_id.to_string()).or_default();
        entry.updates.push(ProgressUpdate {
            phase: entry.phase,
            title: title.to_string(),
            text,
            timestamp: ts,
        });
    }

    /// Convert the "finalizing" update to "finished" on the first real
    /// content token after `complete`.
    ///
    /// Latched: the conversion happens at most once per message even if the
    /// backend reports `complete` more than once. Returns true when the
    /// conversion happened on this call.
    pub fn latch_finish(&mut self, message_id: &str) -> bool {
        let entry = match self.progress.get_mut(message_id) {
            Some(e) => e,
            None => return false,
        };

        if entry.finish_latched || entry.phase != Some(ResearchPhase::Complete) {
            return false;
        }

        entry.finish_latched = true;
        if let Some(update) = entry
            .updates
            .iter_mut()
            .rev()
            .find(|u| u.phase == Some(ResearchPhase::Complete))
        {
            update.title = "Finished".to_string();
        }
        true
    }

    /// Drop all tracked state (store clear/logout)
    pub fn clear(&mut self) {
        self.progress.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(phase: Option<ResearchPhase>, text: &str) -> StatusPayload {
        StatusPayload {
            phase,
            title: None,
            text: text.to_string(),
            parsed: true,
        }
    }

    fn tracker() -> ResearchTracker {
        ResearchTracker::new("rag_oss")
    }

    #[test]
    fn test_phases_advance_monotonically() {
        let mut t = tracker();
        let now = Utc::now();

        t.on_status("a1", &payload(Some(ResearchPhase::Searching), ""), now);
        assert_eq!(t.progress("a1").unwrap().phase, Some(ResearchPhase::Searching));

        // Backwards report does not regress the machine
        t.on_status("a1", &payload(Some(ResearchPhase::Start), ""), now);
        assert_eq!(t.progress("a1").unwrap().phase, Some(ResearchPhase::Searching));

        t.on_status("a1", &payload(Some(ResearchPhase::Complete), ""), now);
        let progress = t.progress("a1").unwrap();
        assert_eq!(progress.phase, Some(ResearchPhase::Complete));
        assert!(!progress.is_researching);
        assert!(progress.completed_at.is_some());
    }

    #[test]
    fn test_unknown_phase_records_update_without_moving() {
        let mut t = tracker();
        let now = Utc::now();

        t.on_status("a1", &payload(Some(ResearchPhase::Planning), ""), now);
        t.on_status("a1", &payload(None, "HTTP GET /search"), now);

        let progress = t.progress("a1").unwrap();
        assert_eq!(progress.phase, Some(ResearchPhase::Planning));
        assert_eq!(progress.updates.len(), 2);
        assert_eq!(progress.updates[1].text, "HTTP GET /search");
    }

    #[test]
    fn test_content_gating_is_handler_specific() {
        let mut t = tracker();
        let now = Utc::now();
        t.on_status("a1", &payload(Some(ResearchPhase::Searching), ""), now);

        assert!(t.suppresses_content("a1", Some("rag_oss")));
        assert!(!t.suppresses_content("a1", Some("chat")));
        assert!(!t.suppresses_content("a1", None));
        // Tool/document gating applies regardless of handler
        assert!(t.suppresses_side_events("a1"));
    }

    #[test]
    fn test_gating_ends_at_complete() {
        let mut t = tracker();
        let now = Utc::now();
        t.on_status("a1", &payload(Some(ResearchPhase::Searching), ""), now);
        t.on_status("a1", &payload(Some(ResearchPhase::Complete), ""), now);

        assert!(!t.suppresses_content("a1", Some("rag_oss")));
        assert!(!t.suppresses_side_events("a1"));
    }

    #[test]
    fn test_finish_latch_fires_once() {
        let mut t = tracker();
        let now = Utc::now();
        t.on_status("a1", &payload(Some(ResearchPhase::Searching), ""), now);
        t.on_status("a1", &payload(Some(ResearchPhase::Complete), ""), now);

        assert!(t.latch_finish("a1"));
        assert!(!t.latch_finish("a1"));

        // Duplicate complete report does not re-arm the latch
        t.on_status("a1", &payload(Some(ResearchPhase::Complete), ""), now);
        assert!(!t.latch_finish("a1"));

        let finished: Vec<_> = t
            .progress("a1")
            .unwrap()
            .updates
            .iter()
            .filter(|u| u.title == "Finished")
            .collect();
        assert_eq!(finished.len(), 1);
    }

    #[test]
    fn test_latch_requires_complete() {
        let mut t = tracker();
        t.on_status(
            "a1",
            &payload(Some(ResearchPhase::Searching), ""),
            Utc::now(),
        );
        assert!(!t.latch_finish("a1"));
        assert!(!t.latch_finish("missing"));
    }
}
