//! Conversation tree and active path navigation
//!
//! Messages form a forest per chat: parent links always point to an earlier
//! message, requests and responses alternate, and editing or regenerating
//! creates sibling subtrees rather than replacing anything. These functions
//! compute the single linear "active path" a UI renders and move it between
//! sibling branches.
//!
//! All functions are pure over the message map. They tolerate malformed
//! graphs (dangling parents, accidental cycles) by tracking visited ids, so
//! a bad payload can degrade the path but never hang the client.

use std::collections::{HashMap, HashSet};

use crate::types::Message;

/// Direction for sibling navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

/// Message ids in `chat_id` whose parent is absent or outside the chat
fn root_ids<'a>(
    messages: &'a HashMap<String, Message>,
    chat_id: &str,
) -> Vec<&'a Message> {
    let mut roots: Vec<&Message> = messages
        .values()
        .filter(|m| m.chat_id == chat_id)
        .filter(|m| match &m.parent_id {
            None => true,
            Some(pid) => !messages
                .get(pid)
                .map(|p| p.chat_id == chat_id)
                .unwrap_or(false),
        })
        .collect();
    roots.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    roots
}

/// Children of `parent_id` within the same chat, ordered by creation time
pub fn children_of<'a>(
    messages: &'a HashMap<String, Message>,
    parent_id: &str,
) -> Vec<&'a Message> {
    let mut children: Vec<&Message> = messages
        .values()
        .filter(|m| m.parent_id.as_deref() == Some(parent_id))
        .collect();
    children.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    children
}

/// Messages sharing `message_id`'s parent (itself included), ordered by
/// creation time. Root messages are siblings of the other roots in the chat.
pub fn siblings_of<'a>(
    messages: &'a HashMap<String, Message>,
    message_id: &str,
) -> Vec<&'a Message> {
    let message = match messages.get(message_id) {
        Some(m) => m,
        None => return Vec::new(),
    };

    match &message.parent_id {
        Some(pid) if messages.contains_key(pid) => children_of(messages, pid),
        _ => root_ids(messages, &message.chat_id),
    }
}

/// Linear descent from `start`: at each node follow the earliest child, so
/// the result is a single parent-linked chain (the path invariant requires
/// consecutive parent links; where a subtree branches, the other children
/// stay reachable via sibling navigation).
///
/// Each id is visited at most once even if the underlying graph is
/// malformed, so the result is always finite and duplicate-free.
fn descend(
    messages: &HashMap<String, Message>,
    start: &str,
    visited: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    if !visited.insert(start.to_string()) {
        tracing::warn!(message_id = %start, "cycle in message graph, truncating traversal");
        return;
    }
    out.push(start.to_string());
    if let Some(child) = children_of(messages, start).first() {
        descend(messages, &child.message_id, visited, out);
    }
}

/// Default active path for a chat: earliest root, then the earliest child at
/// each step. This is the "main line" of the conversation on cold load.
pub fn default_path(messages: &HashMap<String, Message>, chat_id: &str) -> Vec<String> {
    let roots = root_ids(messages, chat_id);
    let first = match roots.first() {
        Some(root) => root.message_id.clone(),
        None => return Vec::new(),
    };

    let mut path = Vec::new();
    let mut visited = HashSet::new();
    descend(messages, &first, &mut visited, &mut path);
    path
}

/// Chain of ids from a chat root down to `message_id` (inclusive).
///
/// Used to rebuild the path prefix when a generation branches off an
/// arbitrary parent.
pub fn path_to(messages: &HashMap<String, Message>, message_id: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(message_id.to_string());

    while let Some(id) = current {
        if !visited.insert(id.clone()) {
            tracing::warn!(message_id = %id, "cycle in parent chain, truncating");
            break;
        }
        let message = match messages.get(&id) {
            Some(m) => m,
            None => break,
        };
        chain.push(id);
        current = message.parent_id.clone();
    }

    chain.reverse();
    chain
}

/// Validate the active-path invariant: consecutive parent links, no
/// duplicate ids, every id present.
pub fn validate_path(messages: &HashMap<String, Message>, path: &[String]) -> bool {
    let mut seen = HashSet::new();
    for id in path {
        if !seen.insert(id) || !messages.contains_key(id) {
            return false;
        }
    }
    path.windows(2).all(|pair| {
        messages
            .get(&pair[1])
            .map(|m| m.parent_id.as_deref() == Some(pair[0].as_str()))
            .unwrap_or(false)
    })
}

/// Move the path to the previous/next sibling of `message_id`.
///
/// The path suffix from `message_id` onward is replaced with the chosen
/// sibling plus its descendant chain. Returns `None` when the message is not
/// on the path or has no sibling in that direction.
pub fn navigate(
    messages: &HashMap<String, Message>,
    path: &[String],
    message_id: &str,
    direction: Direction,
) -> Option<Vec<String>> {
    let position = path.iter().position(|id| id == message_id)?;

    let siblings = siblings_of(messages, message_id);
    let index = siblings
        .iter()
        .position(|m| m.message_id == message_id)?;

    let target = match direction {
        Direction::Previous => index.checked_sub(1)?,
        Direction::Next => {
            if index + 1 < siblings.len() {
                index + 1
            } else {
                return None;
            }
        }
    };
    let sibling_id = siblings[target].message_id.clone();

    let mut next_path: Vec<String> = path[..position].to_vec();
    let mut visited: HashSet<String> = next_path.iter().cloned().collect();
    descend(messages, &sibling_id, &mut visited, &mut next_path);
    Some(next_path)
}

/// Position of `message_id` among its siblings, as (index, count).
///
/// Handy for "2 / 3" branch indicators.
pub fn sibling_position(
    messages: &HashMap<String, Message>,
    message_id: &str,
) -> Option<(usize, usize)> {
    let siblings = siblings_of(messages, message_id);
    let index = siblings
        .iter()
        .position(|m| m.message_id == message_id)?;
    Some((index, siblings.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, MessageKind, MessageStatus};
    use chrono::{Duration, Utc};

    fn message(id: &str, chat: &str, parent: Option<&str>, offset_secs: i64) -> Message {
        Message {
            message_id: id.to_string(),
            chat_id: chat.to_string(),
            parent_id: parent.map(String::from),
            kind: if id.starts_with('q') {
                MessageKind::Request
            } else {
                MessageKind::Response
            },
            parts: Vec::new(),
            status: MessageStatus::Complete,
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            event_data: Default::default(),
        }
    }

    /// q1 -> a1 -> {q2 -> a2, q3 -> a3}  (q3 created after q2)
    fn branched_chat() -> HashMap<String, Message> {
        let mut m = HashMap::new();
        for msg in [
            message("q1", "c1", None, 0),
            message("a1", "c1", Some("q1"), 1),
            message("q2", "c1", Some("a1"), 2),
            message("a2", "c1", Some("q2"), 3),
            message("q3", "c1", Some("a1"), 4),
            message("a3", "c1", Some("q3"), 5),
        ] {
            m.insert(msg.message_id.clone(), msg);
        }
        m
    }

    #[test]
    fn test_default_path_walks_main_line() {
        let messages = branched_chat();
        let path = default_path(&messages, "c1");
        // The earlier branch (q2) wins at the fork; q3's branch stays
        // reachable through sibling navigation.
        assert_eq!(path, vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(default_path(&messages, "missing"), Vec::<String>::new());
    }

    #[test]
    fn test_siblings_ordered_by_timestamp() {
        let messages = branched_chat();
        let siblings = siblings_of(&messages, "q2");
        let ids: Vec<_> = siblings.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["q2", "q3"]);
    }

    #[test]
    fn test_navigate_next_replaces_suffix() {
        let messages = branched_chat();
        let path = vec![
            "q1".to_string(),
            "a1".to_string(),
            "q2".to_string(),
            "a2".to_string(),
        ];

        let next = navigate(&messages, &path, "q2", Direction::Next).unwrap();
        assert_eq!(next, vec!["q1", "a1", "q3", "a3"]);
        assert!(validate_path(&messages, &next));

        // And back
        let prev = navigate(&messages, &next, "q3", Direction::Previous).unwrap();
        assert_eq!(prev, vec!["q1", "a1", "q2", "a2"]);
    }

    #[test]
    fn test_navigate_at_edge_returns_none() {
        let messages = branched_chat();
        let path = vec!["q1".to_string(), "a1".to_string(), "q2".to_string()];
        assert!(navigate(&messages, &path, "q2", Direction::Previous).is_none());
        assert!(navigate(&messages, &path, "missing", Direction::Next).is_none());
    }

    #[test]
    fn test_path_to_builds_root_chain() {
        let messages = branched_chat();
        assert_eq!(path_to(&messages, "a3"), vec!["q1", "a1", "q3", "a3"]);
        assert_eq!(path_to(&messages, "q1"), vec!["q1"]);
    }

    #[test]
    fn test_validate_path_rejects_broken_links_and_duplicates() {
        let messages = branched_chat();
        assert!(validate_path(
            &messages,
            &["q1".to_string(), "a1".to_string(), "q3".to_string()]
        ));
        // a2's parent is q2, not a1
        assert!(!validate_path(
            &messages,
            &["q1".to_string(), "a1".to_string(), "a2".to_string()]
        ));
        assert!(!validate_path(
            &messages,
            &["q1".to_string(), "q1".to_string()]
        ));
    }

    #[test]
    fn test_cycles_do_not_hang() {
        let mut messages = branched_chat();
        // Malformed payload: q1's parent points into its own subtree
        messages.get_mut("q1").unwrap().parent_id = Some("a2".to_string());

        let path = default_path(&messages, "c1");
        let unique: HashSet<_> = path.iter().collect();
        assert_eq!(unique.len(), path.len());
        assert!(path_to(&messages, "a2").len() <= messages.len());
    }

    #[test]
    fn test_sibling_position() {
        let messages = branched_chat();
        assert_eq!(sibling_position(&messages, "q2"), Some((0, 2)));
        assert_eq!(sibling_position(&messages, "q3"), Some((1, 2)));
        assert_eq!(sibling_position(&messages, "missing"), None);
    }
}
