//! Pure SSE wire-format encoding.
//!
//! Every function here turns one logical message into the exact byte
//! sequence the protocol requires: optional `id:` and `event:` lines, one
//! `data:` line per payload line, and a blank line terminating the frame.
//! Comment frames (`:<text>`) are ignored by conforming clients and carry
//! the keepalives.
//!
//! No error cases: inputs are well-formed by construction (the
//! [`crate::event::SseEvent`] constructors split embedded line breaks).

use crate::event::SseEvent;

/// Encodes a full event frame.
///
/// Field order is fixed: `id:`, `event:`, `data:` lines, blank line.
pub fn encode_event(event: &SseEvent) -> String {
    let mut frame = String::new();
    if let Some(id) = &event.id {
        frame.push_str("id: ");
        frame.push_str(id);
        frame.push('\n');
    }
    if let Some(event_type) = &event.event_type {
        frame.push_str("event: ");
        frame.push_str(event_type);
        frame.push('\n');
    }
    for line in &event.data {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Encodes a reconnect-interval directive.
pub fn encode_retry(interval_ms: u64) -> String {
    format!("retry: {interval_ms}\n\n")
}

/// Encodes a comment-only frame, invisible to application-level listeners.
pub fn encode_comment(text: &str) -> String {
    format!(":{text}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_event_with_id_and_multiple_data_lines() {
        let event = SseEvent {
            id: Some("42".to_string()),
            event_type: None,
            data: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(encode_event(&event), "id: 42\ndata: a\ndata: b\n\n");
    }

    #[test]
    fn test_encode_event_with_type_emits_event_line() {
        let event = SseEvent {
            id: Some("7".to_string()),
            event_type: Some("update".to_string()),
            data: vec!["payload".to_string()],
        };
        assert_eq!(
            encode_event(&event),
            "id: 7\nevent: update\ndata: payload\n\n"
        );
    }

    #[test]
    fn test_encode_event_without_id_or_type_emits_only_data() {
        let event = SseEvent::message("hello");
        assert_eq!(encode_event(&event), "data: hello\n\n");
    }

    #[test]
    fn test_data_line_order_is_preserved() {
        let event = SseEvent::message("first\nsecond\nthird");
        assert_eq!(
            encode_event(&event),
            "data: first\ndata: second\ndata: third\n\n"
        );
    }

    #[test]
    fn test_encode_retry() {
        assert_eq!(encode_retry(3000), "retry: 3000\n\n");
    }

    #[test]
    fn test_encode_comment() {
        assert_eq!(encode_comment("KEEPALIVE"), ":KEEPALIVE\n\n");
    }

    #[test]
    fn test_encode_comment_with_empty_text() {
        assert_eq!(encode_comment(""), ":\n\n");
    }
}
