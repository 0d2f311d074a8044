//! The event value type and the ids reserved by the relay protocol itself.

/// Event id of the greeting sent to every newly admitted connection.
pub const HELLO_ID: &str = "HELLO";

/// Event id of error notifications sent by the engine (e.g. when a
/// connection is superseded or a zombie reconnect is refused).
pub const ERROR_ID: &str = "ERROR";

/// Event id of the close instruction. A client replaying this id as its
/// `Last-Event-ID` on reconnect identifies itself as a zombie.
pub const CLOSE_ID: &str = "CLOSE";

/// One application-visible SSE event: optional id, optional type, and the
/// payload as pre-split data lines.
///
/// The encoder emits one `data:` line per element of `data`, so embedded
/// line breaks must be split before construction; the constructors here do
/// that for callers that pass raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event_type: Option<String>,
    pub data: Vec<String>,
}

impl SseEvent {
    /// An event with no id and the default type, from raw (possibly
    /// multi-line) text.
    pub fn message(text: &str) -> Self {
        Self {
            id: None,
            event_type: None,
            data: split_lines(text),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// An event whose payload is a JSON-serialized value on a single data
    /// line, the shape most frontends consume.
    pub fn json<T: serde::Serialize>(payload: &T) -> serde_json::Result<Self> {
        let data = serde_json::to_string(payload)?;
        Ok(Self {
            id: None,
            event_type: None,
            data: vec![data],
        })
    }

    /// The greeting event sent on admission.
    pub fn hello(text: &str) -> Self {
        Self::message(text).with_id(HELLO_ID)
    }

    /// An engine error notification.
    pub fn error(text: &str) -> Self {
        Self::message(text).with_id(ERROR_ID)
    }

    /// The close instruction telling a client to disconnect and stop
    /// reconnecting.
    pub fn close(text: &str) -> Self {
        Self::message(text).with_id(CLOSE_ID)
    }
}

/// Splits raw text into SSE data lines, treating `\r\n` and `\n` alike.
/// Empty input still produces a single empty data line so the frame carries
/// a `data:` field.
fn split_lines(text: &str) -> Vec<String> {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    if lines.is_empty() {
        vec![String::new()]
    } else {
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_splits_embedded_line_breaks() {
        let event = SseEvent::message("line one\nline two\r\nline three");
        assert_eq!(event.data, vec!["line one", "line two", "line three"]);
        assert_eq!(event.id, None);
        assert_eq!(event.event_type, None);
    }

    #[test]
    fn test_empty_message_yields_a_single_empty_data_line() {
        let event = SseEvent::message("");
        assert_eq!(event.data, vec![""]);
    }

    #[test]
    fn test_reserved_constructors_set_reserved_ids() {
        assert_eq!(SseEvent::hello("hi").id.as_deref(), Some(HELLO_ID));
        assert_eq!(SseEvent::error("bad").id.as_deref(), Some(ERROR_ID));
        assert_eq!(SseEvent::close("bye").id.as_deref(), Some(CLOSE_ID));
    }

    #[test]
    fn test_json_payload_lands_on_a_single_data_line() {
        #[derive(serde::Serialize)]
        struct Payload {
            kind: &'static str,
            count: u32,
        }
        let event = SseEvent::json(&Payload {
            kind: "update",
            count: 3,
        })
        .unwrap()
        .with_type("update");
        assert_eq!(event.data, vec![r#"{"kind":"update","count":3}"#]);
    }

    #[test]
    fn test_builder_sets_id_and_type() {
        let event = SseEvent::message("payload").with_id("42").with_type("update");
        assert_eq!(event.id.as_deref(), Some("42"));
        assert_eq!(event.event_type.as_deref(), Some("update"));
    }
}
