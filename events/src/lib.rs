//! Connection-lifecycle event infrastructure for the SSE relay.
//!
//! This crate provides the notification seam between the core engine and
//! the host application: the engine publishes an event after a connection
//! is admitted, reconnected, or removed, and the host registers handlers
//! that react to those transitions (metrics, presence tracking, logging).
//!
//! # Architecture
//!
//! - **ConnectionEvent**: Enum representing the lifecycle transitions of a
//!   single SSE connection
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on the other workspace crates, so the
//! engine and the host can both depend on it without cycles. Connection and
//! user identifiers are carried as plain strings.
//!
//! Handlers are side-effect-only: they cannot veto or alter a transition,
//! and they are expected to return promptly since the engine awaits them
//! inline at the point of publication.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Lifecycle transitions of a single SSE connection, published by the
/// engine after the transition has completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A connection was admitted and is now reachable through the registry.
    Connected {
        connection_id: String,
        user_id: Option<String>,
    },
    /// A connection was admitted for a user who already had a live
    /// connection; the previous connection has been superseded and told
    /// to disconnect.
    Reconnected {
        connection_id: String,
        user_id: String,
        superseded_connection_id: String,
    },
    /// A connection was removed from the registry and will receive no
    /// further frames.
    Disconnected {
        connection_id: String,
        user_id: Option<String>,
    },
}

impl ConnectionEvent {
    /// The connection the event is about.
    pub fn connection_id(&self) -> &str {
        match self {
            ConnectionEvent::Connected { connection_id, .. }
            | ConnectionEvent::Reconnected { connection_id, .. }
            | ConnectionEvent::Disconnected { connection_id, .. } => connection_id,
        }
    }
}

/// Trait for handling connection lifecycle events.
/// Implementations can perform side effects like updating presence state,
/// emitting metrics, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ConnectionEvent);
}

/// Publishes connection events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers, sequentially, in
    /// registration order.
    pub async fn publish(&self, event: ConnectionEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHandler {
        label: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &ConnectionEvent) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.connection_id()));
        }
    }

    #[tokio::test]
    async fn test_publish_calls_handlers_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let publisher = EventPublisher::new()
            .with_handler(Arc::new(RecordingHandler {
                label: "first",
                seen: seen.clone(),
            }))
            .with_handler(Arc::new(RecordingHandler {
                label: "second",
                seen: seen.clone(),
            }));

        publisher
            .publish(ConnectionEvent::Connected {
                connection_id: "c1".to_string(),
                user_id: None,
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec!["first:c1", "second:c1"]);
    }

    #[tokio::test]
    async fn test_publish_with_no_handlers_is_a_noop() {
        let publisher = EventPublisher::new();
        publisher
            .publish(ConnectionEvent::Disconnected {
                connection_id: "c1".to_string(),
                user_id: Some("u1".to_string()),
            })
            .await;
    }

    #[test]
    fn test_connection_id_accessor_covers_all_variants() {
        let connected = ConnectionEvent::Connected {
            connection_id: "a".to_string(),
            user_id: None,
        };
        let reconnected = ConnectionEvent::Reconnected {
            connection_id: "b".to_string(),
            user_id: "u".to_string(),
            superseded_connection_id: "a".to_string(),
        };
        let disconnected = ConnectionEvent::Disconnected {
            connection_id: "c".to_string(),
            user_id: Some("u".to_string()),
        };

        assert_eq!(connected.connection_id(), "a");
        assert_eq!(reconnected.connection_id(), "b");
        assert_eq!(disconnected.connection_id(), "c");
    }
}
