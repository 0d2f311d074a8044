//! One attached SSE stream: identity, liveness state, and the exclusive
//! right to write to the underlying transport.

use crate::encoder;
use crate::error::{Error, Result};
use crate::event::SseEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, log, Level};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

// Type alias for user IDs (the web layer converts whatever its auth scheme
// produces into a String)
pub type UserId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied principal data, used for greetings and diagnostics only.
/// The engine never makes authorization decisions from it.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub display_name: Option<String>,
    pub claims: Vec<(String, String)>,
}

/// Error returned by a sink whose underlying transport is gone.
#[derive(Debug, PartialEq, Eq)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("frame sink closed")
    }
}

impl std::error::Error for SinkClosed {}

/// A writable destination for encoded SSE frames. Exactly one connection
/// owns a given sink; the engine never writes to it from two frames at once.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_frame(&self, frame: &str) -> std::result::Result<(), SinkClosed>;
}

/// Production sink: an unbounded channel whose receiving side feeds the HTTP
/// response body. The channel closing (receiver dropped because the client
/// went away) is the transport-failure signal.
pub struct ChannelSink {
    sender: UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write_frame(&self, frame: &str) -> std::result::Result<(), SinkClosed> {
        self.sender.send(frame.to_string()).map_err(|_| SinkClosed)
    }
}

/// One attached stream. The registry indexes connections but does not own
/// them; the hosting layer owns the lifetime for the duration of the HTTP
/// request and observes `cancel_token()` to tear the request down.
pub struct Connection {
    id: ConnectionId,
    user_id: Option<UserId>,
    identity: Option<Identity>,
    connected_at: DateTime<Utc>,
    last_event_id: RwLock<Option<String>>,
    is_connected: AtomicBool,
    marked_for_disconnection: AtomicBool,
    admitted: AtomicBool,
    sink: Box<dyn FrameSink>,
    // Single-writer guard: all frames to this connection are strictly
    // ordered. Two interleaved frames on one stream would corrupt the
    // protocol for that client.
    write_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(
        user_id: Option<UserId>,
        identity: Option<Identity>,
        last_event_id: Option<String>,
        sink: Box<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            identity,
            connected_at: Utc::now(),
            last_event_id: RwLock::new(last_event_id),
            is_connected: AtomicBool::new(true),
            marked_for_disconnection: AtomicBool::new(false),
            admitted: AtomicBool::new(false),
            sink,
            write_lock: tokio::sync::Mutex::new(()),
            cancel,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// The last event id the remote side is known to have received.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    pub fn is_marked_for_disconnection(&self) -> bool {
        self.marked_for_disconnection.load(Ordering::Acquire)
    }

    /// The token the hosting layer observes to terminate the underlying
    /// request.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn mark_admitted(&self) {
        self.admitted.store(true, Ordering::Release);
    }

    /// Flips liveness off. Monotonic: there is no way back to connected.
    pub(crate) fn mark_disconnected(&self) {
        self.is_connected.store(false, Ordering::Release);
    }

    /// Writes one already-encoded frame to the sink.
    ///
    /// Returns `Err(NotConnected)` if the connection has been removed,
    /// `Ok(false)` without writing if the connection is marked for
    /// disconnection, and `Ok(false)` on a transport failure (logged at
    /// `failure_level`; keepalive traffic logs quietly, unicast loudly).
    pub async fn send_frame(&self, frame: &str, failure_level: Level) -> Result<bool> {
        if !self.is_connected() {
            return Err(Error::not_connected());
        }
        if self.is_marked_for_disconnection() {
            debug!(
                "Suppressing send to connection {} marked for disconnection",
                self.id
            );
            return Ok(false);
        }

        let _write_guard = self.write_lock.lock().await;
        match self.sink.write_frame(frame).await {
            Ok(()) => Ok(true),
            Err(SinkClosed) => {
                log!(
                    failure_level,
                    "Transport write failed for connection {}; client is likely gone",
                    self.id
                );
                Ok(false)
            }
        }
    }

    /// Encodes and sends an event; on success records the event's id (if
    /// any) as the last event id delivered to this client.
    pub async fn send_event(&self, event: &SseEvent) -> Result<bool> {
        let delivered = self
            .send_frame(&encoder::encode_event(event), Level::Warn)
            .await?;
        if delivered {
            if let Some(id) = &event.id {
                *self
                    .last_event_id
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id.clone());
            }
        }
        Ok(delivered)
    }

    /// Sends the greeting event.
    pub async fn send_hello(&self, message: &str) -> Result<bool> {
        self.send_event(&SseEvent::hello(message)).await
    }

    /// Sends an engine error notification.
    pub async fn send_error(&self, message: &str) -> Result<bool> {
        self.send_event(&SseEvent::error(message)).await
    }

    /// Sends the close instruction. Once it is delivered all further sends
    /// to this connection are suppressed.
    pub async fn send_close(&self, message: &str) -> Result<bool> {
        let delivered = self.send_event(&SseEvent::close(message)).await?;
        if delivered {
            self.marked_for_disconnection.store(true, Ordering::Release);
        }
        Ok(delivered)
    }

    /// Sends a retry directive adjusting the client's reconnect interval.
    /// Does not alter the marked-for-disconnection state.
    pub async fn change_reconnect_interval(&self, interval_ms: u64) -> Result<bool> {
        self.send_frame(&encoder::encode_retry(interval_ms), Level::Warn)
            .await
    }

    /// Triggers the cancellation signal. Idempotent: the signal fires on the
    /// first call only, subsequent calls still return `Ok(true)`. Closing a
    /// connection that was never admitted is a contract error.
    pub fn close(&self) -> Result<bool> {
        if !self.admitted.load(Ordering::Acquire) {
            return Err(Error::not_connected());
        }
        if self.cancel.is_cancelled() {
            debug!("Connection {} already closed", self.id);
            return Ok(true);
        }
        self.cancel.cancel();
        Ok(true)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .field("is_connected", &self.is_connected())
            .field(
                "marked_for_disconnection",
                &self.is_marked_for_disconnection(),
            )
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::{Arc, Mutex};

    fn recording_connection() -> (Connection, Arc<Mutex<Vec<String>>>) {
        let (sink, frames) = RecordingSink::new();
        let connection = Connection::new(
            Some("user-1".to_string()),
            None,
            None,
            Box::new(sink),
            CancellationToken::new(),
        );
        (connection, frames)
    }

    #[tokio::test]
    async fn test_send_frame_writes_to_sink() {
        let (connection, frames) = recording_connection();
        let delivered = connection
            .send_frame(":ping\n\n", Level::Debug)
            .await
            .unwrap();
        assert!(delivered);
        assert_eq!(*frames.lock().unwrap(), vec![":ping\n\n"]);
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_a_contract_error() {
        let (connection, _frames) = recording_connection();
        connection.mark_disconnected();
        let err = connection
            .send_frame("data: x\n\n", Level::Warn)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_transport_failure_is_absorbed_not_propagated() {
        let connection = Connection::new(
            None,
            None,
            None,
            Box::new(FailingSink),
            CancellationToken::new(),
        );
        let delivered = connection
            .send_frame("data: x\n\n", Level::Debug)
            .await
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_send_event_updates_last_event_id_on_success() {
        let (connection, _frames) = recording_connection();
        let event = SseEvent::message("payload").with_id("42");
        assert!(connection.send_event(&event).await.unwrap());
        assert_eq!(connection.last_event_id().as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_failed_send_does_not_update_last_event_id() {
        let connection = Connection::new(
            None,
            None,
            Some("7".to_string()),
            Box::new(FailingSink),
            CancellationToken::new(),
        );
        let event = SseEvent::message("payload").with_id("42");
        assert!(!connection.send_event(&event).await.unwrap());
        assert_eq!(connection.last_event_id().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_send_close_marks_and_suppresses_further_sends() {
        let (connection, frames) = recording_connection();
        assert!(connection.send_close("goodbye").await.unwrap());
        assert!(connection.is_marked_for_disconnection());

        let delivered = connection
            .send_frame("data: more\n\n", Level::Warn)
            .await
            .unwrap();
        assert!(!delivered);
        // only the close frame ever reached the sink
        assert_eq!(frames.lock().unwrap().len(), 1);
        assert!(frames.lock().unwrap()[0].starts_with("id: CLOSE\n"));
    }

    #[tokio::test]
    async fn test_failed_close_send_does_not_mark() {
        let connection = Connection::new(
            None,
            None,
            None,
            Box::new(FailingSink),
            CancellationToken::new(),
        );
        assert!(!connection.send_close("goodbye").await.unwrap());
        assert!(!connection.is_marked_for_disconnection());
    }

    #[tokio::test]
    async fn test_change_reconnect_interval_sends_retry_frame() {
        let (connection, frames) = recording_connection();
        assert!(connection.change_reconnect_interval(3000).await.unwrap());
        assert_eq!(*frames.lock().unwrap(), vec!["retry: 3000\n\n"]);
        assert!(!connection.is_marked_for_disconnection());
    }

    #[tokio::test]
    async fn test_close_before_admission_is_a_contract_error() {
        let (connection, _frames) = recording_connection();
        let err = connection.close().unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connection, _frames) = recording_connection();
        connection.mark_admitted();
        let token = connection.cancel_token();

        assert!(connection.close().unwrap());
        assert!(token.is_cancelled());
        // second call is a no-op that still reports success
        assert!(connection.close().unwrap());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closure_when_receiver_dropped() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let sink = ChannelSink::new(tx);
        drop(rx);
        assert_eq!(sink.write_frame("data: x\n\n").await, Err(SinkClosed));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
