//! Dual-index connection registry and broadcast engine.
//!
//! This is the heart of the relay: it indexes connections by connection id
//! and by user id, runs the admission/dedup protocol, and performs
//! broadcast/unicast sends with partial-failure isolation.
//!
//! # Invariants
//!
//! - `by_id` and `by_user` never contain two distinct connections under the
//!   same key.
//! - A `by_user` entry always refers to the currently admitted connection
//!   for that user; superseded connections are evicted from `by_user`
//!   before their replacement is told anything.
//! - A connection is reachable from `by_id` from admission until removal,
//!   and from `by_user` only while it holds its user slot.
//! - Liveness is monotonic: once removed, a connection never becomes
//!   connected again.

use crate::connection::{Connection, ConnectionId, UserId};
use crate::encoder;
use crate::error::{Error, Result};
use crate::event::{SseEvent, CLOSE_ID};
use dashmap::DashMap;
use events::{ConnectionEvent, EventPublisher};
use futures::future;
use log::{debug, info, warn, Level};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a superseded (or refused) connection is given to disconnect
/// itself after receiving the close event, before it is force-closed.
pub const DEFAULT_DISCONNECTION_GRACE_MS: u64 = 5000;

/// Retry interval sent to refused zombie reconnects: 24 hours, which
/// effectively disables the client's auto-reconnect.
pub const ZOMBIE_RETRY_MS: u64 = 24 * 60 * 60 * 1000;

/// Process-wide connection registry with dual indices for O(1) lookups.
/// Explicitly constructed and owned by the host; there is no ambient
/// singleton.
pub struct Registry {
    /// Primary storage: lookup by connection id for admission/cleanup.
    by_id: DashMap<ConnectionId, Arc<Connection>>,

    /// Secondary index: lookup by user id for unicast routing. At most one
    /// live connection per user.
    by_user: DashMap<UserId, Arc<Connection>>,

    /// Serializes admissions per user. The grace-period wait inside
    /// `supersede` would otherwise let a competing admit for the same user
    /// observe an empty slot and register a second live connection.
    /// Entries live for the registry's lifetime.
    admission_locks: DashMap<UserId, Arc<tokio::sync::Mutex<()>>>,

    /// Last reconnect interval broadcast; replayed to newly admitted
    /// connections. Existing connections only see future changes.
    reconnect_interval_ms: RwLock<Option<u64>>,

    disconnection_grace: Duration,
    publisher: EventPublisher,
}

impl Registry {
    pub fn new(
        disconnection_grace: Duration,
        initial_reconnect_interval_ms: Option<u64>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            by_id: DashMap::new(),
            by_user: DashMap::new(),
            admission_locks: DashMap::new(),
            reconnect_interval_ms: RwLock::new(initial_reconnect_interval_ms),
            disconnection_grace,
            publisher,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Looks up a connection by id, if it is still registered.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.by_id
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Looks up the current connection for a user, if any.
    pub fn get_by_user(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.by_user.get(user_id).map(|entry| entry.value().clone())
    }

    /// Admits a connection: runs the dedup/reconnection protocol, registers
    /// the connection in the indices, and greets the client.
    ///
    /// Fails only if `cancel` was already triggered before any work started.
    /// Per-connection send failures during admission are absorbed.
    pub async fn admit(&self, connection: Arc<Connection>, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        connection.mark_admitted();

        // A client replaying the close instruction as its last-seen event id
        // was already told to disconnect; refusing it here keeps it from
        // evicting the legitimate holder of its user slot.
        if connection.last_event_id().as_deref() == Some(CLOSE_ID) {
            self.refuse_zombie(&connection).await;
            return Ok(());
        }

        // One admission at a time per user: without this, a second admit
        // arriving during the grace-period wait below would see an empty
        // user slot and register a second live connection.
        let _admission_guard = match connection.user_id() {
            Some(user_id) => {
                let lock = self
                    .admission_locks
                    .entry(user_id.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                    .clone();
                Some(lock.lock_owned().await)
            }
            None => None,
        };

        let mut superseded: Option<Arc<Connection>> = None;
        if let Some(user_id) = connection.user_id() {
            // Free the slot before telling the old connection anything, so
            // there is no window where two connections are addressable under
            // the same user id.
            if let Some((_, previous)) = self.by_user.remove(user_id) {
                if previous.id() != connection.id() {
                    superseded = Some(previous);
                }
            }
        }
        if let Some(previous) = &superseded {
            self.supersede(previous).await;
        }

        self.by_id
            .insert(connection.id().clone(), connection.clone());
        if let Some(user_id) = connection.user_id() {
            self.by_user.insert(user_id.clone(), connection.clone());
        }
        info!(
            "Admitted SSE connection {} ({} total)",
            connection.id(),
            self.by_id.len()
        );

        let remembered = self.current_reconnect_interval();
        if let Some(interval_ms) = remembered {
            // best-effort; the sink already logs transport failures
            let _ = connection.change_reconnect_interval(interval_ms).await;
        }

        let _ = connection.send_hello(&greeting_for(&connection)).await;

        let event = match (&superseded, connection.user_id()) {
            (Some(previous), Some(user_id)) => ConnectionEvent::Reconnected {
                connection_id: connection.id().to_string(),
                user_id: user_id.clone(),
                superseded_connection_id: previous.id().to_string(),
            },
            _ => ConnectionEvent::Connected {
                connection_id: connection.id().to_string(),
                user_id: connection.user_id().cloned(),
            },
        };
        self.publisher.publish(event).await;

        Ok(())
    }

    /// Refusal path for a client that reconnected despite having received
    /// the close instruction. The connection is never registered and no
    /// lifecycle event is published; observable via logs and the frames the
    /// client receives.
    async fn refuse_zombie(&self, connection: &Connection) {
        warn!(
            "Refusing zombie reconnect on connection {} (Last-Event-ID: {})",
            connection.id(),
            CLOSE_ID
        );

        let _ = connection.change_reconnect_interval(ZOMBIE_RETRY_MS).await;
        let _ = connection
            .send_error("This connection was previously closed by the server and cannot be re-established.")
            .await;
        let _ = connection
            .send_close("Please disconnect and stop reconnecting.")
            .await;

        tokio::time::sleep(self.disconnection_grace).await;
        if let Err(e) = connection.close() {
            warn!(
                "Failed to force-close refused connection {}: {e}",
                connection.id()
            );
        }
    }

    /// Tells a superseded connection to go away and force-closes it after
    /// the grace period, whether or not the sends got through.
    async fn supersede(&self, previous: &Connection) {
        info!(
            "Superseding connection {} for user {:?}",
            previous.id(),
            previous.user_id()
        );

        let _ = previous
            .send_error("This connection has been superseded by a newer connection for the same user.")
            .await;
        let _ = previous
            .send_close("Please disconnect; a newer connection has taken over.")
            .await;

        // Grace period for the old client to self-disconnect upon receiving
        // the close event. Fixed delay: we do not wait for acknowledgment.
        tokio::time::sleep(self.disconnection_grace).await;
        if let Err(e) = previous.close() {
            warn!(
                "Failed to force-close superseded connection {}: {e}",
                previous.id()
            );
        }
    }

    /// Removes a connection from both indices and flips its liveness off.
    /// The user slot is cleared only when this connection still holds it
    /// (matched by connection id, so a newer holder is left alone).
    pub async fn remove(&self, connection: &Connection) {
        if let Some(user_id) = connection.user_id() {
            self.by_user
                .remove_if(user_id, |_, current| current.id() == connection.id());
        }
        connection.mark_disconnected();
        let was_registered = self.by_id.remove(connection.id()).is_some();
        if was_registered {
            info!(
                "Removed SSE connection {} ({} remaining)",
                connection.id(),
                self.by_id.len()
            );
            self.publisher
                .publish(ConnectionEvent::Disconnected {
                    connection_id: connection.id().to_string(),
                    user_id: connection.user_id().cloned(),
                })
                .await;
        }
    }

    /// Sends one already-encoded frame to every connected connection,
    /// concurrently, isolating per-connection failures.
    ///
    /// Returns the number of connections a send was ATTEMPTED to, not the
    /// number that succeeded; per-connection outcomes are observable only
    /// via logs. Cancellation observed mid-dispatch stops dispatching
    /// further sends but lets in-flight ones finish.
    pub async fn broadcast_frame(&self, frame: &str, cancel: &CancellationToken) -> Result<usize> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }

        let snapshot: Vec<Arc<Connection>> = self
            .by_id
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|connection| connection.is_connected())
            .collect();

        let mut attempts = Vec::with_capacity(snapshot.len());
        for connection in snapshot {
            if cancel.is_cancelled() {
                debug!("Broadcast cancelled; skipping remaining connections");
                break;
            }
            let frame = frame.to_string();
            attempts.push(async move {
                match connection.send_frame(&frame, Level::Debug).await {
                    Ok(true) => {}
                    Ok(false) => debug!(
                        "Broadcast frame not delivered to connection {}",
                        connection.id()
                    ),
                    Err(e) => debug!(
                        "Broadcast lost a race with removal of connection {}: {e}",
                        connection.id()
                    ),
                }
            });
        }

        let attempted = attempts.len();
        future::join_all(attempts).await;
        Ok(attempted)
    }

    /// Encodes an event once and broadcasts it to all connected connections.
    pub async fn broadcast_event(
        &self,
        event: &SseEvent,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.broadcast_frame(&encoder::encode_event(event), cancel)
            .await
    }

    /// Sends an event to one connection by id. Returns false when the target
    /// is absent, no longer connected, or its transport failed.
    pub async fn send_to_connection(&self, connection_id: &ConnectionId, event: &SseEvent) -> bool {
        let target = match self.get(connection_id) {
            Some(connection) => connection,
            None => return false,
        };
        self.deliver(&target, event).await
    }

    /// Sends an event to the current connection of a user, if any.
    pub async fn send_to_user(&self, user_id: &str, event: &SseEvent) -> bool {
        let target = match self.get_by_user(user_id) {
            Some(connection) => connection,
            None => return false,
        };
        self.deliver(&target, event).await
    }

    async fn deliver(&self, target: &Connection, event: &SseEvent) -> bool {
        if !target.is_connected() {
            return false;
        }
        match target.send_event(event).await {
            Ok(delivered) => delivered,
            Err(e) => {
                // target was removed between lookup and send
                debug!("Unicast to connection {} failed: {e}", target.id());
                false
            }
        }
    }

    /// Remembers a new reconnect interval and broadcasts the retry directive
    /// to all connected connections. Only future admissions and this
    /// broadcast carry the value; delivery is not retroactively guaranteed.
    pub async fn change_reconnect_interval(
        &self,
        interval_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        *self
            .reconnect_interval_ms
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(interval_ms);
        info!("Reconnect interval changed to {interval_ms}ms");
        self.broadcast_frame(&encoder::encode_retry(interval_ms), cancel)
            .await
    }

    /// The currently remembered reconnect interval, if any.
    pub fn current_reconnect_interval(&self) -> Option<u64> {
        *self
            .reconnect_interval_ms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Maintenance sweep: force-closes connections that received the close
    /// instruction but never disconnected themselves.
    pub fn disconnect_marked(&self) {
        for entry in self.by_id.iter() {
            let connection = entry.value();
            if connection.is_marked_for_disconnection() && connection.is_connected() {
                match connection.close() {
                    Ok(_) => info!(
                        "Force-closed connection {} still attached after close instruction",
                        connection.id()
                    ),
                    Err(e) => warn!(
                        "Failed to force-close marked connection {}: {e}",
                        connection.id()
                    ),
                }
            }
        }
    }
}

/// Greeting text for the HELLO event, referencing the caller's identity
/// when one was supplied.
fn greeting_for(connection: &Connection) -> String {
    match connection
        .identity()
        .and_then(|identity| identity.display_name.as_deref())
    {
        Some(name) => format!("Welcome, {name}. You are now connected to the event stream."),
        None => "You are now connected to the event stream.".to_string(),
    }
}
