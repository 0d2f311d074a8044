//! Server-Sent Events (SSE) relay engine.
//!
//! This crate keeps many long-lived, one-way HTTP response streams open at
//! once, formats outbound messages into the SSE wire format, and fans events
//! out to some or all attached streams while tolerating per-connection
//! failures.
//!
//! # Architecture
//!
//! - **Single connection per user**: a user id may have at most one live
//!   connection; admitting a new connection for a user supersedes the
//!   previous one (it receives an error event, a close event, and is
//!   force-closed after a grace period).
//! - **Dual-index registry**: O(1) lookups for both connection management
//!   and user-scoped routing via separate DashMap indices.
//! - **Partial-failure isolation**: a broadcast delivers to every connection
//!   it can; one failing transport never aborts delivery to the rest.
//! - **Ephemeral delivery**: frames are best-effort to currently-attached
//!   streams only. A client whose send fails simply misses that frame; the
//!   next event or keepalive tick is the only retry mechanism.
//! - **Engine-owned wire format**: the encoder produces the exact SSE byte
//!   sequences; the HTTP layer streams them verbatim.
//!
//! # Connection Flow
//!
//! 1. The host accepts a request and builds a [`connection::Connection`]
//!    around a writable frame sink and a cancellation token
//! 2. [`registry::Registry::admit`] runs the dedup/reconnection protocol
//!    and sends the HELLO event
//! 3. Application code sends frames via the registry (broadcast or unicast);
//!    the keepalive loop broadcasts comment frames on a timer
//! 4. When the request ends (client gone, or the engine cancelled it), the
//!    host calls [`registry::Registry::remove`]
//!
//! # Zombie reconnects
//!
//! A client that was told to close but keeps reconnecting announces itself
//! with `Last-Event-ID: CLOSE`. Admission refuses such a connection without
//! registering it: it gets a very large retry interval, an error event, a
//! close event, and is force-closed after the grace period. This prevents a
//! zombie from evicting the legitimate holder of its user slot.
//!
//! # Modules
//!
//! - `encoder`: pure SSE wire-format encoding
//! - `event`: the event value type and reserved protocol ids
//! - `connection`: one attached stream, its state, and its frame sink
//! - `registry`: dual-index registry, admission protocol, broadcast engine
//! - `keepalive`: background comment-frame loop
//! - `manager`: app-facing facade owning the registry and keepalive loop
//! - `error`: engine error types

pub mod connection;
pub mod encoder;
pub mod error;
pub mod event;
pub mod keepalive;
pub mod manager;
pub mod registry;

pub use manager::{EngineSettings, Manager};
