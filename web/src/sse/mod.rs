//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the SSE endpoint.
//! The engine itself (Registry, Connection, encoder, keepalive) lives in
//! the `sse` crate.

pub mod handler;
