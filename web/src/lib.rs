//! HTTP hosting layer for the SSE relay engine.
//!
//! This crate is thin glue: it accepts inbound requests, extracts the
//! caller's identity and last-seen event id, hands the engine a writable
//! frame sink tied to the response body, and releases everything when the
//! request ends. All protocol decisions live in the `sse` crate.

pub mod controller;
pub mod extractors;
pub mod router;
pub mod sse;

pub use router::define_routes;
pub use service::AppState;
