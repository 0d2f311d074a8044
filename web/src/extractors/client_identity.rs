//! Header-based identity extraction.
//!
//! Authentication is an external collaborator's job; this extractor only
//! lifts whatever identity an upstream gateway attached to the request
//! (`x-user-id`, `x-display-name`) plus the standard `Last-Event-ID`
//! header into a typed value. Connections without a user id are admitted
//! anonymously and never participate in per-user dedup.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub last_event_id: Option<String>,
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIdentity {
            user_id: header_value(parts, "x-user-id"),
            display_name: header_value(parts, "x-display-name"),
            last_event_id: header_value(parts, "last-event-id"),
        })
    }
}
