use crate::extractors::client_identity::ClientIdentity;
use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use log::*;
use service::AppState;
// leading `::` disambiguates the engine crate from this crate's own `sse` module
use ::sse::connection::{ChannelSink, Connection, Identity};
use ::sse::registry::Registry;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Removes the connection from the registry when the response stream goes
/// away, whether the engine closed it or the client simply disconnected.
struct ConnectionGuard {
    registry: Arc<Registry>,
    connection: Arc<Connection>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let connection = self.connection.clone();
        tokio::spawn(async move {
            registry.remove(&connection).await;
        });
    }
}

/// SSE handler that establishes a long-lived connection for real-time
/// updates. At most one connection per user id; a new connection for the
/// same user supersedes the previous one.
pub(crate) async fn sse_handler(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
) -> Response {
    debug!(
        "Establishing SSE connection (user: {:?}, last_event_id: {:?})",
        identity.user_id, identity.last_event_id
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();

    let principal = identity.display_name.map(|display_name| Identity {
        display_name: Some(display_name),
        claims: Vec::new(),
    });
    let connection = Arc::new(Connection::new(
        identity.user_id,
        principal,
        identity.last_event_id,
        Box::new(ChannelSink::new(tx)),
        cancel.clone(),
    ));

    let registry = app_state.sse_manager.registry();
    if let Err(e) = registry.admit(connection.clone(), &cancel).await {
        warn!("SSE admission failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, "admission refused").into_response();
    }

    let guard = ConnectionGuard {
        registry,
        connection,
    };

    // Frames arrive from the engine through the channel; the stream ends
    // when the engine cancels the connection or the sender side is gone.
    // The guard cleans up the registry in either case, including an abrupt
    // client disconnect that drops the whole stream.
    let body_stream = stream! {
        let _guard = guard;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // deliver anything the engine queued before cancelling,
                    // e.g. the refusal frames composed for a zombie reconnect
                    while let Ok(frame) = rx.try_recv() {
                        yield Ok::<String, Infallible>(frame);
                    }
                    break;
                }
                frame = rx.recv() => match frame {
                    Some(frame) => yield Ok::<String, Infallible>(frame),
                    None => break,
                },
            }
        }
        debug!("SSE response stream finished");
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body_stream),
    )
        .into_response()
}
