use async_trait::async_trait;
use events::{ConnectionEvent, EventHandler, EventPublisher};
use log::{error, info};
use service::config::Config;
use service::logging::Logger;
use service::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Logs connection lifecycle transitions; stands in for whatever presence
/// or metrics handlers a host application registers.
struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected {
                connection_id,
                user_id,
            } => info!("Client connected: {connection_id} (user: {user_id:?})"),
            ConnectionEvent::Reconnected {
                connection_id,
                user_id,
                superseded_connection_id,
            } => info!(
                "Client reconnected: {connection_id} (user: {user_id}, superseded: {superseded_connection_id})"
            ),
            ConnectionEvent::Disconnected {
                connection_id,
                user_id,
            } => info!("Client disconnected: {connection_id} (user: {user_id:?})"),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config);

    let publisher = EventPublisher::new().with_handler(Arc::new(LoggingEventHandler));
    let app_state = AppState::new(config.clone(), publisher);

    app_state.sse_manager.start_keepalive();

    let listen_address = format!("{}:{}", config.interface, config.port);
    info!("SSE relay listening on {listen_address}");

    let listener = match tokio::net::TcpListener::bind(&listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {listen_address}: {e}");
            std::process::exit(1);
        }
    };

    let router = web::define_routes(app_state.clone());
    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!("Server error: {e}");
    }

    let deadline = Duration::from_secs(config.shutdown_deadline_secs);
    if !app_state.sse_manager.stop_keepalive(deadline).await {
        error!("Keepalive loop did not stop within {deadline:?}");
    }
    info!("Shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
}
