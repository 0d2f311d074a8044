use crate::controller::health_check_controller;
use crate::sse::handler::sse_handler;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use log::*;
use service::AppState;
use tower_http::cors::CorsLayer;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(events_routes(app_state.clone()))
        .merge(health_routes())
        .layer(cors_layer(&app_state))
}

fn events_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/events", get(sse_handler))
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn cors_layer(app_state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = app_state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new().allow_origin(origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use events::EventPublisher;
    use http_body_util::BodyExt;
    use service::config::Config;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        use clap::Parser;
        let config = Config::try_parse_from(["sse-relay"]).unwrap();
        AppState::new(config, EventPublisher::new())
    }

    #[tokio::test]
    async fn test_health_endpoint_responds_ok() {
        let router = define_routes(test_state());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"healthy");
    }

    #[tokio::test]
    async fn test_events_endpoint_streams_the_greeting() {
        let state = test_state();
        let router = define_routes(state.clone());
        let response = router
            .oneshot(
                Request::get("/events")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        // the HELLO greeting is buffered in the channel at admission time
        let mut body = response.into_body().into_data_stream();
        let first = futures::StreamExt::next(&mut body).await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.starts_with("id: HELLO\n"));
        assert_eq!(state.sse_manager.registry().connection_count(), 1);
    }

    #[tokio::test]
    async fn test_zombie_reconnect_receives_refusal_frames_before_stream_ends() {
        use clap::Parser;
        let config =
            Config::try_parse_from(["sse-relay", "--disconnection-grace-ms", "1"]).unwrap();
        let state = AppState::new(config, EventPublisher::new());
        let router = define_routes(state.clone());

        let response = router
            .oneshot(
                Request::get("/events")
                    .header("x-user-id", "u1")
                    .header("last-event-id", "CLOSE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // admission cancelled the connection, so the body stream terminates;
        // the refusal frames must still come through before it does
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(&format!(
            "retry: {}\n\n",
            ::sse::registry::ZOMBIE_RETRY_MS
        )));
        assert!(text.contains("id: ERROR\n"));
        assert!(text.contains("id: CLOSE\n"));
        assert_eq!(state.sse_manager.registry().connection_count(), 0);
    }
}
