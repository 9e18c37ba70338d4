use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::Method, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use confab_shared::constants::APP_NAME;

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::router::EventRouter;
use crate::transport::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub router: EventRouter,
    pub limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
    typing_timeout_secs: u64,
    max_connections: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: state.router.registry().connection_count().await,
        typing_timeout_secs: state.router.typing().timeout().as_secs(),
        max_connections: state.config.max_connections,
    })
}

/// Serve `app` on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Starting HTTP API server");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use confab_store::{ChatStore, Database};
    use tower::ServiceExt;

    use super::*;
    use crate::identity::StoreIdentity;
    use crate::registry::ConnectionRegistry;
    use crate::typing::TypingTracker;

    fn state() -> AppState {
        let store = ChatStore::new(Database::open_in_memory().unwrap(), Duration::from_secs(5));
        let config = ServerConfig {
            instance_name: "Test Node".into(),
            ..ServerConfig::default()
        };
        AppState {
            router: EventRouter::new(
                store.clone(),
                ConnectionRegistry::new(),
                TypingTracker::new(config.typing_timeout),
                Arc::new(StoreIdentity::new(store)),
            ),
            limiter: RateLimiter::default(),
            config: Arc::new(config),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_json(build_router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "Confab");
    }

    #[tokio::test]
    async fn info_reports_instance_and_connections() {
        let state = state();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        state.router.connect(tx).await;

        let (status, body) = get_json(build_router(state), "/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Test Node");
        assert_eq!(body["connections"], 1);
        assert_eq!(body["typing_timeout_secs"], 6);
    }

    #[tokio::test]
    async fn ws_requires_an_upgrade() {
        let response = build_router(state())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
