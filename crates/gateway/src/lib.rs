//! HTTP admin gateway for threadsage.
//!
//! Exposes a health check and the v1 admin API (stats, ranking, store
//! check, thread clearing, on-demand maintenance).
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use threadsage_config::AppConfig;
use threadsage_engine::{MaintenanceSweeper, SessionEngine};

pub use api_v1::{ApiV1State, MaintenanceReport, SharedApiState, run_maintenance};

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - Bearer token authentication on all /v1 routes (when a token is set)
/// - CORS limited to the local admin origin
/// - Request body size limit (64 KB)
/// - HTTP trace logging
pub fn build_router(state: SharedApiState) -> Router {
    let v1 = api_v1::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_static(
            "http://localhost:8080",
        )))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(
    config: &AppConfig,
    engine: Arc<SessionEngine>,
    sweeper: MaintenanceSweeper,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if config.gateway.admin_token.is_none() {
        warn!("No gateway.admin_token set — /v1 admin routes are unauthenticated");
    }

    let state = Arc::new(ApiV1State {
        engine,
        sweeper,
        admin_token: config.gateway.admin_token.clone(),
    });
    let app = build_router(state);

    info!(addr = %addr, "Admin gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Authentication middleware for the /v1 API.
///
/// Requires `Authorization: Bearer <token>` matching `gateway.admin_token`.
/// With no token configured every request passes.
async fn auth_middleware(
    State(state): State<SharedApiState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if token == expected => Ok(next.run(req).await),
        _ => {
            warn!("Unauthorized request to /v1 API — missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use threadsage_channels::{DiscordAdapter, DiscordConfig};
    use threadsage_providers::{ProviderRouter, TokenBudget};
    use threadsage_store::InMemoryStore;

    fn test_state(admin_token: Option<&str>) -> SharedApiState {
        let config = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let router = ProviderRouter::new(TokenBudget::new(store.clone(), 10_000));
        let adapter = Arc::new(DiscordAdapter::new(DiscordConfig::default()));
        let engine = SessionEngine::new(&config, store.clone(), Arc::new(router), adapter);
        Arc::new(ApiV1State {
            engine: Arc::new(engine),
            sweeper: MaintenanceSweeper::new(store),
            admin_token: admin_token.map(String::from),
        })
    }

    fn check_request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/v1/check");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(Some("secret")));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn v1_requires_bearer_token_when_configured() {
        let state = test_state(Some("secret"));

        let response = build_router(state.clone())
            .oneshot(check_request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = build_router(state.clone())
            .oneshot(check_request(Some("Bearer wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = build_router(state)
            .oneshot(check_request(Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn v1_open_without_token() {
        let response = build_router(test_state(None))
            .oneshot(check_request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
