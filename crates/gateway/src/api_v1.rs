//! HTTP API v1 — admin surface over the session engine.
//!
//! Endpoints:
//!
//! - `GET  /v1/stats/{user_id}`        — Points and rank for one user
//! - `GET  /v1/ranking?limit=N`        — Monthly leaderboard
//! - `GET  /v1/check`                  — Store row counts and size
//! - `POST /v1/threads/{id}/clear`     — Delete a thread (owner or admin)
//! - `POST /v1/maintenance/{job}`      — Run a maintenance job now

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use threadsage_core::error::SessionError;
use threadsage_core::session::{RankEntry, StoreStats};
use threadsage_engine::{MaintenanceSweeper, SessionEngine, UserStats};
use threadsage_workflow::MaintenanceJob;

// ── State ─────────────────────────────────────────────────────────────────

/// Default and maximum leaderboard size.
const DEFAULT_RANKING_LIMIT: usize = 10;
const MAX_RANKING_LIMIT: usize = 100;

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub engine: Arc<SessionEngine>,
    pub sweeper: MaintenanceSweeper,
    /// Bearer token required on every route when set.
    pub admin_token: Option<String>,
}

pub type SharedApiState = Arc<ApiV1State>;

/// Build the v1 router (mounted under `/v1`).
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/stats/{user_id}", get(stats_handler))
        .route("/ranking", get(ranking_handler))
        .route("/check", get(check_handler))
        .route("/threads/{id}/clear", post(clear_thread_handler))
        .route("/maintenance/{job}", post(maintenance_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn session_error(e: SessionError) -> ApiError {
    let status = match &e {
        SessionError::Validation(_) => StatusCode::BAD_REQUEST,
        SessionError::Permission(_) => StatusCode::FORBIDDEN,
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Provider(_) | SessionError::Channel(_) => StatusCode::BAD_GATEWAY,
        SessionError::Persistence(_) => {
            error!(error = %e, "Store failure in admin API");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

// ── Stats ─────────────────────────────────────────────────────────────────

async fn stats_handler(
    State(state): State<SharedApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStats>, ApiError> {
    state
        .engine
        .get_stats(&user_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("User '{user_id}' not found")))
}

#[derive(Debug, Deserialize)]
struct RankingQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RankingResponse {
    pub entries: Vec<RankEntry>,
}

async fn ranking_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<RankingQuery>,
) -> Json<RankingResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RANKING_LIMIT)
        .clamp(1, MAX_RANKING_LIMIT);
    Json(RankingResponse {
        entries: state.engine.ranking(limit).await,
    })
}

async fn check_handler(
    State(state): State<SharedApiState>,
) -> Result<Json<StoreStats>, ApiError> {
    state.engine.check().await.map(Json).map_err(session_error)
}

// ── Threads ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClearThreadRequest {
    requestor_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

async fn clear_thread_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<ClearThreadRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    state
        .engine
        .clear_thread(&id, &payload.requestor_id)
        .await
        .map_err(session_error)?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("Thread '{id}' cleared"),
    }))
}

// ── Maintenance ───────────────────────────────────────────────────────────

/// What a maintenance run touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub job: MaintenanceJob,
    /// Threads deleted, users reset, or counters cleared.
    pub affected: u64,
}

/// Run one maintenance job against the sweeper.
pub async fn run_maintenance(
    sweeper: &MaintenanceSweeper,
    job: MaintenanceJob,
) -> Result<MaintenanceReport, SessionError> {
    let now = chrono::Utc::now();
    let affected = match job {
        MaintenanceJob::SweepExpired => sweeper.sweep_expired_threads(now).await?.len() as u64,
        MaintenanceJob::ResetMonthly => sweeper.reset_monthly_points(now).await?,
        MaintenanceJob::ResetDailyTokens => sweeper.reset_daily_token_usage().await?,
    };
    Ok(MaintenanceReport { job, affected })
}

async fn maintenance_handler(
    State(state): State<SharedApiState>,
    Path(job): Path<String>,
) -> Result<Json<MaintenanceReport>, ApiError> {
    let job = MaintenanceJob::parse(&job)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown job '{job}'")))?;
    info!(job = %job, "Maintenance job requested via API");
    run_maintenance(&state.sweeper, job)
        .await
        .map(Json)
        .map_err(session_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use threadsage_channels::{DiscordAdapter, DiscordConfig};
    use threadsage_config::AppConfig;
    use threadsage_core::session::{NewMessage, Thread};
    use threadsage_core::store::{PointsAward, SessionStore};
    use threadsage_providers::{ProviderRouter, TokenBudget};
    use threadsage_store::InMemoryStore;

    fn test_api_state(store: Arc<InMemoryStore>) -> SharedApiState {
        let config = AppConfig::default();
        let router = ProviderRouter::new(TokenBudget::new(store.clone(), 10_000));
        let adapter = Arc::new(DiscordAdapter::new(DiscordConfig::default()));
        let engine = SessionEngine::new(&config, store.clone(), Arc::new(router), adapter);
        Arc::new(ApiV1State {
            engine: Arc::new(engine),
            sweeper: MaintenanceSweeper::new(store),
            admin_token: None,
        })
    }

    async fn seed_thread(store: &InMemoryStore, id: &str, owner: &str, lifetime_days: u32) {
        let mut tx = store.begin().await.unwrap();
        tx.upsert_user(owner, "Ann").await.unwrap();
        tx.upsert_thread(&Thread::open(id, owner, "hello", "en", Utc::now(), lifetime_days))
            .await
            .unwrap();
        tx.insert_message(&NewMessage::prompt(id, owner, "hello", Utc::now()))
            .await
            .unwrap();
        tx.award_points(&PointsAward {
            user_id: owner.into(),
            thread_id: id.into(),
            points: 5,
            new_thread: true,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn clear_request(thread_id: &str, requestor: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/threads/{thread_id}/clear"))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "requestor_id": requestor }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn stats_for_known_and_unknown_users() {
        let store = Arc::new(InMemoryStore::new());
        seed_thread(&store, "t1", "u1", 7).await;
        let state = test_api_state(store);

        let req = Request::builder().uri("/stats/u1").body(Body::empty()).unwrap();
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats: UserStats = json_body(response).await;
        assert_eq!(stats.monthly_points, 5);
        assert_eq!(stats.total_threads, 1);
        assert_eq!(stats.rank, Some((1, 1)));

        let req = Request::builder().uri("/stats/nobody").body(Body::empty()).unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ranking_lists_users() {
        let store = Arc::new(InMemoryStore::new());
        seed_thread(&store, "t1", "u1", 7).await;
        let state = test_api_state(store);

        let req = Request::builder()
            .uri("/ranking?limit=5")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ranking: RankingResponse = json_body(response).await;
        assert_eq!(ranking.entries.len(), 1);
        assert_eq!(ranking.entries[0].user_id, "u1");
    }

    #[tokio::test]
    async fn check_reports_row_counts() {
        let store = Arc::new(InMemoryStore::new());
        seed_thread(&store, "t1", "u1", 7).await;
        let state = test_api_state(store);

        let req = Request::builder().uri("/check").body(Body::empty()).unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats: StoreStats = json_body(response).await;
        assert_eq!((stats.users, stats.threads, stats.messages), (1, 1, 1));
    }

    #[tokio::test]
    async fn clear_requires_owner() {
        let store = Arc::new(InMemoryStore::new());
        seed_thread(&store, "t1", "u1", 7).await;
        let state = test_api_state(store.clone());

        let response = v1_router(state.clone())
            .oneshot(clear_request("t1", "intruder"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(store.get_thread("t1").await.unwrap().is_some());

        let response = v1_router(state.clone())
            .oneshot(clear_request("t1", "u1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.get_thread("t1").await.unwrap().is_none());

        let response = v1_router(state)
            .oneshot(clear_request("t1", "u1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn maintenance_sweep_removes_expired_threads() {
        let store = Arc::new(InMemoryStore::new());
        seed_thread(&store, "old", "u1", 0).await;
        seed_thread(&store, "fresh", "u1", 7).await;
        // Let the zero-lifetime thread fall strictly behind "now".
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let state = test_api_state(store.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/maintenance/sweep")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report: MaintenanceReport = json_body(response).await;
        assert_eq!(report.job, MaintenanceJob::SweepExpired);
        assert_eq!(report.affected, 1);
        assert!(store.get_thread("old").await.unwrap().is_none());
        assert!(store.get_thread("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_maintenance_job_is_not_found() {
        let state = test_api_state(Arc::new(InMemoryStore::new()));
        let req = Request::builder()
            .method("POST")
            .uri("/maintenance/vacuum")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_maintenance_resets_monthly_points() {
        let store = Arc::new(InMemoryStore::new());
        seed_thread(&store, "t1", "u1", 7).await;
        let sweeper = MaintenanceSweeper::new(store.clone());

        let report = run_maintenance(&sweeper, MaintenanceJob::ResetMonthly)
            .await
            .unwrap();
        assert_eq!(report.affected, 1);
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.monthly_points, 0);
        assert_eq!(user.total_points, 5);
    }
}
