// Subreddit Follow - Web Server
// REST API with Axum over the follow service

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subreddit_follow::{
    Admission, AdmissionError, AppConfig, FollowService, FollowedSubreddit, PostSummary,
    RedditClient, SqliteFollowStore, CAPACITY,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<FollowService>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
            reason: None,
        }
    }
}

impl ApiResponse<Option<()>> {
    fn rejected(err: &AdmissionError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            reason: Some(err.reason_code()),
        }
    }
}

/// Follow request body
#[derive(Deserialize)]
struct FollowRequest {
    name: String,
}

/// Followed subreddit (simplified for API)
#[derive(Serialize)]
struct FollowedResponse {
    name: String,
    followed_at: String,
}

#[derive(Serialize)]
struct AdmissionResponse {
    followed: FollowedResponse,
    evicted: Vec<FollowedResponse>,
}

#[derive(Serialize)]
struct FollowedListResponse {
    capacity: usize,
    followed: Vec<FollowedResponse>,
}

impl From<FollowedSubreddit> for FollowedResponse {
    fn from(record: FollowedSubreddit) -> Self {
        Self {
            name: record.name.into(),
            followed_at: record.followed_at.to_rfc3339(),
        }
    }
}

impl From<Admission> for AdmissionResponse {
    fn from(admission: Admission) -> Self {
        Self {
            followed: admission.followed.into(),
            evicted: admission.evicted.into_iter().map(Into::into).collect(),
        }
    }
}

fn rejection_status(err: &AdmissionError) -> StatusCode {
    match err {
        AdmissionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AdmissionError::NotFound(_) => StatusCode::NOT_FOUND,
        AdmissionError::Duplicate(_) => StatusCode::CONFLICT,
        AdmissionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rejection(err: AdmissionError) -> Response {
    if let AdmissionError::Storage(e) = &err {
        error!("storage failure: {:#}", e);
    }
    (rejection_status(&err), Json(ApiResponse::rejected(&err))).into_response()
}

/// Run blocking store/HTTP work off the async executor
async fn blocking<T, F>(f: F) -> Result<T, AdmissionError>
where
    F: FnOnce() -> Result<T, AdmissionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AdmissionError::Storage(anyhow::anyhow!("worker task failed: {}", e)))?
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/followed - Followed subreddits, oldest first
async fn get_followed(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.service);

    match blocking(move || service.followed()).await {
        Ok(records) => {
            let response = FollowedListResponse {
                capacity: CAPACITY,
                followed: records.into_iter().map(Into::into).collect(),
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => rejection(e),
    }
}

/// POST /api/follow - Follow a subreddit
async fn follow(State(state): State<AppState>, Json(request): Json<FollowRequest>) -> Response {
    let service = Arc::clone(&state.service);

    match blocking(move || service.admit(&request.name)).await {
        Ok(admission) => {
            info!(name = %admission.followed.name, "follow accepted");
            let response: AdmissionResponse = admission.into();
            (StatusCode::CREATED, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => rejection(e),
    }
}

/// GET /api/feed - Top post per followed subreddit, ranked by score
async fn get_feed(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.service);

    match blocking(move || service.assemble_feed()).await {
        Ok(posts) => (StatusCode::OK, Json(ApiResponse::<Vec<PostSummary>>::ok(posts))).into_response(),
        Err(e) => rejection(e),
    }
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

fn build_router(state: AppState) -> Router {
    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/followed", get(get_followed))
        .route("/follow", post(follow))
        .route("/feed", get(get_feed))
        .with_state(state);

    // Build main router
    Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// ============================================================================
// Main Server
// ============================================================================

/// Open the store and build the Reddit client on a blocking thread. The
/// blocking HTTP client starts and drops its own runtime while being built,
/// which panics on an async worker.
async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let service = tokio::task::spawn_blocking(move || -> anyhow::Result<FollowService> {
        let store = SqliteFollowStore::open(&config.db_path)?;
        info!(path = %config.db_path.display(), "database opened");
        let source = RedditClient::new(&config.reddit)?;
        Ok(FollowService::new(store, source))
    })
    .await??;

    Ok(AppState {
        service: Arc::new(service),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var_os("FOLLOW_CONFIG").map(std::path::PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    let bind_addr = config.bind_addr.clone();

    let state = build_state(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
