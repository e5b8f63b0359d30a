//! Axum JSON API over the contest feed, bookmarks and the latest run notice.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use contrack_core::{ContestId, ContestStatus, Identity, Platform, UserId};
use contrack_storage::StoreError;
use contrack_sync::{BookmarkError, ContestQuery, ContrackServices, FeedError, FeedPage, SyncConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "contrack-web";

/// Header carrying the signed-in user as resolved by the upstream auth proxy.
pub const USER_HEADER: &str = "x-contrack-user";

#[derive(Clone)]
pub struct AppState {
    pub services: ContrackServices,
}

impl AppState {
    pub fn new(services: ContrackServices) -> Self {
        Self { services }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ContestsParams {
    status: Option<ContestStatus>,
    platform: Option<Platform>,
    /// Restrict to the caller's bookmarks.
    #[serde(default)]
    bookmarked: bool,
}

#[derive(Debug, Serialize)]
struct ContestsResponse {
    #[serde(flatten)]
    page: FeedPage,
    /// Notice from the latest aggregation run, e.g. which sources failed.
    notice: Option<String>,
}

#[derive(Debug, Serialize)]
struct BookmarksResponse {
    contest_ids: BTreeSet<ContestId>,
}

enum ApiError {
    Feed(FeedError),
    Bookmark(BookmarkError),
    BadRequest(String),
    NotFound(&'static str),
}

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        ApiError::Feed(err)
    }
}

impl From<BookmarkError> for ApiError {
    fn from(err: BookmarkError) -> Self {
        ApiError::Bookmark(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Feed(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            ApiError::Bookmark(BookmarkError::NotAuthenticated) => {
                (StatusCode::UNAUTHORIZED, BookmarkError::NotAuthenticated.to_string())
            }
            ApiError::Bookmark(BookmarkError::Store(err @ StoreError::UnknownContest(_))) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Bookmark(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        };
        if status.is_server_error() {
            warn!(%status, %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/contests", get(contests_handler))
        .route("/api/contests/{id}", get(contest_detail_handler))
        .route("/api/bookmarks", get(bookmarks_handler))
        .route(
            "/api/bookmarks/{contest_id}",
            axum::routing::put(add_bookmark_handler).delete(remove_bookmark_handler),
        )
        .route("/api/runs/latest", get(latest_run_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("CONTRACK_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let services = ContrackServices::from_config(SyncConfig::from_env()).await?;
    let scheduler = services.maybe_start_scheduler().await?;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, store = services.stores.backend, "serving contest tracker API");
    axum::serve(listener, app(AppState::new(services)))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to listen for shutdown signal");
            }
        })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    Ok(())
}

fn identity_from(headers: &HeaderMap) -> Identity {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| Identity::User(UserId::new(v)))
        .unwrap_or_default()
}

fn parse_contest_id(raw: &str) -> Result<ContestId, ApiError> {
    ContestId::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("`{raw}` is not a contest id")))
}

async fn healthz_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({ "status": "ok", "store": state.services.stores.backend })).into_response()
}

async fn contests_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ContestsParams>,
) -> Result<Json<ContestsResponse>, ApiError> {
    let bookmarked_by = if params.bookmarked {
        Some(
            identity_from(&headers)
                .user()
                .cloned()
                .ok_or(BookmarkError::NotAuthenticated)?,
        )
    } else {
        None
    };
    let query = ContestQuery {
        status: params.status,
        platform: params.platform,
        bookmarked_by,
    };
    let page = state.services.feed.list(&query, Utc::now()).await?;
    let notice = state
        .services
        .aggregator
        .latest_outcome()
        .await
        .and_then(|outcome| outcome.notice);
    Ok(Json(ContestsResponse { page, notice }))
}

async fn contest_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_contest_id(&id)?;
    match state.services.feed.get(&id, Utc::now()).await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Err(ApiError::NotFound("contest")),
    }
}

async fn bookmarks_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BookmarksResponse>, ApiError> {
    let contest_ids = state.services.bookmarks.list(&identity_from(&headers)).await?;
    Ok(Json(BookmarksResponse { contest_ids }))
}

async fn add_bookmark_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(contest_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = identity_from(&headers);
    let contest_id = parse_contest_id(&contest_id)?;
    state.services.bookmarks.add(&identity, &contest_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_bookmark_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(contest_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = identity_from(&headers);
    let contest_id = parse_contest_id(&contest_id)?;
    state.services.bookmarks.remove(&identity, &contest_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn latest_run_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    match state.services.aggregator.latest_outcome().await {
        Some(outcome) => Ok(Json(outcome).into_response()),
        None => Err(ApiError::NotFound("aggregation run")),
    }
}
