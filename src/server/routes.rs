use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::database::schema::{ImageRecord, SearchLogEntry};
use crate::error::Error;
use crate::media::mimetype;
use crate::search::library::ImageLibrary;
use crate::search::query::{StatsSummary, DEFAULT_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT};

/// Requests run concurrently, the library does not: every call goes through this lock.
pub type SharedLibrary = Arc<Mutex<ImageLibrary>>;

#[derive(Debug, Serialize)]
struct HomeResponse {
    status: &'static str,
    stats: StatsSummary,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

pub fn router(library: SharedLibrary) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/search", get(search))
        .route("/search/history", get(search_history))
        .route("/categories", get(categories))
        .route("/image/:category/:filename", get(serve_image))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(library)
}

pub async fn serve(library: ImageLibrary, addr: String) -> anyhow::Result<()> {
    let app = router(Arc::new(Mutex::new(library)));
    let listener = tokio::net::TcpListener::bind(addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

/// Runs a library call on the blocking pool; a panicked task degrades to the default value.
async fn with_library<T, F>(library: SharedLibrary, f: F) -> T
where
    T: Default + Send + 'static,
    F: FnOnce(&mut ImageLibrary) -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&mut library.lock())).await {
        Ok(value) => value,
        Err(e) => {
            error!("Library task failed: {}", e);
            T::default()
        }
    }
}

async fn home(State(library): State<SharedLibrary>) -> Json<HomeResponse> {
    let stats = with_library(library, |l| l.stats()).await;
    Json(HomeResponse { status: "Server is running", stats })
}

async fn search(
    State(library): State<SharedLibrary>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<ImageRecord>> {
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    Json(with_library(library, move |l| l.search_limited(&params.q, limit)).await)
}

async fn search_history(
    State(library): State<SharedLibrary>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<SearchLogEntry>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(with_library(library, move |l| l.history_limited(limit)).await)
}

async fn categories(State(library): State<SharedLibrary>) -> Json<Vec<String>> {
    Json(with_library(library, |l| l.categories()).await)
}

async fn serve_image(
    State(library): State<SharedLibrary>,
    Path((category, filename)): Path<(String, String)>,
) -> Response {
    let resolved = tokio::task::spawn_blocking(move || {
        library.lock().resolve_image_path(&category, &filename)
    })
    .await
    .map_err(|e| Error::Join(e.to_string()))
    .and_then(|r| r);

    let path = match resolved {
        Ok(path) => path,
        Err(Error::ImageNotFound(path)) => {
            warn!("Image not found: {:?}", path);
            return (StatusCode::NOT_FOUND, "Image not found").into_response();
        }
        Err(Error::InvalidPath(part)) => {
            warn!("Rejected image path component: {:?}", part);
            return (StatusCode::BAD_REQUEST, "Invalid image path").into_response();
        }
        Err(e) => {
            error!("Error serving image: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mimetype::detect_mimetype(&bytes);
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(e) => {
            error!("Error serving image {:?}: {}", path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
