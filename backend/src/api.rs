use std::{collections::HashSet, io::ErrorKind, path::Path, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    artifact::{ARTIFACT_TTL_SECONDS, ArtifactFormat},
    download::{fetch_artifact, validate_source_url},
    error::{ApiError, ServiceError},
    index::JsonIndex,
    lifecycle::LifecycleManager,
    store::DiskStore,
    ytdlp::MediaExtractor,
};

pub type Lifecycle = LifecycleManager<JsonIndex, DiskStore>;

pub struct AppState<E> {
    pub lifecycle: Arc<Lifecycle>,
    pub extractor: Arc<E>,
    pub download_semaphore: Arc<Semaphore>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: Arc::clone(&self.lifecycle),
            extractor: Arc::clone(&self.extractor),
            download_semaphore: Arc::clone(&self.download_semaphore),
        }
    }
}

impl<E> AppState<E> {
    pub fn new(lifecycle: Arc<Lifecycle>, extractor: E, max_concurrent_downloads: usize) -> Self {
        Self {
            lifecycle,
            extractor: Arc::new(extractor),
            download_semaphore: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    format: String,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    success: bool,
    title: String,
    format: &'static str,
    filename: String,
    download_url: String,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
struct FileEntry {
    filename: String,
    title: String,
    format: &'static str,
    created_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
    remain: i64,
}

#[derive(Debug, Serialize)]
struct FileListResponse {
    files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
    filename: String,
    existed: bool,
}

/// Routes backed by the lifecycle manager.
pub fn router<E>(state: AppState<E>) -> Router
where
    E: MediaExtractor + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/download", post(submit_download::<E>))
        .route("/files", get(list_files::<E>))
        .route("/files/{filename}", delete(delete_file::<E>))
        .route("/downloads/{filename}", get(serve_file::<E>))
        .with_state(state)
}

/// Full application: API routes, the frontend assets, CORS and request tracing.
pub fn app<E>(state: AppState<E>, static_dir: &Path, cors: CorsLayer) -> Router
where
    E: MediaExtractor + 'static,
{
    router(state)
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "message": "Downloader API is running",
    }))
}

async fn submit_download<E>(
    State(state): State<AppState<E>>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError>
where
    E: MediaExtractor + 'static,
{
    let format = ArtifactFormat::parse(&payload.format)
        .ok_or_else(|| ServiceError::invalid_input("Format must be mp3 or mp4."))?;
    let url = validate_source_url(&payload.url)?;

    let _download_permit = state
        .download_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve download capacity."))?;

    let completed =
        fetch_artifact(state.extractor.as_ref(), state.lifecycle.as_ref(), url, format).await?;

    Ok(Json(DownloadResponse {
        success: true,
        download_url: format!("/downloads/{}", urlencoding::encode(&completed.key)),
        expires_in_seconds: completed.record.as_ref().map(|_| ARTIFACT_TTL_SECONDS),
        title: completed.title,
        format: completed.format.extension(),
        filename: completed.key,
        message: "Download complete",
    }))
}

async fn list_files<E>(
    State(state): State<AppState<E>>,
) -> Result<Json<FileListResponse>, ApiError>
where
    E: MediaExtractor + 'static,
{
    let files = state
        .lifecycle
        .list_live()
        .await?
        .into_iter()
        .map(|item| FileEntry {
            filename: item.record.key,
            title: item.record.display_title,
            format: item.record.format.extension(),
            created_at: item.record.created_at,
            expire_at: item.record.expire_at,
            remain: item.remaining_seconds,
        })
        .collect();

    Ok(Json(FileListResponse { files }))
}

async fn delete_file<E>(
    State(state): State<AppState<E>>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Json<DeleteResponse>, ApiError>
where
    E: MediaExtractor + 'static,
{
    let outcome = state.lifecycle.delete_artifact(&filename).await?;

    Ok(Json(DeleteResponse {
        success: true,
        existed: outcome.existed(),
        filename,
    }))
}

async fn serve_file<E>(
    State(state): State<AppState<E>>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Response, ApiError>
where
    E: MediaExtractor + 'static,
{
    let path = state.lifecycle.live_path(&filename).await?;

    // The sweep may remove the file between the liveness check and this open.
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ServiceError::NotFound(filename).into());
        }
        Err(error) => {
            return Err(ServiceError::storage(format!("opening {}", path.display()), error).into());
        }
    };
    let metadata = file.metadata().await.map_err(|error| {
        ServiceError::storage(format!("reading metadata of {}", path.display()), error)
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("Could not build the content length."))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let origins = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Falling back to development origins.");
        vec![
            "http://127.0.0.1:8000".to_string(),
            "http://localhost:8000".to_string(),
        ]
    } else {
        configured.to_vec()
    };

    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins.iter().collect::<Vec<_>>()
    );

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match port {
        Some(explicit) if explicit != default_port => Some(format!("{scheme}://{host}:{explicit}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
