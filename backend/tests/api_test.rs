mod mocks;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use chrono::DateTime;
use clipshelf::{
    ARTIFACT_TTL_SECONDS, ArtifactFormat, ArtifactIndex, ArtifactRecord, DiskStore, JsonIndex,
    LifecycleManager,
    api::{self, AppState, Lifecycle},
};
use http_body_util::BodyExt;
use mocks::extractor::FakeExtractor;
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
    dir: tempfile::TempDir,
    lifecycle: Arc<Lifecycle>,
    router: Router,
}

fn test_app(extractor: FakeExtractor) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = Arc::new(LifecycleManager::new(
        JsonIndex::in_memory(),
        DiskStore::new(dir.path()),
    ));
    let router = api::router(AppState::new(Arc::clone(&lifecycle), extractor, 2));
    TestApp {
        dir,
        lifecycle,
        router,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app(FakeExtractor::new("x", None));
    let (status, body) = send_json(&app.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn download_then_list_serve_and_delete() {
    let app = test_app(FakeExtractor::new("My Song", Some(215)));

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://www.youtube.com/watch?v=abc", "format": "mp3" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["title"], "My Song");
    assert_eq!(body["format"], "mp3");
    assert_eq!(body["filename"], "My Song.mp3");
    assert_eq!(body["download_url"], "/downloads/My%20Song.mp3");
    assert_eq!(body["expires_in_seconds"], ARTIFACT_TTL_SECONDS);

    let (status, body) = send_json(&app.router, Method::GET, "/files", None).await;
    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "My Song.mp3");
    assert_eq!(files[0]["title"], "My Song");
    let remain = files[0]["remain"].as_i64().unwrap();
    assert!(remain > ARTIFACT_TTL_SECONDS - 5 && remain <= ARTIFACT_TTL_SECONDS);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/downloads/My%20Song.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "audio/mpeg");
    assert!(
        response.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .starts_with("attachment;")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"fake media");

    let (status, body) = send_json(&app.router, Method::DELETE, "/files/My%20Song.mp3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["existed"], true);

    let (status, body) = send_json(&app.router, Method::DELETE, "/files/My%20Song.mp3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["existed"], false);

    let (status, body) = send_json(&app.router, Method::GET, "/downloads/My%20Song.mp3", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn bad_requests_are_rejected_before_the_extractor() {
    let extractor = FakeExtractor::new("x", Some(10));
    let app = test_app(extractor.clone());

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://example.com/video", "format": "mp3" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://youtu.be/abc", "format": "wav" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    assert!(extractor.calls().is_empty());
}

#[tokio::test]
async fn long_sources_get_source_rejected() {
    let app = test_app(FakeExtractor::new("Full concert", Some(2 * 60 * 60)));

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://youtu.be/concert", "format": "mp4" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SOURCE_REJECTED");

    let (_, body) = send_json(&app.router, Method::GET, "/files", None).await;
    assert!(body["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn extraction_failures_are_reported() {
    let app = test_app(FakeExtractor::failing("Private video"));

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://youtu.be/private", "format": "mp3" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EXTRACTION_FAILED");
}

#[tokio::test]
async fn expired_records_are_neither_listed_nor_served() {
    let app = test_app(FakeExtractor::new("x", None));
    let created_at = DateTime::from_timestamp(1_000, 0).unwrap();
    let record = ArtifactRecord::new("stale.mp3", "stale", ArtifactFormat::Audio, created_at);
    app.lifecycle
        .index()
        .put(&record, Duration::from_secs(3600))
        .await
        .unwrap();
    std::fs::write(app.dir.path().join("stale.mp3"), b"old").unwrap();

    let (_, body) = send_json(&app.router, Method::GET, "/files", None).await;
    assert!(body["files"].as_array().unwrap().is_empty());

    let (status, body) = send_json(&app.router, Method::GET, "/downloads/stale.mp3", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn path_like_filenames_are_refused() {
    let app = test_app(FakeExtractor::new("x", None));

    let (status, body) = send_json(&app.router, Method::DELETE, "/files/..%2Fsecret", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, _) = send(&app.router, Method::GET, "/downloads/..%2Fsecret", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
