use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, prelude::BASE64_STANDARD};
use glb_squeeze::prelude::*;
use serde_json::{Value, json};

const GOOD_KEY: &str = "good-key";

/// Stands in for the Tinify service on a loopback port.
struct StandIn {
    base: String,
    uploads: AtomicUsize,
    transforms: Mutex<Vec<Value>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Basic {}", BASE64_STANDARD.encode(format!("api:{GOOD_KEY}")));
    headers
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value == expected.as_str())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized", "message": "Credentials are invalid" })),
    )
        .into_response()
}

async fn shrink(State(state): State<Arc<StandIn>>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.uploads.fetch_add(1, Ordering::SeqCst);
    // The uploaded bytes pick the output the test wants to hit.
    let id = match &body[..] {
        b"gone" => "gone",
        b"broken" => "broken",
        _ => "abc",
    };
    let url = format!("{}/output/{id}", state.base);
    (
        StatusCode::CREATED,
        [(header::LOCATION, url.clone())],
        Json(json!({
            "input": { "size": body.len(), "type": "image/png" },
            "output": {
                "size": 10,
                "type": "image/png",
                "width": 200,
                "height": 100,
                "ratio": 0.5,
                "url": url,
            },
        })),
    )
        .into_response()
}

async fn output(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if id == "gone" {
        return (StatusCode::NOT_FOUND, "Output expired").into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::HeaderName::from_static("image-width"), "200"),
            (header::HeaderName::from_static("image-height"), "100"),
        ],
        "compressed",
    )
        .into_response()
}

async fn transform(
    State(state): State<Arc<StandIn>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.transforms.lock().unwrap().push(body.clone());
    if id == "broken" {
        return (StatusCode::BAD_REQUEST, "Bad transform").into_response();
    }

    if let Some(format) = body["convert"]["type"].as_str() {
        let content_type = format!("image/{format}");
        ([(header::CONTENT_TYPE, content_type)], "converted").into_response()
    } else {
        ([(header::CONTENT_TYPE, "image/png")], "resized").into_response()
    }
}

async fn stand_in() -> (Arc<StandIn>, TinifyClient) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = Arc::new(StandIn {
        base: base.clone(),
        uploads: AtomicUsize::new(0),
        transforms: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/shrink", post(shrink))
        .route("/output/{id}", get(output).post(transform))
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, TinifyClient::new(format!("{base}/shrink")))
}

#[tokio::test]
async fn compress_downloads_the_output() {
    let (state, client) = stand_in().await;

    let image = client
        .compress(GOOD_KEY, b"raw png bytes", &Transform::Compress)
        .await
        .unwrap();

    assert_eq!(image.data, b"compressed");
    assert_eq!(image.mime_type, "image/png");
    assert_eq!(state.uploads.load(Ordering::SeqCst), 1);
    assert!(state.transforms.lock().unwrap().is_empty());
}

#[tokio::test]
async fn convert_posts_the_target_format() {
    let (state, client) = stand_in().await;

    let image = client
        .compress(GOOD_KEY, b"raw png bytes", &Transform::Convert("webp".to_string()))
        .await
        .unwrap();

    assert_eq!(image.data, b"converted");
    assert_eq!(image.mime_type, "image/webp");
    assert_eq!(
        state.transforms.lock().unwrap().as_slice(),
        &[json!({ "convert": { "type": "webp" } })]
    );
}

#[tokio::test]
async fn percentage_resize_fits_the_scaled_original() {
    let (state, client) = stand_in().await;
    let spec = ResizeSpec {
        percentage: Some(50),
        aspect_ratio_locked: true,
        ..Default::default()
    };

    let image = client
        .compress(GOOD_KEY, b"raw png bytes", &Transform::Resize(spec))
        .await
        .unwrap();

    assert_eq!(image.data, b"resized");
    assert_eq!(
        state.transforms.lock().unwrap().as_slice(),
        &[json!({ "resize": { "method": "fit", "width": 100, "height": 50 } })]
    );
}

#[tokio::test]
async fn single_dimension_resize_scales() {
    let (state, client) = stand_in().await;
    let spec = ResizeSpec {
        width: Some(64),
        ..Default::default()
    };

    client
        .compress(GOOD_KEY, b"raw png bytes", &Transform::Resize(spec))
        .await
        .unwrap();

    assert_eq!(
        state.transforms.lock().unwrap().as_slice(),
        &[json!({ "resize": { "method": "scale", "width": 64 } })]
    );
}

#[tokio::test]
async fn rejected_key_surfaces_the_service_message() {
    let (state, client) = stand_in().await;

    let err = client
        .compress("wrong-key", b"raw png bytes", &Transform::Compress)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "TinyPNG API error (401): Credentials are invalid"
    );
    assert_eq!(state.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_resize_fails_before_uploading() {
    let (state, client) = stand_in().await;

    let err = client
        .compress(GOOD_KEY, b"raw png bytes", &Transform::Resize(ResizeSpec::default()))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "No resize options provided");
    assert_eq!(state.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_dimension_lookup_fails_the_resize() {
    let (state, client) = stand_in().await;
    let spec = ResizeSpec {
        percentage: Some(50),
        ..Default::default()
    };

    let err = client
        .compress(GOOD_KEY, b"gone", &Transform::Resize(spec))
        .await
        .unwrap_err();

    assert!(
        err.to_string().starts_with("Failed to read texture dimensions (404)"),
        "{err}"
    );
    assert!(state.transforms.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_resize_reports_status_and_body() {
    let (_state, client) = stand_in().await;
    let spec = ResizeSpec {
        width: Some(64),
        ..Default::default()
    };

    let err = client
        .compress(GOOD_KEY, b"broken", &Transform::Resize(spec))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to resize texture (400): Bad transform");
}

#[tokio::test]
async fn rejected_conversion_reports_the_status() {
    let (_state, client) = stand_in().await;

    let err = client
        .compress(GOOD_KEY, b"broken", &Transform::Convert("avif".to_string()))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to convert texture: 400");
}

#[tokio::test]
async fn failed_download_is_reported() {
    let (_state, client) = stand_in().await;

    let err = client
        .compress(GOOD_KEY, b"gone", &Transform::Compress)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to download compressed texture");
}
