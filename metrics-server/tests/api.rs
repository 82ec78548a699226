//! End-to-end tests of the HTTP API against the fully layered router.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use metrics_model::{MetricRecord, codec, sign};
use metrics_server::api::{AppState, build_router};
use metrics_server::storage::{MemoryStore, MetricStore};
use serde_json::{Value, json};
use tower::ServiceExt;

const BODY_LIMIT: usize = 1024 * 1024;

fn setup(key: Option<&str>) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store.clone()).with_sign_key(key.map(str::to_string));
    (build_router(state, BODY_LIMIT), store)
}

fn json_post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_json_update_then_value() {
    let (app, _) = setup(None);

    let response = app
        .clone()
        .oneshot(json_post(
            "/update/",
            r#"{"id":"34","type":"gauge","value":74.092}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"id":"34","type":"gauge","value":74.092})
    );

    let response = app
        .oneshot(json_post("/value/", r#"{"id":"34","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"id":"34","type":"gauge","value":74.092})
    );
}

#[tokio::test]
async fn test_json_counter_update_returns_total() {
    let (app, _) = setup(None);

    for expected in [5, 10] {
        let response = app
            .clone()
            .oneshot(json_post(
                "/update/",
                r#"{"id":"PollCount","type":"counter","delta":5}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["delta"], json!(expected));
    }
}

#[tokio::test]
async fn test_json_update_missing_field_is_rejected() {
    let (app, store) = setup(None);

    let response = app
        .oneshot(json_post("/update/", r#"{"id":"Temp","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(store.get_gauge("Temp").await.is_err());
}

#[tokio::test]
async fn test_json_value_of_missing_metric_is_not_found() {
    let (app, _) = setup(None);
    let response = app
        .oneshot(json_post("/value/", r#"{"id":"nope","type":"counter"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_content_type_is_rejected() {
    let (app, _) = setup(None);

    let request = Request::post("/update/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"id":"a","type":"gauge","value":1}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::post("/updates/")
        .body(Body::from("[]"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_applied_twice_accumulates() {
    let (app, store) = setup(None);
    let batch = r#"[{"id":"qwe","type":"counter","delta":3},{"id":"bad","type":"histogram"}]"#;

    for _ in 0..2 {
        let response = app.clone().oneshot(json_post("/updates/", batch)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(store.get_counter("qwe").await.unwrap(), 6);
    assert!(store.get_gauge("bad").await.is_err());
}

#[tokio::test]
async fn test_gzip_request_and_response() {
    let (app, store) = setup(None);
    let body = codec::encode_batch(&[
        MetricRecord::gauge("Alloc", 1024.5),
        MetricRecord::counter("PollCount", 7),
    ])
    .unwrap();

    let request = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get_gauge("Alloc").await.unwrap(), 1024.5);
    assert_eq!(store.get_counter("PollCount").await.unwrap(), 7);

    let request = Request::post("/value/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::from(r#"{"id":"PollCount","type":"counter"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    let decoded = codec::decompress(&body_bytes(response).await).unwrap();
    let record: MetricRecord = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(record, MetricRecord::counter("PollCount", 7));
}

#[tokio::test]
async fn test_signed_request_is_accepted_and_response_signed() {
    let (app, store) = setup(Some("secret"));
    let body = codec::encode_batch(&[MetricRecord::counter("qwe", 3)]).unwrap();
    let signature = sign::sign(&body, "secret");

    let request = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .header("HashSHA256", signature)
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get_counter("qwe").await.unwrap(), 3);

    let query = r#"{"id":"qwe","type":"counter"}"#;
    let request = Request::post("/value/")
        .header(header::CONTENT_TYPE, "application/json")
        .header("HashSHA256", sign::sign(query.as_bytes(), "secret"))
        .body(Body::from(query))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let header_sig = response
        .headers()
        .get("HashSHA256")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let bytes = body_bytes(response).await;
    assert!(sign::verify(&bytes, "secret", &header_sig));
}

#[tokio::test]
async fn test_tampered_body_is_rejected_before_apply() {
    let (app, store) = setup(Some("secret"));
    let original = br#"[{"id":"qwe","type":"counter","delta":3}]"#;
    let tampered = br#"[{"id":"qwe","type":"counter","delta":300}]"#;

    let request = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header("HashSHA256", sign::sign(original, "secret"))
        .body(Body::from(&tampered[..]))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.get_counter("qwe").await.unwrap_err().is_not_found());

    // Unsigned bodies are rejected too.
    let response = app
        .oneshot(json_post("/updates/", &original[..]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.get_counter("qwe").await.is_err());
}

#[tokio::test]
async fn test_path_update_and_read() {
    let (app, _) = setup(None);

    let response = app
        .clone()
        .oneshot(
            Request::post("/update/counter/hits/5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::post("/update/gauge/Temp/-2.5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::get("/value/counter/hits").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"5");

    let response = app
        .clone()
        .oneshot(Request::get("/value/gauge/Temp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await, b"-2.5");

    let response = app
        .oneshot(Request::get("/value/gauge/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_path_errors() {
    let (app, _) = setup(None);

    let cases = [
        ("POST", "/update/histogram/x/1", StatusCode::BAD_REQUEST),
        ("POST", "/update/counter/x/1.5", StatusCode::BAD_REQUEST),
        ("POST", "/update/gauge/x/abc", StatusCode::BAD_REQUEST),
        ("POST", "/update/gauge/x/NaN", StatusCode::BAD_REQUEST),
        ("POST", "/update/gauge/x/inf", StatusCode::BAD_REQUEST),
        ("POST", "/update/gauge/x/-inf", StatusCode::BAD_REQUEST),
        ("POST", "/update/gauge/1", StatusCode::NOT_FOUND),
        ("GET", "/value/histogram/x", StatusCode::NOT_FOUND),
    ];
    for (method, uri, expected) in cases {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), expected, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_index_lists_metrics() {
    let (app, store) = setup(None);
    store.update_gauge("Alloc", 12.0).await.unwrap();
    store.increment_counter("PollCount", 2).await.unwrap();

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(page.contains("gauge Alloc 12"));
    assert!(page.contains("counter PollCount 2"));
}

#[tokio::test]
async fn test_ping() {
    let (app, _) = setup(None);
    let response = app
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ping_fails_while_database_unreachable() {
    use metrics_server::storage::{ResilientStore, SqliteConnector};

    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("sqlite:{}", dir.path().join("missing/metrics.db").display());
    let store = Arc::new(ResilientStore::new(SqliteConnector::new(dsn)));
    let app = build_router(AppState::new(store), BODY_LIMIT);

    let response = app
        .clone()
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // Writes are absorbed and reads degrade instead of failing.
    let response = app
        .clone()
        .oneshot(json_post("/updates/", r#"[{"id":"a","type":"counter","delta":1}]"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/value/counter/a").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
