//! End-to-end coverage of the HTTP surface via `tower::ServiceExt::oneshot`,
//! driving the same router `main.rs` serves (spec.md §6, §8).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sandterm_server::{build_router, build_state, Config};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn test_config(storage_dir: std::path::PathBuf) -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        storage_dir,
        shell: "/bin/sh".to_string(),
        idle_timeout: Duration::from_secs(300),
        secret_key: "test-secret".to_string(),
        ring_buffer_capacity: 64,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_ok() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path().to_path_buf()));
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_get_and_delete_session() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path().to_path_buf()));
    let app = build_router(state);

    let create_req = Request::builder()
        .method("POST")
        .uri("/api/terminal/sessions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"shell": "/bin/sh", "cols": 80, "rows": 24}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["active"], json!(true));

    let get_req = Request::builder()
        .uri(format!("/api/terminal/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(get_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert!(fetched.get("tail").is_none(), "tail must be opt-in");
    assert_eq!(fetched["cwd"].as_str().unwrap(), created["cwd"].as_str().unwrap());

    let get_with_tail_req = Request::builder()
        .uri(format!("/api/terminal/sessions/{id}?tail=5"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(get_with_tail_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched_with_tail = body_json(response).await;
    assert!(fetched_with_tail["tail"].is_array());

    let delete_req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/terminal/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(delete_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let deleted = body_json(response).await;
    assert_eq!(deleted["status"], json!("success"));

    let get_after_delete = Request::builder()
        .uri(format!("/api/terminal/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(get_after_delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_session_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path().to_path_buf()));
    let app = build_router(state);

    let req = Request::builder()
        .uri("/api/terminal/sessions/00000000-0000-0000-0000-000000000000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn maintenance_cleanup_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path().to_path_buf()));
    let app = build_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/maintenance/cleanup")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["status"], json!("success"));
    assert!(report["inactive_sessions_cleaned"].is_number());
}
