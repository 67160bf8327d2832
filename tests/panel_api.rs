//! Panel API tests driven through the axum router without a live server.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use ticket_rush::AppState;
use ticket_rush::web::build_router;

fn state() -> Arc<AppState> {
    Arc::new(AppState {
        registry: ticket_rush::web::registry::TaskRegistry::new(),
        config: tokio::sync::RwLock::new(ticket_rush::AppConfig::default()),
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn dashboard_is_served() {
    let app = build_router(state());
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn task_list_starts_empty() {
    let app = build_router(state());
    let response = app
        .oneshot(Request::builder().uri("/api/tasks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn global_status_reports_zeroes() {
    let app = build_router(state());
    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["activeTasks"], 0);
    assert_eq!(status["totalTasks"], 0);
    assert_eq!(status["totalClicks"], 0);
}

#[tokio::test]
async fn invalid_start_request_is_rejected() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tasks")
                .header("content-type", "application/json")
                .body(Body::from("{\"url\":\"\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("url"));
}

#[tokio::test]
async fn unknown_task_actions_fail_cleanly() {
    let app = build_router(state());

    let stop = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tasks/deadbeef/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stop.status(), StatusCode::BAD_REQUEST);

    let log = app
        .oneshot(
            Request::builder()
                .uri("/api/tasks/deadbeef/log")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(log.status(), StatusCode::NOT_FOUND);
}
