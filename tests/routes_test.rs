mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{clock, settle, MemoryExamStore};
use exam_session_backend::config::SessionTuning;
use exam_session_backend::{routes::build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "whsec_test";

fn setup_app() -> (Router, Arc<MemoryExamStore>, Uuid) {
    let store = MemoryExamStore::new();
    let exam_id = store.add_exam(45);
    let state = AppState::from_parts(store.clone(), clock(), SessionTuning::default(), SECRET);
    (build_router(state), store, exam_id)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook(secret: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhook/session-updated")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-webhook-secret", secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test(start_paused = true)]
async fn health_reports_ok() {
    let (app, _, _) = setup_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["open_sessions"], 0);
}

#[tokio::test(start_paused = true)]
async fn session_lifecycle_over_http() {
    let (app, _, exam_id) = setup_app();
    let student_id = Uuid::new_v4();
    let base = format!("/api/sessions/{exam_id}/{student_id}");

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/sessions/begin",
            json!({ "exam_id": exam_id, "student_id": student_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "in_progress");
    assert!(body["session"]["deadline"].is_string());
    assert_eq!(body["status"]["status"], "in_progress");

    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            &format!("{base}/answers"),
            json!({ "question_id": "q1", "answer": { "kind": "choice", "value": "b" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);
    assert_eq!(body["question_id"], "q1");

    let req = Request::builder()
        .uri(format!("{base}/status"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");

    let req = Request::builder()
        .method("POST")
        .uri(format!("{base}/submit"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "submitted");
    assert!(body["session"]["submitted_at"].is_string());

    let (status, _) = send(
        &app,
        json_request(
            "PATCH",
            &format!("{base}/answers"),
            json!({ "question_id": "q2", "answer": { "kind": "text", "value": "late" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn answers_need_an_open_session_and_a_valid_body() {
    let (app, _, exam_id) = setup_app();
    let student_id = Uuid::new_v4();
    let uri = format!("/api/sessions/{exam_id}/{student_id}/answers");
    let answer = json!({ "question_id": "q1", "answer": { "kind": "choice", "value": "a" } });

    let (status, body) = send(&app, json_request("PATCH", &uri, answer)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session_not_open");

    send(
        &app,
        json_request(
            "POST",
            "/api/sessions/begin",
            json!({ "exam_id": exam_id, "student_id": student_id }),
        ),
    )
    .await;

    let blank = json!({ "question_id": "", "answer": { "kind": "choice", "value": "a" } });
    let (status, _) = send(&app, json_request("PATCH", &uri, blank)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn begin_for_unknown_exam_is_not_found() {
    let (app, _, _) = setup_app();
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/sessions/begin",
            json!({ "exam_id": Uuid::new_v4(), "student_id": Uuid::new_v4() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn webhook_requires_secret_and_routes_the_push() {
    let (app, store, exam_id) = setup_app();
    let student_id = Uuid::new_v4();
    let (_, body) = send(
        &app,
        json_request(
            "POST",
            "/api/sessions/begin",
            json!({ "exam_id": exam_id, "student_id": student_id }),
        ),
    )
    .await;
    let session_id = body["session"]["id"].as_str().unwrap().to_string();

    let push = json!({
        "event": "session_updated",
        "session_id": session_id,
        "status": "submitted",
        "submitted_at": "2026-10-17T09:10:00Z",
        "score": "42.5"
    });

    let (status, _) = send(&app, webhook(None, push.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, webhook(Some("nope"), push.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut wrong_event = push.clone();
    wrong_event["event"] = json!("session_deleted");
    let (status, body) = send(&app, webhook(Some(SECRET), wrong_event)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unexpected_event");

    let (status, body) = send(&app, webhook(Some(SECRET), push)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["routed"], true);
    settle().await;

    let req = Request::builder()
        .uri(format!("/api/sessions/{exam_id}/{student_id}/status"))
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&app, req).await;
    assert_eq!(body["status"], "submitted");
    assert_eq!(body["score"], "42.5");
    assert_eq!(store.marks(), 0);
}

#[tokio::test(start_paused = true)]
async fn webhook_for_unknown_session_is_accepted_but_not_routed() {
    let (app, _, _) = setup_app();
    let push = json!({ "event": "session_updated", "session_id": Uuid::new_v4() });
    let (status, body) = send(&app, webhook(Some(SECRET), push)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["routed"], false);
}
