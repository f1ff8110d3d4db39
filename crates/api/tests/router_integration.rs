//! Router behaviour that needs no database: routing, redirects, middleware
//! and authentication rejections.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{authed_request, create_test_app, lazy_pool, parse_response_body};
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_liveness() {
    let app = create_test_app(lazy_pool());
    let response = app.oneshot(get("/api/health/live")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_root_redirects_to_map() {
    let app = create_test_app(lazy_pool());
    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/map");
}

#[tokio::test]
async fn test_unknown_page_redirects_to_map() {
    let app = create_test_app(lazy_pool());
    let response = app.oneshot(get("/settings")).await.unwrap();

    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/map");
}

#[tokio::test]
async fn test_client_route_without_build_is_unavailable() {
    let app = create_test_app(lazy_pool());
    let response = app.oneshot(get("/dashboard")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unknown_api_path_is_not_found() {
    let app = create_test_app(lazy_pool());
    let response = app.oneshot(get("/api/v1/nothing-here")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_projects_require_token() {
    let app = create_test_app(lazy_pool());
    let response = app.oneshot(get("/api/v1/projects")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_garbage_token_rejected_before_database() {
    let app = create_test_app(lazy_pool());
    let response = app
        .oneshot(authed_request(
            Method::GET,
            "/api/v1/projects/p1/pins/stream",
            "not-a-jwt",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signup_validation_error() {
    let app = create_test_app(lazy_pool());
    let response = app
        .oneshot(common::json_request(
            Method::POST,
            "/api/v1/auth/signup",
            serde_json::json!({
                "email": "not-an-email",
                "password": "fieldwork2024",
                "displayName": "Worker"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["message"], "Invalid email format");
}

#[tokio::test]
async fn test_shell_signed_out() {
    let app = create_test_app(lazy_pool());
    let response = app
        .oneshot(get("/api/v1/shell?path=/dashboard&projectId=p1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["action"], "redirect");
    assert_eq!(body["path"], "/login");
    assert_eq!(body["chrome"]["searchActionAvailable"], false);
}

#[tokio::test]
async fn test_request_id_and_security_headers() {
    let app = create_test_app(lazy_pool());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health/live")
                .header("X-Request-ID", "field-trace-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-request-id"], "field-trace-1");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
}
