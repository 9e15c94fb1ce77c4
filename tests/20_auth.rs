mod common;

use axum::http::StatusCode;
use chrono::Utc;
use uuid::Uuid;

use bizhub_api::auth::{generate_jwt, Claims};
use bizhub_api::permissions::Role;

#[tokio::test]
async fn protected_routes_require_a_token() {
    for uri in ["/api/projects", "/api/invoices", "/api/auth/whoami", "/api/conversations"] {
        let (status, body) = common::send(common::get(uri)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn garbage_tokens_are_rejected() {
    let (status, _) = common::send(common::get_with_token("/api/tasks", "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tokens_signed_with_another_secret_are_rejected() {
    let claims = Claims::new(
        "acme".to_string(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "ada@acme.test".to_string(),
        Role::Owner,
        1,
    );
    let mut security = common::test_config().security;
    security.jwt_secret = "someone-elses-secret".to_string();
    let token = generate_jwt(&claims, &security).unwrap();
    assert!(claims.exp > Utc::now().timestamp());

    let (status, _) = common::send(common::get_with_token("/api/leads", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_tokens_reach_company_validation() {
    let claims = Claims::new(
        "acme".to_string(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "ada@acme.test".to_string(),
        Role::Owner,
        1,
    );
    let token = generate_jwt(&claims, &common::test_config().security).unwrap();

    // With no database behind the pool the request cannot succeed, but it
    // must get past authentication
    let (status, _) = common::send(common::get_with_token("/api/projects", &token)).await;
    assert_ne!(status, StatusCode::UNAUTHORIZED);
    assert!(!status.is_success());
}

#[tokio::test]
async fn query_tokens_only_work_for_the_realtime_socket() {
    let claims = Claims::new(
        "acme".to_string(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "ada@acme.test".to_string(),
        Role::Owner,
        1,
    );
    let token = generate_jwt(&claims, &common::test_config().security).unwrap();

    let uri = format!("/api/projects?token={}", token);
    let (status, _) = common::send(common::get(&uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_login_bodies_are_client_errors() {
    let (status, _) = common::send(common::post_json("/auth/login", "{not json")).await;
    assert!(status.is_client_error(), "unexpected status: {}", status);

    let (status, _) = common::send(common::post_json("/auth/login", r#"{"email": "ada@acme.test"}"#)).await;
    assert!(status.is_client_error(), "unexpected status: {}", status);
}

#[tokio::test]
async fn registration_is_validated_before_touching_the_database() {
    let (status, body) = common::send(common::post_json(
        "/auth/register",
        r#"{"company_name": " ", "name": "Ada", "email": "nope", "password": "short"}"#,
    ))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let fields = &body["field_errors"];
    assert!(fields["company_name"].is_string());
    assert!(fields["email"].is_string());
    assert!(fields["password"].is_string());
}
