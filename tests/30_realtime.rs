mod common;

use axum::{body::Body, http::Request, http::StatusCode};

fn handshake(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn realtime_requires_a_token() {
    let (status, body) = common::send(handshake("/api/realtime")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn realtime_rejects_bad_query_tokens() {
    let (status, _) = common::send(handshake("/api/realtime?token=bogus")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
