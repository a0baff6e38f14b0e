// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! `HttpTransport` against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use grokline::transport::{
    HttpRequest, HttpTransport, MultipartPart, RequestBody, Session, Transport,
};

fn transport() -> HttpTransport {
    HttpTransport::new(None, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_execute_sends_rendered_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .and(header("x-probe", "1"))
        .and(header("next-action", "7f00aa01"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landing"))
        .expect(1)
        .mount(&server)
        .await;

    let request = HttpRequest::get(format!("{}/c", server.uri())).with_headers(vec![
        ("x-probe".to_string(), "1".to_string()),
        ("next-action".to_string(), "7f00aa01".to_string()),
    ]);
    let response = transport().execute(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "landing");
}

#[tokio::test]
async fn test_error_status_is_not_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let response = transport()
        .execute(HttpRequest::get(format!("{}/anything", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let transport = HttpTransport::new(None, Duration::from_millis(500)).unwrap();
    let result = transport
        .execute(HttpRequest::get("http://127.0.0.1:9/c"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_session_replays_absorbed_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "__cf_bm=abc; Path=/; HttpOnly")
                .set_body_string("ok"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/c"))
        .and(header("cookie", "__cf_bm=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("with cookie"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = Session::new(Arc::new(transport()));
    session
        .execute(HttpRequest::get(format!("{}/c", server.uri())))
        .await
        .unwrap();
    assert_eq!(session.cookies.get("__cf_bm"), Some("abc"));

    let response = session
        .execute(HttpRequest::post(
            format!("{}/c", server.uri()),
            RequestBody::Text("[]".to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.text(), "with cookie");
}

#[tokio::test]
async fn test_multipart_body_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/c"))
        .and(body_string_contains(r#"[{"userPublicKey":"$o1"}]"#))
        .and(body_string_contains(r#"filename="blob""#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let parts = vec![
        MultipartPart {
            name: "1".to_string(),
            filename: Some("blob".to_string()),
            content_type: Some("application/octet-stream".to_string()),
            data: vec![2; 33],
        },
        MultipartPart {
            name: "0".to_string(),
            filename: None,
            content_type: None,
            data: br#"[{"userPublicKey":"$o1"}]"#.to_vec(),
        },
    ];
    let response = transport()
        .execute(HttpRequest::post(
            format!("{}/c", server.uri()),
            RequestBody::Multipart(parts),
        ))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let received = server.received_requests().await.unwrap();
    let content_type = received[0]
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
}

#[tokio::test]
async fn test_json_body_is_serialized() {
    let server = MockServer::start().await;
    let payload = json!({ "message": "hi", "modelName": "grok-3-auto" });
    Mock::given(method("POST"))
        .and(path("/rest/app-chat/conversations/new"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .execute(HttpRequest::post(
            format!("{}/rest/app-chat/conversations/new", server.uri()),
            RequestBody::Json(payload.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let received = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_json_diff::assert_json_eq!(sent, payload);
}

#[tokio::test]
async fn test_open_stream_yields_whole_body() {
    let server = MockServer::start().await;
    let body = "{\"result\":{\"token\":\"a\"}}\n{\"result\":{\"token\":\"b\"}}\n";
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "x-turn=1")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let mut session = Session::new(Arc::new(transport()));
    let response = session
        .open_stream(HttpRequest::post(
            format!("{}/rest/app-chat/conversations/new", server.uri()),
            RequestBody::Empty,
        ))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(session.cookies.get("x-turn"), Some("1"));

    let chunks: Vec<Vec<u8>> = response
        .body
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(String::from_utf8(chunks.concat()).unwrap(), body);
}

#[tokio::test]
async fn test_request_timeout_overrides_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let request = HttpRequest::get(format!("{}/slow", server.uri()))
        .with_timeout(Duration::from_millis(100));
    assert!(transport().execute(request).await.is_err());
}
