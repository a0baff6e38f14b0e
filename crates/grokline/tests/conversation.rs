// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Buffered and streamed turns through the public client.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use grokline::signature::{SignatureStamp, StatsigSigner};
use grokline::{Client, ErrorKind, Phase, RetryPolicy, SiteIntelligenceCache, StreamFrame};

use support::*;

// ─────────────────────── helpers ───────────────────────

fn client(fixture: &FixtureTransport) -> Client {
    Client::with_transport(
        config(),
        Arc::new(fixture.clone()),
        Arc::new(SiteIntelligenceCache::in_memory()),
    )
}

const TURN_ONE: &str = concat!(
    r#"{"result":{"conversation":{"conversationId":"conv-1","title":"Greeting"}}}"#,
    "\n",
    r#"{"result":{"response":{"token":"Hi"}}}"#,
    "\n",
    r#"{"result":{"response":{"modelResponse":{"message":"Hi","responseId":"r1"}}}}"#,
    "\n",
);

const TURN_TWO: &str = concat!(
    r#"{"result":{"token":"Again"}}"#,
    "\n",
    r#"{"result":{"modelResponse":{"message":"Again","responseId":"r2","generatedImageUrls":["users/a/img.jpg"]}}}"#,
    "\n",
);

// ─────────────────────── buffered ───────────────────────

#[tokio::test]
async fn test_buffered_send_parses_literal_fixture() {
    let fixture = FixtureTransport::new(HELLO_REPLY);
    let mut client = client(&fixture);

    let result = client.send_message("Hi", None).await.unwrap();

    assert_eq!(result.response, "Hello");
    assert_eq!(result.stream_response, vec!["Hel", "lo"]);
    assert_eq!(result.continuation.parent_response_id.as_deref(), Some("r1"));
    assert!(result.images.is_none());
}

#[tokio::test]
async fn test_conversation_request_headers_and_body() {
    let fixture = FixtureTransport::new(TURN_ONE);
    let mut client = client(&fixture).with_signer(StatsigSigner::with_stamp(SignatureStamp {
        seconds: 1_000,
        salt: 7,
    }));
    client.send_message("Hi", None).await.unwrap();

    let calls = fixture.calls();
    let convo = calls.iter().find(|c| c.is_conversation()).unwrap();
    assert_eq!(convo.url, format!("{BASE_URL}/rest/app-chat/conversations/new"));

    let statsig = convo.header("x-statsig-id").unwrap();
    assert!(!statsig.is_empty() && !statsig.ends_with('='));
    assert_eq!(convo.header("x-xai-request-id").unwrap().len(), 36);
    assert!(convo.header("traceparent").unwrap().starts_with("00-"));
    assert_eq!(convo.header("content-type"), Some("application/json"));

    // Signature header appears only on conversation calls.
    assert!(calls
        .iter()
        .filter(|c| !c.is_conversation())
        .all(|c| c.header("x-statsig-id").is_none()));

    match &convo.body {
        grokline::transport::RequestBody::Json(body) => {
            assert_eq!(body["message"], "Hi");
            assert_eq!(body["modelName"], "grok-3-auto");
            assert_eq!(body["modelMode"], "MODEL_MODE_AUTO");
        }
        other => panic!("expected JSON body, got {other:?}"),
    }
}

#[tokio::test]
async fn test_continuation_round_trip() {
    let fixture = FixtureTransport::with_replies(&[TURN_ONE, TURN_TWO]);
    let mut client = client(&fixture);

    let first = client.send_message("Hi", None).await.unwrap();
    let token = first.continuation.clone();
    assert_eq!(token.conversation_id.as_deref(), Some(CONVERSATION_ID));
    assert_eq!(token.anon_user_id, ANON_USER);

    // The token survives a JSON round trip, as a caller would store it.
    let token = grokline::ContinuationToken::from_json(&token.to_json()).unwrap();
    fixture.clear_calls();

    let second = client.send_message("Again?", Some(&token)).await.unwrap();

    assert_eq!(fixture.count(|c| c.is_multipart()), 0);
    assert_eq!(
        fixture.count(|c| c.header("next-action") == Some(ACTIONS[1])),
        1
    );
    assert_eq!(
        fixture.count(|c| c.header("next-action") == Some(ACTIONS[2])),
        1
    );
    let convo = fixture.calls().into_iter().find(|c| c.is_conversation()).unwrap();
    assert_eq!(
        convo.url,
        format!("{BASE_URL}/rest/app-chat/conversations/{CONVERSATION_ID}/responses")
    );

    assert_eq!(second.response, "Again");
    assert_eq!(second.images, Some(vec!["users/a/img.jpg".to_string()]));
    assert_eq!(second.continuation.conversation_id.as_deref(), Some(CONVERSATION_ID));
    assert_eq!(second.continuation.parent_response_id.as_deref(), Some("r2"));
    assert_eq!(second.continuation.private_key, first.continuation.private_key);
}

#[tokio::test]
async fn test_anti_bot_retry_is_bounded() {
    let fixture = FixtureTransport::new(ANTI_BOT_REPLY);
    let mut client = client(&fixture);

    let err = client.send_message("Hi", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.phase(), Phase::Conversation);
    assert_eq!(fixture.count(|c| c.is_conversation()), 2);
    assert_eq!(fixture.renewals(), 1);
    // Each attempt bootstraps from scratch with its own key upload.
    assert_eq!(fixture.count(|c| c.is_multipart()), 2);
}

#[tokio::test]
async fn test_anti_bot_retry_recovers_on_fresh_session() {
    let fixture = FixtureTransport::with_replies(&[ANTI_BOT_REPLY, HELLO_REPLY]);
    let mut client = client(&fixture);
    let first_key = client.public_key();

    let result = client.send_message("Hi", None).await.unwrap();

    assert_eq!(result.response, "Hello");
    assert_eq!(fixture.count(|c| c.is_conversation()), 2);
    assert_ne!(client.public_key(), first_key);
}

#[tokio::test]
async fn test_retry_policy_zero_fails_immediately() {
    let fixture = FixtureTransport::new(ANTI_BOT_REPLY);
    let config = config().with_retry(RetryPolicy {
        max_retries: 0,
        backoff: Some(Duration::from_millis(1)),
    });
    let mut client = Client::with_transport(
        config,
        Arc::new(fixture.clone()),
        Arc::new(SiteIntelligenceCache::in_memory()),
    );

    let err = client.send_message("Hi", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(fixture.count(|c| c.is_conversation()), 1);
    assert_eq!(fixture.renewals(), 0);
}

#[tokio::test]
async fn test_expired_conversation_is_session_error() {
    let fixture = FixtureTransport::with_replies(&[TURN_ONE, "{\"error\":\"not found\"}"]);
    let mut client = client(&fixture);
    let first = client.send_message("Hi", None).await.unwrap();

    let fixture = fixture.with_conversation_status(404);
    let err = client
        .send_message("Again?", Some(&first.continuation))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Session);
    assert_eq!(fixture.renewals(), 0);
}

#[tokio::test]
async fn test_server_error_is_network_error() {
    let fixture = FixtureTransport::new("upstream exploded").with_conversation_status(502);
    let mut client = client(&fixture);

    let err = client.send_message("Hi", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.phase(), Phase::Conversation);
}

// ─────────────────────── streaming ───────────────────────

#[tokio::test]
async fn test_streaming_send_yields_tokens_then_terminal() {
    let fixture = FixtureTransport::new(HELLO_REPLY);
    let mut client = client(&fixture);

    let frames: Vec<StreamFrame> = client.stream_message("Hi", None).collect().await;

    assert_eq!(frames.len(), 3);
    assert!(matches!(&frames[0], StreamFrame::Token(t) if t == "Hel"));
    assert!(matches!(&frames[1], StreamFrame::Token(t) if t == "lo"));
    match &frames[2] {
        StreamFrame::Terminal { text, continuation } => {
            assert_eq!(text, "Hello");
            assert_eq!(continuation.parent_response_id.as_deref(), Some("r1"));
            assert_eq!(continuation.anon_user_id, ANON_USER);
        }
        other => panic!("expected terminal frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_streaming_is_lazy() {
    let fixture = FixtureTransport::new(HELLO_REPLY);
    let mut client = client(&fixture);

    let stream = client.stream_message("Hi", None);
    assert!(fixture.calls().is_empty());
    drop(stream);
    assert!(fixture.calls().is_empty());
}

#[tokio::test]
async fn test_streaming_abandoned_after_first_token() {
    let fixture = FixtureTransport::new(HELLO_REPLY);
    let mut client = client(&fixture);

    {
        let stream = client.stream_message("Hi", None);
        futures::pin_mut!(stream);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, StreamFrame::Token(_)));
        assert_eq!(fixture.open_bodies(), 1);
    }
    assert_eq!(fixture.open_bodies(), 0);

    // The client stays usable for a new turn.
    let result = client.send_message("Hi", None).await.unwrap();
    assert_eq!(result.response, "Hello");
}

#[tokio::test]
async fn test_streaming_does_not_retry_anti_bot() {
    let fixture = FixtureTransport::new(ANTI_BOT_REPLY);
    let mut client = client(&fixture);

    let frames: Vec<StreamFrame> = client.stream_message("Hi", None).collect().await;

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        StreamFrame::Error(e) => {
            assert_eq!(e.kind(), ErrorKind::Auth);
            assert_eq!(e.phase(), Phase::Stream);
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(fixture.count(|c| c.is_conversation()), 1);
    assert_eq!(fixture.renewals(), 0);
}

#[tokio::test]
async fn test_streaming_reply_without_fields_is_parsing_error() {
    let body = r#"{"error":{"code":13,"message":"internal"}}"#;
    let fixture = FixtureTransport::new(body);
    let mut client = client(&fixture);

    let frames: Vec<StreamFrame> = client.stream_message("Hi", None).collect().await;

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        StreamFrame::Error(e) => {
            assert_eq!(e.kind(), ErrorKind::Parsing);
            assert_eq!(e.phase(), Phase::Stream);
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(fixture.open_bodies(), 0);

    // The buffered path classifies the same body identically.
    let err = client.send_message("Hi", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parsing);
}

#[tokio::test]
async fn test_streaming_continuation_skips_key_exchange() {
    let fixture = FixtureTransport::with_replies(&[TURN_ONE, TURN_TWO]);
    let mut client = client(&fixture);

    let first = client.send_message("Hi", None).await.unwrap();
    fixture.clear_calls();

    let frames: Vec<StreamFrame> = client
        .stream_message("Again?", Some(&first.continuation))
        .collect()
        .await;

    assert_eq!(fixture.count(|c| c.is_multipart()), 0);
    match frames.last() {
        Some(StreamFrame::Terminal { text, continuation }) => {
            assert_eq!(text, "Again");
            assert_eq!(continuation.conversation_id.as_deref(), Some(CONVERSATION_ID));
            assert_eq!(continuation.parent_response_id.as_deref(), Some("r2"));
        }
        other => panic!("expected terminal frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bootstrap_failure_surfaces_as_error_frame() {
    let fixture = FixtureTransport::new(HELLO_REPLY).with_step0_body("0:{}\n");
    let mut client = client(&fixture);

    let frames: Vec<StreamFrame> = client.stream_message("Hi", None).collect().await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(
        &frames[0],
        StreamFrame::Error(e) if e.kind() == ErrorKind::Parsing && e.phase() == Phase::KeyExchange
    ));
}
