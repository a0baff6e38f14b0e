// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted transport that plays the service's side of a turn.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;

use grokline::solver::{ChallengeScheme, Secp256k1Scheme, SolvedChallenge};
use grokline::transport::{
    HttpRequest, HttpResponse, Method, RequestBody, StreamingResponse, Transport, TransportError,
};
use grokline::ClientConfig;

pub const BASE_URL: &str = "https://grok.test";
pub const ACTIONS: [&str; 3] = ["7f00aa01", "7f00aa02", "7f00aa03"];
pub const ACTION_BUNDLE: &str = "/_next/static/chunks/app-actions.js";
pub const REFERENCE_BUNDLE: &str = "/_next/static/chunks/app-ref.js";
pub const TRANSFORM_ID: &str = "static/chunks/transform-9f.js";
pub const NUMBERS: [usize; 4] = [5, 10, 20, 30];
pub const ANON_USER: &str = "anon-7c1e";
pub const CONVERSATION_ID: &str = "conv-1";
pub const CHALLENGE: [u8; 32] = [0x42; 32];

/// The literal three-line reply.
pub const HELLO_REPLY: &str = concat!(
    r#"{"result":{"response":{"token":"Hel"}}}"#,
    "\n",
    r#"{"result":{"response":{"token":"lo"}}}"#,
    "\n",
    r#"{"result":{"response":{"modelResponse":{"message":"Hello","responseId":"r1"}}}}"#,
    "\n",
);

pub const ANTI_BOT_REPLY: &str = r#"{"error":{"code":7,"message":"Request rejected by anti-bot rules."}}"#;

/// A recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl Call {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }

    pub fn is_conversation(&self) -> bool {
        self.url.contains("/rest/app-chat/conversations/")
    }

    pub fn is_bundle(&self) -> bool {
        self.url.contains("/_next/")
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    /// Conversation requests answered so far; survives `clear_calls`.
    conversation_calls: usize,
    renewals: usize,
    registered_key: Option<Vec<u8>>,
    conversation_status: u16,
    conversation_replies: Vec<String>,
    step0_body: Option<String>,
}

/// A transport answering from fixed bodies. Clones and renewals share state.
#[derive(Clone)]
pub struct FixtureTransport {
    state: Arc<Mutex<State>>,
    open_bodies: Arc<AtomicUsize>,
}

/// Held by a streamed body; counts it as open until dropped.
struct BodyGuard(Arc<AtomicUsize>);

impl BodyGuard {
    fn new(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self(open.clone())
    }
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn hold(_guard: &BodyGuard) {}

impl FixtureTransport {
    /// Every conversation call gets `reply`.
    pub fn new(reply: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                conversation_status: 200,
                conversation_replies: vec![reply.to_string()],
                ..State::default()
            })),
            open_bodies: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Conversation calls get `replies` in order, the last one repeating.
    pub fn with_replies(replies: &[&str]) -> Self {
        let fixture = Self::new("");
        fixture.state.lock().unwrap().conversation_replies =
            replies.iter().map(|r| r.to_string()).collect();
        fixture
    }

    pub fn with_conversation_status(self, status: u16) -> Self {
        self.state.lock().unwrap().conversation_status = status;
        self
    }

    pub fn with_step0_body(self, body: &str) -> Self {
        self.state.lock().unwrap().step0_body = Some(body.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Streamed bodies handed out and not yet dropped.
    pub fn open_bodies(&self) -> usize {
        self.open_bodies.load(Ordering::SeqCst)
    }

    pub fn renewals(&self) -> usize {
        self.state.lock().unwrap().renewals
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        let path = request.url.strip_prefix(BASE_URL).unwrap_or(&request.url);
        match (request.method, path) {
            (Method::Get, "/c") => ok_with_cookie(&landing_page(), "__cf_bm=landing; Path=/"),
            (Method::Get, ACTION_BUNDLE) => ok(&action_bundle()),
            (Method::Get, REFERENCE_BUNDLE) => ok(&reference_bundle()),
            (Method::Get, p) if p == format!("/_next/{TRANSFORM_ID}") => ok(&transform_bundle()),
            (Method::Get, p) if p.starts_with("/_next/") => ok("self.__next_f=[];"),
            (Method::Post, "/c") => {
                let action = request.header("next-action").unwrap_or_default().to_string();
                answer_action(&mut state, &action, &request.body)
            }
            (Method::Post, p) if p.starts_with("/rest/app-chat/conversations/") => {
                let index = state
                    .conversation_calls
                    .min(state.conversation_replies.len().saturating_sub(1));
                state.conversation_calls += 1;
                let body = state
                    .conversation_replies
                    .get(index)
                    .cloned()
                    .unwrap_or_default();
                HttpResponse {
                    status: state.conversation_status,
                    headers: vec![("set-cookie".into(), "x-turn=1; Path=/".into())],
                    body: body.into_bytes(),
                }
            }
            _ => HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: b"not found".to_vec(),
            },
        }
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.respond(&request))
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError> {
        let response = self.respond(&request);
        // One chunk per line, the way the service flushes.
        let chunks: Vec<Result<Vec<u8>, TransportError>> = response
            .body
            .split_inclusive(|&b| b == b'\n')
            .map(|c| Ok(c.to_vec()))
            .collect();
        let guard = BodyGuard::new(&self.open_bodies);
        let body = futures::stream::iter(chunks).map(move |chunk| {
            hold(&guard);
            chunk
        });
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body: body.boxed(),
        })
    }

    fn renew(&self) -> Arc<dyn Transport> {
        self.state.lock().unwrap().renewals += 1;
        Arc::new(self.clone())
    }
}

fn answer_action(state: &mut State, action: &str, body: &RequestBody) -> HttpResponse {
    match (action, body) {
        (a, RequestBody::Multipart(parts)) if a == ACTIONS[0] => {
            if let Some(key) = parts.iter().find(|p| p.name == "1") {
                state.registered_key = Some(key.data.clone());
            }
            let body = state.step0_body.clone().unwrap_or_else(|| {
                format!("0:{{\"a\":\"$@1\"}}\n1:{{\"anonUserId\":\"{ANON_USER}\",\"ok\":true}}\n")
            });
            ok_with_cookie(&body, "sso-anon=1; Path=/")
        }
        (a, RequestBody::Text(_)) if a == ACTIONS[1] => {
            let mut body = b"0:[\"$@1\"]\n1:o86,".to_vec();
            body.extend_from_slice(&CHALLENGE);
            body.extend_from_slice(b"1:{\"ok\":true}\n");
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body,
            }
        }
        (a, RequestBody::Text(text)) if a == ACTIONS[2] => {
            let value: serde_json::Value = serde_json::from_str(text).unwrap_or_default();
            let answer = SolvedChallenge {
                challenge: value[0]["challenge"].as_str().unwrap_or_default().to_string(),
                signature: value[0]["signature"].as_str().unwrap_or_default().to_string(),
            };
            let verified = state
                .registered_key
                .as_ref()
                .map(|key| Secp256k1Scheme.verify(key, &CHALLENGE, &answer))
                .unwrap_or(false);
            if !verified {
                return HttpResponse {
                    status: 400,
                    headers: Vec::new(),
                    body: b"bad signature".to_vec(),
                };
            }
            ok(&verification_body())
        }
        _ => HttpResponse {
            status: 400,
            headers: Vec::new(),
            body: b"unknown action".to_vec(),
        },
    }
}

fn ok(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: Vec::new(),
        body: body.as_bytes().to_vec(),
    }
}

fn ok_with_cookie(body: &str, cookie: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("set-cookie".to_string(), cookie.to_string())],
        body: body.as_bytes().to_vec(),
    }
}

// ── Bodies ──

pub fn landing_page() -> String {
    format!(
        r#"<!DOCTYPE html><html><head>
<meta name="baggage" content="sentry-environment=production,sentry-public_key=abc"/>
<meta name="sentry-trace" content="5e1f0c3a9b7d4e2f8a6c1b0d3e5f7a9c-1a2b3c4d5e6f7a8b-0"/>
<script src="/_next/static/chunks/webpack-0.js" async=""></script>
<script src="{REFERENCE_BUNDLE}" async=""></script>
<script src="{ACTION_BUNDLE}" async=""></script>
<script src="https://cdn.example.com/analytics.js"></script>
</head><body></body></html>"#
    )
}

pub fn action_bundle() -> String {
    let refs: Vec<String> = ACTIONS
        .iter()
        .map(|a| format!(r#"n=(0,r.createServerReference)("{a}",r.callServer,void 0,r.findSourceMapURL,"x");"#))
        .collect();
    format!("(self.webpackChunk=[]).push([[1],{{1:(e,t,r)=>{{let anonPrivateKey;{}}}}}]);", refs.concat())
}

pub fn reference_bundle() -> String {
    format!(r#"(self.webpackChunk=[]).push([[2],{{2:(e,t,r)=>{{r.u=e=>"{TRANSFORM_ID}",r.x=()=>r(880932)}}}}]);"#)
}

pub fn transform_bundle() -> String {
    NUMBERS
        .iter()
        .map(|n| format!("parseInt(x[{n}],16)"))
        .collect::<Vec<_>>()
        .join(";")
}

/// 48-byte verification token.
pub fn verification_token() -> String {
    let bytes: Vec<u8> = (0..48u8).map(|i| i.wrapping_mul(7).wrapping_add(3)).collect();
    STANDARD.encode(bytes)
}

/// An SVG path with 16 curve rows of 11 values each.
pub fn svg_path(seed: usize) -> String {
    let rows: Vec<String> = (0..16)
        .map(|r| {
            (0..11)
                .map(|i| ((seed * 11 + r * 37 + i * 53) % 256).to_string())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    format!("M 10,30 C{}", rows.join(" C"))
}

pub fn verification_body() -> String {
    let paths: Vec<String> = (0..4)
        .map(|s| format!(r#"{{"d":"{}"}}"#, svg_path(s)))
        .collect();
    format!(
        r#"0:{{"a":"$@1"}}
1:[["$","meta",null,{{"name":"grok-site-verification","content":"{}"}}],{}]
"#,
        verification_token(),
        paths.join(",")
    )
}

pub fn config() -> ClientConfig {
    ClientConfig::detached(BASE_URL, "grok-3-auto")
}
