// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Conversation requests and NDJSON reply parsing.
//!
//! Buffered and streamed sends share request construction and the
//! per-line accumulator; they differ only in when lines become available.
//! Replies to a new conversation nest fields under `result.response`, replies
//! to a continuation put them directly under `result`. Both shapes are
//! checked on every line.

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{GrokError, GrokResult, Phase};
use crate::signature::RequestSigner;
use crate::transport::{CookieJar, HttpRequest, Method, RequestBody, Session, StreamingResponse};
use crate::types::{
    ChatResult, ContinuationToken, ConversationMessage, ConversationTarget, SigningContext,
    StreamFrame,
};
use crate::util::random_hex;

/// Sentinel the service returns instead of a reply when it flags the session.
pub const ANTI_BOT_PHRASE: &str = "rejected by anti-bot rules";

const NEW_CONVERSATION_PATH: &str = "/rest/app-chat/conversations/new";

/// Request path for a message.
pub fn conversation_path(target: &ConversationTarget) -> String {
    match target {
        ConversationTarget::New => NEW_CONVERSATION_PATH.to_string(),
        ConversationTarget::Continue {
            conversation_id, ..
        } => format!("/rest/app-chat/conversations/{conversation_id}/responses"),
    }
}

/// JSON body for a message.
pub fn build_payload(message: &ConversationMessage) -> Value {
    let model = &message.model;
    match &message.target {
        ConversationTarget::New => json!({
            "temporary": false,
            "modelName": model.name,
            "message": message.text,
            "fileAttachments": message.file_attachments,
            "imageAttachments": message.image_attachments,
            "disableSearch": false,
            "enableImageGeneration": true,
            "returnImageBytes": false,
            "returnRawGrokInXaiRequest": false,
            "enableImageStreaming": true,
            "imageGenerationCount": 2,
            "forceConcise": false,
            "toolOverrides": {},
            "enableSideBySide": true,
            "sendFinalMetadata": true,
            "isReasoning": model.is_reasoning(),
            "webpageUrls": [],
            "disableTextFollowUps": false,
            "responseMetadata": {
                "requestModelDetails": { "modelId": model.name },
            },
            "disableMemory": false,
            "forceSideBySide": false,
            "modelMode": model.mode,
            "isAsyncChat": false,
        }),
        ConversationTarget::Continue {
            parent_response_id,
            ..
        } => json!({
            "message": message.text,
            "modelName": model.name,
            "parentResponseId": parent_response_id,
            "disableSearch": false,
            "enableImageGeneration": true,
            "imageAttachments": message.image_attachments,
            "returnImageBytes": false,
            "returnRawGrokInXaiRequest": false,
            "fileAttachments": message.file_attachments,
            "enableImageStreaming": true,
            "imageGenerationCount": 2,
            "forceConcise": false,
            "toolOverrides": {},
            "enableSideBySide": true,
            "sendFinalMetadata": true,
            "customPersonality": "",
            "isReasoning": model.is_reasoning(),
            "webpageUrls": [],
            "metadata": {
                "requestModelDetails": { "modelId": model.name },
                "request_metadata": {
                    "model": model.name,
                    "mode": model.request_mode,
                },
            },
            "disableTextFollowUps": false,
            "disableArtifact": false,
            "isFromGrokFiles": false,
            "disableMemory": false,
            "forceSideBySide": false,
            "modelMode": model.mode,
            "isAsyncChat": false,
            "skipCancelCurrentInflightRequests": false,
            "isRegenRequest": false,
        }),
    }
}

/// W3C `traceparent` with random ids, unsampled.
pub fn traceparent() -> String {
    format!("00-{}-{}-00", random_hex(16), random_hex(8))
}

// ── Reply parsing ──

/// Fields gathered from reply lines, first non-empty occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct ReplyAccumulator {
    continuation: bool,
    pub conversation_id: Option<String>,
    pub parent_response_id: Option<String>,
    pub images: Option<Vec<String>>,
    pub message: Option<String>,
    pub tokens: Vec<String>,
    /// A line carried the anti-bot sentinel.
    pub rejected: bool,
}

impl ReplyAccumulator {
    pub fn new(target: &ConversationTarget) -> Self {
        match target {
            ConversationTarget::New => Self::default(),
            ConversationTarget::Continue {
                conversation_id, ..
            } => Self {
                continuation: true,
                conversation_id: Some(conversation_id.clone()),
                ..Self::default()
            },
        }
    }

    /// Ingest one line; returns the token fragment it carried, if any.
    /// Lines that are not JSON are skipped.
    pub fn ingest_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.contains(ANTI_BOT_PHRASE) {
            self.rejected = true;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                tracing::debug!("skipping non-JSON reply line");
                return None;
            }
        };
        let result = &value["result"];
        let model_response = [
            &result["response"]["modelResponse"],
            &result["modelResponse"],
        ];

        if !self.continuation && self.conversation_id.is_none() {
            self.conversation_id = non_empty_str(&result["conversation"]["conversationId"]);
        }
        if self.parent_response_id.is_none() {
            self.parent_response_id = model_response
                .iter()
                .find_map(|m| non_empty_str(&m["responseId"]));
        }
        if self.images.is_none() {
            self.images = model_response
                .iter()
                .find_map(|m| string_list(&m["generatedImageUrls"]));
        }
        if self.message.is_none() {
            self.message = model_response
                .iter()
                .find_map(|m| non_empty_str(&m["message"]));
        }

        let token = non_empty_str(&result["response"]["token"])
            .or_else(|| non_empty_str(&result["token"]));
        if let Some(token) = &token {
            self.tokens.push(token.clone());
        }
        token
    }

    /// Whether any reply content arrived.
    pub fn has_reply(&self) -> bool {
        self.message.is_some() || !self.tokens.is_empty() || self.parent_response_id.is_some()
    }

    /// Concatenated token fragments.
    pub fn streamed_text(&self) -> String {
        self.tokens.concat()
    }

    pub fn continuation_token(&self, ctx: &SigningContext, cookies: &CookieJar) -> ContinuationToken {
        ContinuationToken::from_context(
            ctx,
            cookies,
            self.conversation_id.clone(),
            self.parent_response_id.clone(),
        )
    }

    /// Finish a buffered turn.
    pub fn into_result(self, ctx: &SigningContext, cookies: &CookieJar) -> ChatResult {
        let continuation = self.continuation_token(ctx, cookies);
        let response = self.message.unwrap_or_else(|| self.tokens.concat());
        ChatResult {
            response,
            stream_response: self.tokens,
            images: self.images,
            continuation,
        }
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    let list: Vec<String> = value
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    (!list.is_empty()).then_some(list)
}

/// Splits a chunked body into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and drain every complete line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// The unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Error for a failed conversation response.
pub fn failure(status: u16, body: &str, target: &ConversationTarget, phase: Phase) -> GrokError {
    if body.contains(ANTI_BOT_PHRASE) {
        return GrokError::auth(phase, ANTI_BOT_PHRASE);
    }
    if status == 404 && matches!(target, ConversationTarget::Continue { .. }) {
        return GrokError::session(phase, "conversation no longer exists");
    }
    if (200..300).contains(&status) {
        return GrokError::parsing(phase, format!("no reply fields in response: {}", excerpt(body)));
    }
    GrokError::network(phase, format!("unexpected status {status}: {}", excerpt(body)))
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}

// ── Transport ──

/// Outcome of a buffered send.
#[derive(Debug)]
pub enum SendOutcome {
    Completed(ChatResult),
    /// The session was flagged as automated.
    Rejected,
}

/// Builds, signs and sends conversation requests.
pub struct ConversationTransport<'a> {
    config: &'a ClientConfig,
    signer: &'a dyn RequestSigner,
}

impl<'a> ConversationTransport<'a> {
    pub fn new(config: &'a ClientConfig, signer: &'a dyn RequestSigner) -> Self {
        Self { config, signer }
    }

    /// A signed request for `message` with fresh trace headers.
    pub fn prepare(
        &self,
        ctx: &SigningContext,
        cookies: &CookieJar,
        message: &ConversationMessage,
    ) -> GrokResult<HttpRequest> {
        let path = conversation_path(&message.target);
        let signature = self.signer.sign(Method::Post, &path, ctx)?;

        let headers = self.config.headers.conversation.render(&[
            ("baggage", ctx.baggage.clone()),
            ("sentry-trace", crate::bootstrap::sentry_trace(&ctx.trace_seed)),
            ("traceparent", traceparent()),
            ("x-statsig-id", signature),
            ("x-xai-request-id", Uuid::new_v4().to_string()),
            ("cookie", cookies.header_value()),
        ]);

        Ok(
            HttpRequest::post(self.config.endpoint(&path), RequestBody::Json(build_payload(message)))
                .with_headers(headers)
                .with_timeout(self.config.conversation_timeout),
        )
    }

    /// Send and parse the whole reply.
    pub async fn send(
        &self,
        session: &mut Session,
        ctx: &SigningContext,
        message: &ConversationMessage,
    ) -> GrokResult<SendOutcome> {
        let request = self.prepare(ctx, &session.cookies, message)?;
        let response = session
            .execute(request)
            .await
            .map_err(|e| GrokError::network(Phase::Conversation, e.to_string()))?;
        let text = response.text();

        let mut acc = ReplyAccumulator::new(&message.target);
        if response.is_success() {
            for line in text.lines() {
                acc.ingest_line(line);
            }
        }

        if response.is_success() && (acc.has_reply() || text.contains("modelResponse")) {
            tracing::debug!("reply parsed: {} tokens", acc.tokens.len());
            return Ok(SendOutcome::Completed(acc.into_result(ctx, &session.cookies)));
        }
        if text.contains(ANTI_BOT_PHRASE) {
            tracing::info!("conversation rejected by anti-bot check");
            return Ok(SendOutcome::Rejected);
        }
        Err(failure(response.status, &text, &message.target, Phase::Conversation))
    }

    /// Send and return the open response for line-by-line reading.
    pub async fn open(
        &self,
        session: &mut Session,
        ctx: &SigningContext,
        message: &ConversationMessage,
    ) -> GrokResult<StreamingResponse> {
        let request = self.prepare(ctx, &session.cookies, message)?;
        let mut response = session
            .open_stream(request)
            .await
            .map_err(|e| GrokError::network(Phase::Stream, e.to_string()))?;

        if !(200..300).contains(&response.status) {
            let mut body = Vec::new();
            while let Some(Ok(chunk)) = response.body.next().await {
                body.extend_from_slice(&chunk);
            }
            let text = String::from_utf8_lossy(&body);
            return Err(failure(response.status, &text, &message.target, Phase::Stream));
        }
        Ok(response)
    }
}

/// Turn an open reply into frames: one `Token` per fragment, then a single
/// `Terminal`, or an `Error` that ends the sequence.
///
/// Dropping the returned stream drops the response body.
pub fn reply_frames(
    response: StreamingResponse,
    mut acc: ReplyAccumulator,
    ctx: SigningContext,
    cookies: CookieJar,
) -> impl Stream<Item = StreamFrame> + Send + 'static {
    async_stream::stream! {
        let mut body = response.body;
        let mut lines = LineBuffer::default();
        let mut last_line = String::new();

        loop {
            let (batch, ended) = match body.next().await {
                Some(Ok(chunk)) => (lines.push(&chunk), false),
                Some(Err(e)) => {
                    yield StreamFrame::Error(GrokError::network(Phase::Stream, e.to_string()));
                    return;
                }
                None => (lines.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for line in batch {
                if !line.trim().is_empty() {
                    last_line.clone_from(&line);
                }
                if let Some(token) = acc.ingest_line(&line) {
                    yield StreamFrame::Token(token);
                }
                if acc.rejected {
                    yield StreamFrame::Error(GrokError::auth(Phase::Stream, ANTI_BOT_PHRASE));
                    return;
                }
            }

            if ended {
                break;
            }
        }

        if !acc.has_reply() {
            yield StreamFrame::Error(GrokError::parsing(
                Phase::Stream,
                format!("no reply fields in response: {}", excerpt(&last_line)),
            ));
            return;
        }

        let continuation = acc.continuation_token(&ctx, &cookies);
        yield StreamFrame::Terminal {
            text: acc.streamed_text(),
            continuation,
        };
    }
}
