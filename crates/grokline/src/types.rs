// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data types shared by bootstrap and conversation.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::ModelSpec;
use crate::error::{GrokError, GrokResult, Phase};
use crate::transport::CookieJar;

/// The three server actions the bootstrap calls, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionIds {
    /// Step 0: public key upload.
    pub create: String,
    /// Step 1: challenge issue.
    pub challenge: String,
    /// Step 2: challenge answer and verification material.
    pub verify: String,
}

impl ActionIds {
    /// Build from an ordered list. Fewer than three ids is an error; extras are ignored.
    pub fn from_slice(ids: &[String], phase: Phase) -> GrokResult<Self> {
        match ids {
            [create, challenge, verify, ..] => Ok(Self {
                create: create.clone(),
                challenge: challenge.clone(),
                verify: verify.clone(),
            }),
            _ => Err(GrokError::parsing(
                phase,
                format!("expected 3 server action ids, found {}", ids.len()),
            )),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.create.clone(),
            self.challenge.clone(),
            self.verify.clone(),
        ]
    }
}

/// Everything needed to sign and send one conversation request.
///
/// Built by the bootstrap and never mutated after it reaches `Ready`.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub cookies: CookieJar,
    pub action_ids: ActionIds,
    /// Static chunk path of the bundle holding the transform table.
    pub transform_script_id: String,
    pub baggage: String,
    /// Trace id part of the landing page `sentry-trace` meta tag.
    pub trace_seed: String,
    /// Base64 verification token from the step 2 response.
    pub verification_token: String,
    /// Animation variant selected by the verification token (0..4).
    pub anim_variant: u8,
    /// The SVG path datum selected by the variant.
    pub svg_path: String,
    /// Transform numeric table; never empty.
    pub numbers: Vec<usize>,
    /// Transform script URL the table was read from.
    pub numbers_url: String,
    /// Whether the table came from the cache.
    pub numbers_cached: bool,
    pub anon_user_id: String,
    pub public_key: Vec<u8>,
    /// Private key in the solver's export format.
    pub private_key: String,
}

/// Opaque snapshot that lets a later call continue a conversation.
///
/// Serialized field names match what earlier clients of the service stored,
/// so tokens remain interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    #[serde(rename = "anon_user")]
    pub anon_user_id: String,
    pub cookies: CookieJar,
    pub actions: Vec<String>,
    pub xsid_script: String,
    pub baggage: String,
    pub sentry_trace: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(rename = "parentResponseId")]
    pub parent_response_id: Option<String>,
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

impl ContinuationToken {
    /// Snapshot a ready context after a turn.
    pub fn from_context(
        ctx: &SigningContext,
        cookies: &CookieJar,
        conversation_id: Option<String>,
        parent_response_id: Option<String>,
    ) -> Self {
        Self {
            anon_user_id: ctx.anon_user_id.clone(),
            cookies: cookies.clone(),
            actions: ctx.action_ids.to_vec(),
            xsid_script: ctx.transform_script_id.clone(),
            baggage: ctx.baggage.clone(),
            sentry_trace: ctx.trace_seed.clone(),
            conversation_id,
            parent_response_id,
            private_key: ctx.private_key.clone(),
        }
    }

    pub fn from_json(raw: &str) -> GrokResult<Self> {
        let token: ContinuationToken = serde_json::from_str(raw).map_err(|e| {
            GrokError::session(Phase::Continuation, format!("malformed continuation token: {e}"))
        })?;
        token.validate()?;
        Ok(token)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Check the token can drive a continuation turn.
    pub fn validate(&self) -> GrokResult<()> {
        let missing = |field: &str| {
            GrokError::session(
                Phase::Continuation,
                format!("continuation token has no {field}"),
            )
        };

        if self.anon_user_id.is_empty() {
            return Err(missing("anonymous user id"));
        }
        if self.private_key.is_empty() {
            return Err(missing("private key"));
        }
        if base64::engine::general_purpose::STANDARD
            .decode(&self.private_key)
            .is_err()
        {
            return Err(GrokError::session(
                Phase::Continuation,
                "continuation token private key is not base64",
            ));
        }
        if self.xsid_script.is_empty() {
            return Err(missing("transform script id"));
        }
        if self.actions.len() < 3 || self.actions.iter().any(String::is_empty) {
            return Err(GrokError::session(
                Phase::Continuation,
                format!(
                    "continuation token needs 3 action ids, has {}",
                    self.actions.len()
                ),
            ));
        }
        if self.conversation_id.as_deref().unwrap_or("").is_empty() {
            return Err(missing("conversation id"));
        }
        if self.parent_response_id.as_deref().unwrap_or("").is_empty() {
            return Err(missing("parent response id"));
        }
        Ok(())
    }

    pub fn action_ids(&self) -> GrokResult<ActionIds> {
        ActionIds::from_slice(&self.actions, Phase::Continuation).map_err(|e| {
            GrokError::session(Phase::Continuation, e.to_string())
        })
    }
}

/// Which conversation a message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    New,
    Continue {
        conversation_id: String,
        parent_response_id: String,
    },
}

/// An outbound message.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub text: String,
    pub model: ModelSpec,
    pub file_attachments: Vec<String>,
    pub image_attachments: Vec<String>,
    pub target: ConversationTarget,
}

impl ConversationMessage {
    pub fn new(text: impl Into<String>, model: ModelSpec) -> Self {
        Self {
            text: text.into(),
            model,
            file_attachments: Vec::new(),
            image_attachments: Vec::new(),
            target: ConversationTarget::New,
        }
    }

    /// Address the message to the conversation a token points at.
    pub fn continuing(mut self, token: &ContinuationToken) -> GrokResult<Self> {
        token.validate()?;
        self.target = ConversationTarget::Continue {
            conversation_id: token.conversation_id.clone().unwrap_or_default(),
            parent_response_id: token.parent_response_id.clone().unwrap_or_default(),
        };
        Ok(self)
    }

    pub fn is_continuation(&self) -> bool {
        matches!(self.target, ConversationTarget::Continue { .. })
    }
}

/// A completed buffered turn.
#[derive(Debug, Clone)]
pub struct ChatResult {
    /// Final message text.
    pub response: String,
    /// Token fragments in arrival order.
    pub stream_response: Vec<String>,
    /// Generated image URLs, when the reply produced any.
    pub images: Option<Vec<String>>,
    pub continuation: ContinuationToken,
}

/// One item of a streamed turn.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    /// A token fragment, emitted as soon as its line is parsed.
    Token(String),
    /// End of stream: accumulated text and the refreshed token.
    Terminal {
        text: String,
        continuation: ContinuationToken,
    },
    /// The turn failed; no further frames follow.
    Error(GrokError),
}
