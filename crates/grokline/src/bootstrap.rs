// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Anonymous session bootstrap.
//!
//! ```text
//! Init ──GET /c──▶ Loaded ──step 0──▶ KeyExchanged ──step 1──▶ ChallengeIssued ──step 2──▶ Ready
//!                                         ▲
//!                     continuation token ─┘
//! ```
//!
//! Each edge is one method taking the previous state by value, so a state
//! can only be reached with the fields it needs. Resuming from a
//! continuation token enters at `KeyExchanged`; steps 1 and 2 always run
//! because verification material is short-lived.

use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{GrokError, GrokResult, Phase};
use crate::intelligence::{BootstrapConstants, SiteIntelligence};
use crate::solver::{ChallengeSolver, SolvedChallenge};
use crate::transport::{HttpRequest, HttpResponse, MultipartPart, RequestBody, Session};
use crate::types::{ContinuationToken, SigningContext};
use crate::util::between;

const LANDING_PATH: &str = "/c";
const ANON_USER_MARKER: &str = r#"{"anonUserId":""#;
const CHALLENGE_START: &[u8] = b":o86,";
const CHALLENGE_END: &[u8] = b"1:";
const PUBLIC_KEY_STUB: &str = r#"[{"userPublicKey":"$o1"}]"#;

/// Landing page scanned, constants resolved.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub constants: BootstrapConstants,
}

/// Public key registered; anonymous user known.
#[derive(Debug, Clone)]
pub struct KeyExchanged {
    pub constants: BootstrapConstants,
    pub anon_user_id: String,
}

/// Challenge received and answered locally.
#[derive(Debug, Clone)]
pub struct ChallengeIssued {
    pub constants: BootstrapConstants,
    pub anon_user_id: String,
    pub answer: SolvedChallenge,
}

/// Bootstrap progress.
#[derive(Debug, Clone)]
pub enum BootstrapState {
    Init,
    Loaded(Loaded),
    KeyExchanged(KeyExchanged),
    ChallengeIssued(ChallengeIssued),
    Ready(SigningContext),
}

impl BootstrapState {
    pub fn name(&self) -> &'static str {
        match self {
            BootstrapState::Init => "init",
            BootstrapState::Loaded(_) => "loaded",
            BootstrapState::KeyExchanged(_) => "key-exchanged",
            BootstrapState::ChallengeIssued(_) => "challenge-issued",
            BootstrapState::Ready(_) => "ready",
        }
    }

    fn constants(&self) -> Option<&BootstrapConstants> {
        match self {
            BootstrapState::Loaded(s) => Some(&s.constants),
            BootstrapState::KeyExchanged(s) => Some(&s.constants),
            BootstrapState::ChallengeIssued(s) => Some(&s.constants),
            BootstrapState::Init | BootstrapState::Ready(_) => None,
        }
    }
}

/// Drives one bootstrap over a session.
pub struct BootstrapProtocol<'a> {
    config: &'a ClientConfig,
    intel: &'a dyn SiteIntelligence,
    solver: &'a dyn ChallengeSolver,
}

impl<'a> BootstrapProtocol<'a> {
    pub fn new(
        config: &'a ClientConfig,
        intel: &'a dyn SiteIntelligence,
        solver: &'a dyn ChallengeSolver,
    ) -> Self {
        Self {
            config,
            intel,
            solver,
        }
    }

    /// Run to `Ready`, from scratch or from a continuation token.
    ///
    /// When resuming, `solver` must hold the token's private key.
    pub async fn run(
        &self,
        session: &mut Session,
        resume: Option<&ContinuationToken>,
    ) -> GrokResult<SigningContext> {
        let mut state = match resume {
            Some(token) => BootstrapState::KeyExchanged(self.resume(session, token)?),
            None => BootstrapState::Init,
        };

        loop {
            tracing::debug!("bootstrap state: {}", state.name());
            let stale = state
                .constants()
                .filter(|c| c.from_cache)
                .map(|c| c.fingerprint.clone());

            let next = match state {
                BootstrapState::Init => self.load(session).await.map(BootstrapState::Loaded),
                BootstrapState::Loaded(s) => self
                    .exchange_key(session, s)
                    .await
                    .map(BootstrapState::KeyExchanged),
                BootstrapState::KeyExchanged(s) => self
                    .issue_challenge(session, s)
                    .await
                    .map(BootstrapState::ChallengeIssued),
                BootstrapState::ChallengeIssued(s) => {
                    self.verify(session, s).await.map(BootstrapState::Ready)
                }
                BootstrapState::Ready(ctx) => {
                    tracing::info!("bootstrap complete for {}", ctx.anon_user_id);
                    return Ok(ctx);
                }
            };

            state = match next {
                Ok(state) => state,
                Err(e) => {
                    if let (true, Some(fingerprint)) = (e.is_parsing(), stale) {
                        tracing::info!("dropping cached action set after {e}");
                        self.intel.invalidate_constants(&fingerprint);
                    }
                    return Err(e);
                }
            };
        }
    }

    // ── Transitions ──

    /// Init → Loaded: fetch the landing page and resolve constants.
    pub async fn load(&self, session: &mut Session) -> GrokResult<Loaded> {
        let headers = self
            .config
            .headers
            .load
            .render(&[("cookie", session.cookies.header_value())]);
        let request = HttpRequest::get(self.config.endpoint(LANDING_PATH))
            .with_headers(headers)
            .with_timeout(self.config.timeout);

        let response = session
            .execute(request)
            .await
            .map_err(|e| GrokError::network(Phase::Load, e.to_string()))?;
        let html = success_text(response, Phase::Load)?;

        let constants = self.intel.bootstrap_constants(session, &html).await?;
        tracing::debug!(
            "landing page loaded, {} cookies",
            session.cookies.len()
        );
        Ok(Loaded { constants })
    }

    /// Continuation token → KeyExchanged, skipping the landing page and step 0.
    pub fn resume(
        &self,
        session: &mut Session,
        token: &ContinuationToken,
    ) -> GrokResult<KeyExchanged> {
        token.validate()?;
        session.cookies.extend(&token.cookies);

        Ok(KeyExchanged {
            constants: BootstrapConstants {
                action_ids: token.action_ids()?,
                transform_script_id: token.xsid_script.clone(),
                fingerprint: String::new(),
                baggage: token.baggage.clone(),
                trace_seed: token.sentry_trace.clone(),
                from_cache: false,
            },
            anon_user_id: token.anon_user_id.clone(),
        })
    }

    /// Loaded → KeyExchanged (step 0): upload the public key.
    pub async fn exchange_key(
        &self,
        session: &mut Session,
        state: Loaded,
    ) -> GrokResult<KeyExchanged> {
        let parts = vec![
            MultipartPart {
                name: "1".to_string(),
                filename: Some("blob".to_string()),
                content_type: Some("application/octet-stream".to_string()),
                data: self.solver.public_key(),
            },
            MultipartPart {
                name: "0".to_string(),
                filename: None,
                content_type: None,
                data: PUBLIC_KEY_STUB.as_bytes().to_vec(),
            },
        ];

        let response = self
            .post_action(
                session,
                &state.constants,
                &state.constants.action_ids.create,
                RequestBody::Multipart(parts),
                Phase::KeyExchange,
            )
            .await?;
        let text = success_text(response, Phase::KeyExchange)?;

        let anon_user_id = between(&text, ANON_USER_MARKER, "\"")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GrokError::parsing(Phase::KeyExchange, "anonymous user id missing from response")
            })?
            .to_string();
        tracing::debug!("registered anonymous user {anon_user_id}");

        Ok(KeyExchanged {
            constants: state.constants,
            anon_user_id,
        })
    }

    /// KeyExchanged → ChallengeIssued (step 1): fetch and answer the challenge.
    pub async fn issue_challenge(
        &self,
        session: &mut Session,
        state: KeyExchanged,
    ) -> GrokResult<ChallengeIssued> {
        let body = serde_json::json!([{ "anonUserId": state.anon_user_id }]);
        let response = self
            .post_action(
                session,
                &state.constants,
                &state.constants.action_ids.challenge,
                RequestBody::Text(body.to_string()),
                Phase::Challenge,
            )
            .await?;
        if !response.is_success() {
            return Err(status_error(&response, Phase::Challenge));
        }

        let challenge = extract_challenge(&response.body)?;
        let answer = self.solver.solve(&challenge)?;
        tracing::debug!("solved {}-byte challenge", challenge.len());

        Ok(ChallengeIssued {
            constants: state.constants,
            anon_user_id: state.anon_user_id,
            answer,
        })
    }

    /// ChallengeIssued → Ready (step 2): submit the answer and derive signing material.
    pub async fn verify(
        &self,
        session: &mut Session,
        state: ChallengeIssued,
    ) -> GrokResult<SigningContext> {
        let body = serde_json::json!([{
            "anonUserId": state.anon_user_id,
            "challenge": state.answer.challenge,
            "signature": state.answer.signature,
        }]);
        let response = self
            .post_action(
                session,
                &state.constants,
                &state.constants.action_ids.verify,
                RequestBody::Text(body.to_string()),
                Phase::Verify,
            )
            .await?;
        let text = success_text(response, Phase::Verify)?;

        let material = self
            .intel
            .signing_material(session, &text, &state.constants.transform_script_id)
            .await?;

        let constants = state.constants;
        Ok(SigningContext {
            cookies: session.cookies.clone(),
            action_ids: constants.action_ids,
            transform_script_id: constants.transform_script_id,
            baggage: constants.baggage,
            trace_seed: constants.trace_seed,
            verification_token: material.verification_token,
            anim_variant: material.anim_variant,
            svg_path: material.svg_path,
            numbers: material.numbers,
            numbers_url: material.script_url,
            numbers_cached: material.from_cache,
            anon_user_id: state.anon_user_id,
            public_key: self.solver.public_key(),
            private_key: self.solver.export_private_key(),
        })
    }

    async fn post_action(
        &self,
        session: &mut Session,
        constants: &BootstrapConstants,
        action_id: &str,
        body: RequestBody,
        phase: Phase,
    ) -> GrokResult<HttpResponse> {
        let template = match body {
            RequestBody::Multipart(_) => self.config.headers.action.without("content-type"),
            _ => self.config.headers.action.clone(),
        };
        let headers = template.render(&[
            ("baggage", constants.baggage.clone()),
            ("next-action", action_id.to_string()),
            ("sentry-trace", sentry_trace(&constants.trace_seed)),
            ("cookie", session.cookies.header_value()),
        ]);

        let request = HttpRequest::post(self.config.endpoint(LANDING_PATH), body)
            .with_headers(headers)
            .with_timeout(self.config.timeout);

        session
            .execute(request)
            .await
            .map_err(|e| GrokError::network(phase, e.to_string()))
    }
}

/// `sentry-trace` value for one request: seed, fresh span id, unsampled.
pub fn sentry_trace(seed: &str) -> String {
    let span = Uuid::new_v4().simple().to_string();
    format!("{seed}-{}-0", &span[..16])
}

/// The challenge bytes embedded in a step 1 response.
pub fn extract_challenge(body: &[u8]) -> GrokResult<Vec<u8>> {
    let start = find_bytes(body, CHALLENGE_START)
        .map(|i| i + CHALLENGE_START.len())
        .ok_or_else(|| GrokError::parsing(Phase::Challenge, "challenge start marker missing"))?;
    let len = find_bytes(&body[start..], CHALLENGE_END)
        .ok_or_else(|| GrokError::parsing(Phase::Challenge, "challenge end marker missing"))?;

    if len == 0 {
        return Err(GrokError::parsing(Phase::Challenge, "empty challenge"));
    }
    Ok(body[start..start + len].to_vec())
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn status_error(response: &HttpResponse, phase: Phase) -> GrokError {
    GrokError::network(phase, format!("unexpected status {}", response.status))
}

fn success_text(response: HttpResponse, phase: Phase) -> GrokResult<String> {
    if !response.is_success() {
        return Err(status_error(&response, phase));
    }
    Ok(response.text())
}
