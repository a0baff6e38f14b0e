// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Public client: one logical conversation per instance.
//!
//! A `Client` owns its transport session and keypair, so it must not be
//! shared between concurrent turns; `send_message` and `stream_message`
//! take `&mut self`. The script intelligence cache is the only shared part.

use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::bootstrap::BootstrapProtocol;
use crate::config::ClientConfig;
use crate::conversation::{reply_frames, ConversationTransport, ReplyAccumulator, SendOutcome};
use crate::error::{GrokError, GrokResult, Phase};
use crate::intelligence::{ScriptIntelligenceExtractor, SiteIntelligence, SiteIntelligenceCache};
use crate::signature::{RequestSigner, StatsigSigner};
use crate::solver::{ChallengeScheme, ChallengeSolver, Secp256k1Scheme};
use crate::transport::{HttpTransport, Session, Transport};
use crate::types::{
    ChatResult, ContinuationToken, ConversationMessage, ConversationTarget, SigningContext,
    StreamFrame,
};

/// Client for one conversation at a time.
pub struct Client {
    config: ClientConfig,
    session: Session,
    intel: Arc<dyn SiteIntelligence>,
    scheme: Arc<dyn ChallengeScheme>,
    solver: Box<dyn ChallengeSolver>,
    signer: Arc<dyn RequestSigner>,
}

impl Client {
    /// A client for `model`, configured from the environment.
    pub fn new(model: &str, proxy: Option<&str>) -> GrokResult<Self> {
        Self::from_config(ClientConfig::resolve(model, proxy))
    }

    /// A client over the `reqwest` transport with the configured cache.
    pub fn from_config(config: ClientConfig) -> GrokResult<Self> {
        let transport = HttpTransport::new(config.proxy.as_deref(), config.timeout)
            .map_err(|e| GrokError::network(Phase::Load, format!("cannot build transport: {e}")))?;
        let cache = Arc::new(SiteIntelligenceCache::for_dir(config.cache_dir.as_deref()));
        Ok(Self::with_transport(config, Arc::new(transport), cache))
    }

    /// A client over any transport, sharing `cache` with other clients.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<SiteIntelligenceCache>,
    ) -> Self {
        let intel = Arc::new(ScriptIntelligenceExtractor::new(&config, cache));
        let scheme: Arc<dyn ChallengeScheme> = Arc::new(Secp256k1Scheme);
        Self {
            config,
            session: Session::new(transport),
            intel,
            solver: scheme.generate(),
            scheme,
            signer: Arc::new(StatsigSigner::new()),
        }
    }

    pub fn with_signer(mut self, signer: impl RequestSigner + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    /// Swap the challenge scheme; a new keypair is generated.
    pub fn with_scheme(mut self, scheme: impl ChallengeScheme + 'static) -> Self {
        self.solver = scheme.generate();
        self.scheme = Arc::new(scheme);
        self
    }

    pub fn with_intelligence(mut self, intel: Arc<dyn SiteIntelligence>) -> Self {
        self.intel = intel;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Public key currently registered by this client.
    pub fn public_key(&self) -> Vec<u8> {
        self.solver.public_key()
    }

    /// Send a message and wait for the whole reply.
    ///
    /// An anti-bot rejection is retried on a fresh session and keypair as a
    /// new conversation, up to `config.retry.max_retries` times.
    pub async fn send_message(
        &mut self,
        text: &str,
        continuation: Option<&ContinuationToken>,
    ) -> GrokResult<ChatResult> {
        let mut message = self.message(text, continuation)?;
        let mut resume = continuation.cloned();
        let mut attempt: u32 = 0;

        loop {
            let ctx = self.bootstrap(resume.as_ref()).await?;
            let outcome = {
                let transport = ConversationTransport::new(&self.config, self.signer.as_ref());
                transport.send(&mut self.session, &ctx, &message).await
            };

            match self.note_failure(outcome, &ctx)? {
                SendOutcome::Completed(result) => {
                    tracing::info!(
                        "reply received ({} tokens, attempt {})",
                        result.stream_response.len(),
                        attempt + 1
                    );
                    return Ok(result);
                }
                SendOutcome::Rejected if attempt >= self.config.retry.max_retries => {
                    return Err(GrokError::auth(
                        Phase::Conversation,
                        format!("rejected by anti-bot rules after {} attempts", attempt + 1),
                    ));
                }
                SendOutcome::Rejected => {
                    attempt += 1;
                    tracing::info!(
                        "anti-bot rejection, retrying on a fresh session ({attempt}/{})",
                        self.config.retry.max_retries
                    );
                    if let Some(backoff) = self.config.retry.backoff {
                        tokio::time::sleep(backoff).await;
                    }
                    self.reset();
                    resume = None;
                    message.target = ConversationTarget::New;
                }
            }
        }
    }

    /// Send a message and read the reply as it arrives.
    ///
    /// Nothing happens until the stream is first polled. Dropping it early
    /// closes the response and yields no continuation token. Rejections are
    /// not retried; they arrive as [`StreamFrame::Error`].
    pub fn stream_message<'a>(
        &'a mut self,
        text: &str,
        continuation: Option<&ContinuationToken>,
    ) -> impl Stream<Item = StreamFrame> + Send + 'a {
        let text = text.to_string();
        let continuation = continuation.cloned();

        async_stream::stream! {
            let message = match self.message(&text, continuation.as_ref()) {
                Ok(message) => message,
                Err(e) => {
                    yield StreamFrame::Error(e);
                    return;
                }
            };
            let ctx = match self.bootstrap(continuation.as_ref()).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    yield StreamFrame::Error(e);
                    return;
                }
            };

            let opened = {
                let transport = ConversationTransport::new(&self.config, self.signer.as_ref());
                transport.open(&mut self.session, &ctx, &message).await
            };
            let response = match self.note_failure(opened, &ctx) {
                Ok(response) => response,
                Err(e) => {
                    yield StreamFrame::Error(e);
                    return;
                }
            };

            let frames = reply_frames(
                response,
                ReplyAccumulator::new(&message.target),
                ctx,
                self.session.cookies.clone(),
            );
            futures::pin_mut!(frames);
            while let Some(frame) = frames.next().await {
                yield frame;
            }
        }
    }

    fn message(
        &self,
        text: &str,
        continuation: Option<&ContinuationToken>,
    ) -> GrokResult<ConversationMessage> {
        let message = ConversationMessage::new(text, self.config.model.clone());
        match continuation {
            Some(token) => message.continuing(token),
            None => Ok(message),
        }
    }

    async fn bootstrap(
        &mut self,
        resume: Option<&ContinuationToken>,
    ) -> GrokResult<SigningContext> {
        if let Some(token) = resume {
            self.solver = self.scheme.restore(&token.private_key)?;
        }
        let protocol = BootstrapProtocol::new(&self.config, self.intel.as_ref(), self.solver.as_ref());
        protocol.run(&mut self.session, resume).await
    }

    /// Drop a cached numeric table that produced an unusable signature.
    fn note_failure<T>(&self, outcome: GrokResult<T>, ctx: &SigningContext) -> GrokResult<T> {
        if let Err(e) = &outcome {
            if e.is_parsing() && e.phase() == Phase::Signing && ctx.numbers_cached {
                self.intel.invalidate_numbers(&ctx.numbers_url);
            }
        }
        outcome
    }

    /// Fresh transport, empty cookie jar, new keypair.
    fn reset(&mut self) {
        self.session = self.session.renewed();
        self.solver = self.scheme.generate();
    }
}
