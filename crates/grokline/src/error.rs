// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the client.
//!
//! Every failure is one of four kinds and records the phase it came from,
//! so a caller can tell a drifted page format (`Parsing` during `Load`) from a
//! flaky proxy (`Network` during `Challenge`) without string matching.

use std::fmt;

/// Where in a turn an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Landing page fetch and meta scan.
    Load,
    /// Script bundle fetches and constant extraction.
    ScriptIntel,
    /// Bootstrap step 0 (public key upload).
    KeyExchange,
    /// Bootstrap step 1 (challenge issue and solve).
    Challenge,
    /// Bootstrap step 2 (verification material).
    Verify,
    /// Request signature computation.
    Signing,
    /// Buffered conversation call.
    Conversation,
    /// Streamed conversation call.
    Stream,
    /// Continuation token decoding and validation.
    Continuation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::ScriptIntel => "script-intel",
            Phase::KeyExchange => "key-exchange",
            Phase::Challenge => "challenge",
            Phase::Verify => "verify",
            Phase::Signing => "signing",
            Phase::Conversation => "conversation",
            Phase::Stream => "stream",
            Phase::Continuation => "continuation",
        };
        f.write_str(name)
    }
}

/// The four error kinds, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Parsing,
    Auth,
    Session,
}

/// All errors that can occur while bootstrapping or conversing.
#[derive(thiserror::Error, Debug, Clone)]
pub enum GrokError {
    /// Transport failure or non-success status.
    #[error("network error during {phase}: {message}")]
    Network { phase: Phase, message: String },

    /// An expected marker, pattern or field is missing; the page format drifted.
    #[error("parsing error during {phase}: {message}")]
    Parsing { phase: Phase, message: String },

    /// The service rejected automated access.
    #[error("auth error during {phase}: {message}")]
    Auth { phase: Phase, message: String },

    /// Continuation token is malformed or its session is gone.
    #[error("session error during {phase}: {message}")]
    Session { phase: Phase, message: String },
}

impl GrokError {
    pub fn network(phase: Phase, message: impl Into<String>) -> Self {
        GrokError::Network {
            phase,
            message: message.into(),
        }
    }

    pub fn parsing(phase: Phase, message: impl Into<String>) -> Self {
        GrokError::Parsing {
            phase,
            message: message.into(),
        }
    }

    pub fn auth(phase: Phase, message: impl Into<String>) -> Self {
        GrokError::Auth {
            phase,
            message: message.into(),
        }
    }

    pub fn session(phase: Phase, message: impl Into<String>) -> Self {
        GrokError::Session {
            phase,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GrokError::Network { .. } => ErrorKind::Network,
            GrokError::Parsing { .. } => ErrorKind::Parsing,
            GrokError::Auth { .. } => ErrorKind::Auth,
            GrokError::Session { .. } => ErrorKind::Session,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            GrokError::Network { phase, .. }
            | GrokError::Parsing { phase, .. }
            | GrokError::Auth { phase, .. }
            | GrokError::Session { phase, .. } => *phase,
        }
    }

    /// Whether the error means cached script intelligence may be stale.
    pub fn is_parsing(&self) -> bool {
        self.kind() == ErrorKind::Parsing
    }
}

/// Convenience result type.
pub type GrokResult<T> = Result<T, GrokError>;
