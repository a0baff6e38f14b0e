// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Challenge solving.
//!
//! The bootstrap registers a public key in step 0 and answers the challenge
//! issued in step 1 with a signature from the matching private key. The
//! algorithm sits behind [`ChallengeScheme`] so it can be swapped if the
//! service's verifier changes; [`Secp256k1Scheme`] is the one it currently
//! expects.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;

use crate::error::{GrokError, GrokResult, Phase};

/// The step 2 answer, spread into the request body next to `anonUserId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolvedChallenge {
    /// Base64 of the challenge bytes as issued.
    pub challenge: String,
    /// Base64 of the signature bytes.
    pub signature: String,
}

/// A keypair able to answer challenges.
pub trait ChallengeSolver: Send + Sync {
    /// Public key bytes as uploaded in step 0.
    fn public_key(&self) -> Vec<u8>;

    /// Private key in the form stored in continuation tokens.
    fn export_private_key(&self) -> String;

    /// Sign a challenge.
    fn solve(&self, challenge: &[u8]) -> GrokResult<SolvedChallenge>;
}

/// A signature algorithm: key generation, restore, verification.
pub trait ChallengeScheme: Send + Sync {
    fn generate(&self) -> Box<dyn ChallengeSolver>;

    /// Rebuild a solver from [`ChallengeSolver::export_private_key`] output.
    fn restore(&self, exported: &str) -> GrokResult<Box<dyn ChallengeSolver>>;

    /// Check an answer against a public key.
    fn verify(&self, public_key: &[u8], challenge: &[u8], answer: &SolvedChallenge) -> bool;
}

/// ECDSA over secp256k1 with SHA-256, compressed public keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Scheme;

/// A secp256k1 keypair.
pub struct Secp256k1Solver {
    key: SigningKey,
}

impl Secp256k1Solver {
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_exported(exported: &str) -> GrokResult<Self> {
        let bytes = BASE64.decode(exported.trim()).map_err(|e| {
            GrokError::session(Phase::Continuation, format!("private key is not base64: {e}"))
        })?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| {
            GrokError::session(
                Phase::Continuation,
                format!("private key is not a secp256k1 scalar ({} bytes)", bytes.len()),
            )
        })?;
        Ok(Self { key })
    }
}

impl ChallengeSolver for Secp256k1Solver {
    fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    fn export_private_key(&self) -> String {
        BASE64.encode(self.key.to_bytes())
    }

    fn solve(&self, challenge: &[u8]) -> GrokResult<SolvedChallenge> {
        if challenge.is_empty() {
            return Err(GrokError::parsing(Phase::Challenge, "empty challenge"));
        }
        let signature: Signature = self.key.sign(challenge);
        Ok(SolvedChallenge {
            challenge: BASE64.encode(challenge),
            signature: BASE64.encode(signature.to_bytes()),
        })
    }
}

impl ChallengeScheme for Secp256k1Scheme {
    fn generate(&self) -> Box<dyn ChallengeSolver> {
        Box::new(Secp256k1Solver::random())
    }

    fn restore(&self, exported: &str) -> GrokResult<Box<dyn ChallengeSolver>> {
        Ok(Box::new(Secp256k1Solver::from_exported(exported)?))
    }

    fn verify(&self, public_key: &[u8], challenge: &[u8], answer: &SolvedChallenge) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let Ok(raw) = BASE64.decode(&answer.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&raw) else {
            return false;
        };
        BASE64.encode(challenge) == answer.challenge && key.verify(challenge, &signature).is_ok()
    }
}
