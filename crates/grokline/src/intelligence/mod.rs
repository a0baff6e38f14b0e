// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Script intelligence: constants the bootstrap and signer need, scanned out
//! of the service's landing page and script bundles.
//!
//! The bootstrap depends only on [`SiteIntelligence`]. How the constants are
//! found (marker strings, regexes, which bundle holds what) stays inside
//! [`extractor`].

pub mod cache;
pub mod extractor;

use async_trait::async_trait;

pub use cache::{ActionSet, CacheEntry, SiteIntelligenceCache};
pub use extractor::ScriptIntelligenceExtractor;

use crate::error::GrokResult;
use crate::transport::Session;
use crate::types::ActionIds;

/// Constants derived from the landing page and its bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConstants {
    pub action_ids: ActionIds,
    pub transform_script_id: String,
    /// Cache key of the action set (path of the bundle holding the actions).
    pub fingerprint: String,
    pub baggage: String,
    pub trace_seed: String,
    /// Whether the action set came from the cache rather than a fresh scan.
    pub from_cache: bool,
}

/// Per-session signing material derived from the verification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningMaterial {
    pub verification_token: String,
    pub anim_variant: u8,
    pub svg_path: String,
    pub numbers: Vec<usize>,
    /// URL the numeric table was read from (its cache key).
    pub script_url: String,
    pub from_cache: bool,
}

/// Source of bootstrap constants and signing material.
#[async_trait]
pub trait SiteIntelligence: Send + Sync {
    /// Resolve action ids, transform script id and trace metadata from a
    /// landing page body, fetching bundles through `session` when needed.
    async fn bootstrap_constants(
        &self,
        session: &mut Session,
        landing_html: &str,
    ) -> GrokResult<BootstrapConstants>;

    /// Resolve signing material from the step 2 response body.
    async fn signing_material(
        &self,
        session: &mut Session,
        verification_body: &str,
        transform_script_id: &str,
    ) -> GrokResult<SigningMaterial>;

    /// Forget a cached action set.
    fn invalidate_constants(&self, fingerprint: &str);

    /// Forget a cached numeric table.
    fn invalidate_numbers(&self, script_url: &str);
}
