// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pattern scanning of the landing page, script bundles and the verification
//! response.
//!
//! Nothing here executes script. Every constant is found by a marker string
//! or a regex over bundle text, so a change upstream shows up as a
//! [`GrokError::Parsing`] rather than a wrong value. `scraper` documents are
//! `!Send`, so HTML is scanned in plain functions that return owned data
//! before anything is awaited.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use scraper::{Html, Selector};

use super::cache::{ActionSet, CacheEntry, SiteIntelligenceCache};
use super::{BootstrapConstants, SigningMaterial, SiteIntelligence};
use crate::config::ClientConfig;
use crate::error::{GrokError, GrokResult, Phase};
use crate::headers::HeaderTemplate;
use crate::transport::{HttpRequest, Session};
use crate::types::ActionIds;
use crate::util::between;

/// Prefix of the bundles worth scanning.
const CHUNK_PREFIX: &str = "/_next/static/chunks/";

/// Present only in the bundle that declares the bootstrap server actions.
const ACTION_BUNDLE_MARKER: &str = "anonPrivateKey";

/// Present only in the bundle that references the transform script.
const TRANSFORM_BUNDLE_MARKER: &str = "880932)";

const VERIFICATION_MARKER: &str = r#""name":"grok-site-verification","content":""#;

/// Transform scripts served from the CDN instead of `/_next/`.
const ONDEMAND_SCRIPT_ID: &str = "ondemand.s";
const ONDEMAND_BASE: &str = "https://abs.twimg.com/responsive-web/client-web/ondemand.s.";

/// Number of animation variants the page ships.
const ANIM_VARIANTS: u8 = 4;

/// What the landing page tells us before any bundle is fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandingScan {
    /// `<script src>` paths under the chunk prefix, in document order.
    pub script_paths: Vec<String>,
    pub baggage: Option<String>,
    /// `sentry-trace` meta content up to its first `-`.
    pub trace_seed: Option<String>,
}

/// Scan a landing page for chunk scripts and trace metadata.
pub fn scan_landing(html: &str) -> LandingScan {
    let document = Html::parse_document(html);
    let script_sel = Selector::parse("script[src]").expect("valid selector");
    let meta_sel = Selector::parse("meta[name][content]").expect("valid selector");

    let script_paths = document
        .select(&script_sel)
        .filter_map(|el| el.value().attr("src"))
        .filter(|src| src.starts_with(CHUNK_PREFIX))
        .map(str::to_string)
        .collect();

    let meta = |name: &str| {
        document
            .select(&meta_sel)
            .find(|el| el.value().attr("name") == Some(name))
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string)
    };

    let baggage = meta("baggage").filter(|b| !b.is_empty());
    let trace_seed = meta("sentry-trace")
        .and_then(|t| t.split('-').next().map(str::to_string))
        .filter(|t| !t.is_empty());

    LandingScan {
        script_paths,
        baggage,
        trace_seed,
    }
}

/// Server action ids declared in the action bundle, in declaration order.
pub fn extract_action_ids(bundle: &str) -> Vec<String> {
    let re = Regex::new(r#"createServerReference\)\("([a-f0-9]+)""#).expect("valid regex");
    re.captures_iter(bundle)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Static chunk path referenced just before the transform marker.
pub fn extract_transform_script_id(bundle: &str) -> Option<String> {
    let re = Regex::new(r#""(static/chunks/[^"]+\.js)"[^}]*?\(880932\)"#).expect("valid regex");
    re.captures(bundle)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// The base64 verification token embedded in the step 2 response.
pub fn extract_verification_token(body: &str) -> Option<String> {
    between(body, VERIFICATION_MARKER, "\"")
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Animation variant selected by a verification token. Undecodable or short
/// tokens select variant 0.
pub fn anim_variant(token: &str) -> u8 {
    base64::engine::general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| bytes.get(5).copied())
        .map(|b| b % ANIM_VARIANTS)
        .unwrap_or(0)
}

/// All SVG path literals (`M...`, at least 200 characters) in a body.
pub fn extract_svg_paths(body: &str) -> Vec<String> {
    let re = Regex::new(r#""d":"(M[^"]{200,})""#).expect("valid regex");
    re.captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Pick the path literal for `variant`, wrapping over the literals found.
pub fn select_svg_path(paths: &[String], variant: u8) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    paths
        .get(variant as usize % paths.len())
        .or_else(|| paths.first())
        .cloned()
}

/// Integers indexing the key in the transform script, in order.
pub fn extract_numbers(bundle: &str) -> Vec<usize> {
    let re = Regex::new(r"x\[(\d+)\]\s*,\s*16").expect("valid regex");
    re.captures_iter(bundle)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect()
}

/// Absolute URL of a transform script.
pub fn transform_script_url(
    base_url: &str,
    transform_script_id: &str,
    verification_body: &str,
) -> GrokResult<String> {
    if transform_script_id == ONDEMAND_SCRIPT_ID {
        let marker = format!("\"{ONDEMAND_SCRIPT_ID}\":\"");
        let hash = between(verification_body, &marker, "\"")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                GrokError::parsing(Phase::Verify, "no hash for the on-demand transform script")
            })?;
        return Ok(format!("{ONDEMAND_BASE}{hash}a.js"));
    }
    Ok(format!(
        "{}/_next/{}",
        base_url.trim_end_matches('/'),
        transform_script_id
    ))
}

/// [`SiteIntelligence`] backed by live bundle fetches and a shared cache.
pub struct ScriptIntelligenceExtractor {
    cache: Arc<SiteIntelligenceCache>,
    base_url: String,
    script_headers: HeaderTemplate,
    timeout: Duration,
}

impl ScriptIntelligenceExtractor {
    pub fn new(config: &ClientConfig, cache: Arc<SiteIntelligenceCache>) -> Self {
        Self {
            cache,
            base_url: config.base_url.clone(),
            script_headers: config.headers.script.clone(),
            timeout: config.timeout,
        }
    }

    pub fn cache(&self) -> &Arc<SiteIntelligenceCache> {
        &self.cache
    }

    /// GET a bundle. `Ok(None)` for a non-success status.
    async fn fetch_bundle(
        &self,
        session: &mut Session,
        url: &str,
        phase: Phase,
    ) -> GrokResult<Option<String>> {
        let request = HttpRequest::get(url)
            .with_headers(self.script_headers.render(&[]))
            .with_timeout(self.timeout);
        let response = session
            .execute(request)
            .await
            .map_err(|e| GrokError::network(phase, format!("fetching {url}: {e}")))?;

        if !response.is_success() {
            tracing::debug!("bundle {url} returned {}", response.status);
            return Ok(None);
        }
        Ok(Some(response.text()))
    }

    /// Fetch chunk bundles in order until both marker bundles are found.
    async fn scan_bundles(
        &self,
        session: &mut Session,
        script_paths: &[String],
    ) -> GrokResult<ActionSet> {
        let mut actions: Option<(String, Vec<String>)> = None;
        let mut transform_id: Option<String> = None;

        for path in script_paths {
            let url = format!("{}{}", self.base_url, path);
            let Some(bundle) = self.fetch_bundle(session, &url, Phase::ScriptIntel).await? else {
                continue;
            };

            if actions.is_none() && bundle.contains(ACTION_BUNDLE_MARKER) {
                tracing::debug!("action bundle: {path}");
                actions = Some((path.clone(), extract_action_ids(&bundle)));
            } else if transform_id.is_none() && bundle.contains(TRANSFORM_BUNDLE_MARKER) {
                tracing::debug!("transform reference bundle: {path}");
                transform_id = extract_transform_script_id(&bundle);
                if transform_id.is_none() {
                    return Err(GrokError::parsing(
                        Phase::ScriptIntel,
                        format!("no transform script id in {path}"),
                    ));
                }
            }

            if actions.is_some() && transform_id.is_some() {
                break;
            }
        }

        let (fingerprint, action_ids) = actions.ok_or_else(|| {
            GrokError::parsing(Phase::ScriptIntel, "no bundle declares the server actions")
        })?;
        let transform_script_id = transform_id.ok_or_else(|| {
            GrokError::parsing(Phase::ScriptIntel, "no bundle references the transform script")
        })?;

        ActionIds::from_slice(&action_ids, Phase::ScriptIntel)?;

        Ok(ActionSet {
            fingerprint,
            action_ids,
            transform_script_id,
        })
    }
}

#[async_trait]
impl SiteIntelligence for ScriptIntelligenceExtractor {
    async fn bootstrap_constants(
        &self,
        session: &mut Session,
        landing_html: &str,
    ) -> GrokResult<BootstrapConstants> {
        let scan = scan_landing(landing_html);
        if scan.script_paths.is_empty() {
            return Err(GrokError::parsing(
                Phase::Load,
                "landing page has no chunk scripts",
            ));
        }
        let baggage = scan
            .baggage
            .ok_or_else(|| GrokError::parsing(Phase::Load, "landing page has no baggage meta"))?;
        let trace_seed = scan.trace_seed.ok_or_else(|| {
            GrokError::parsing(Phase::Load, "landing page has no sentry-trace meta")
        })?;

        let (set, from_cache) = match self.cache.action_set_for(&scan.script_paths) {
            Some(set) => (set, true),
            None => {
                let set = self.scan_bundles(session, &scan.script_paths).await?;
                self.cache.put(CacheEntry::ActionSet(set.clone()));
                (set, false)
            }
        };

        let action_ids = match ActionIds::from_slice(&set.action_ids, Phase::ScriptIntel) {
            Ok(ids) => ids,
            Err(e) => {
                self.cache.invalidate_action_set(&set.fingerprint);
                return Err(e);
            }
        };

        tracing::debug!(
            "bootstrap constants ready (cached: {from_cache}, transform: {})",
            set.transform_script_id
        );

        Ok(BootstrapConstants {
            action_ids,
            transform_script_id: set.transform_script_id,
            fingerprint: set.fingerprint,
            baggage,
            trace_seed,
            from_cache,
        })
    }

    async fn signing_material(
        &self,
        session: &mut Session,
        verification_body: &str,
        transform_script_id: &str,
    ) -> GrokResult<SigningMaterial> {
        let verification_token = extract_verification_token(verification_body).ok_or_else(|| {
            GrokError::parsing(Phase::Verify, "verification token missing from response")
        })?;
        let variant = anim_variant(&verification_token);

        let svg_path = select_svg_path(&extract_svg_paths(verification_body), variant)
            .ok_or_else(|| GrokError::parsing(Phase::Verify, "no SVG path data in response"))?;

        let script_url =
            transform_script_url(&self.base_url, transform_script_id, verification_body)?;

        let (numbers, from_cache) = match self.cache.numbers(&script_url) {
            Some(numbers) if !numbers.is_empty() => (numbers, true),
            _ => {
                let bundle = self
                    .fetch_bundle(session, &script_url, Phase::Verify)
                    .await?
                    .ok_or_else(|| {
                        GrokError::network(
                            Phase::Verify,
                            format!("transform script {script_url} not available"),
                        )
                    })?;
                let numbers = extract_numbers(&bundle);
                if numbers.is_empty() {
                    return Err(GrokError::parsing(
                        Phase::Verify,
                        format!("no transform numbers in {script_url}"),
                    ));
                }
                self.cache.put(CacheEntry::NumericTable {
                    script_url: script_url.clone(),
                    numbers: numbers.clone(),
                });
                (numbers, false)
            }
        };

        Ok(SigningMaterial {
            verification_token,
            anim_variant: variant,
            svg_path,
            numbers,
            script_url,
            from_cache,
        })
    }

    fn invalidate_constants(&self, fingerprint: &str) {
        self.cache.invalidate_action_set(fingerprint);
    }

    fn invalidate_numbers(&self, script_url: &str) {
        self.cache.invalidate_numbers(script_url);
    }
}
