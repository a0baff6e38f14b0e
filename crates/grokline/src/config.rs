// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client configuration: explicit value, then environment, then default.

use std::path::PathBuf;
use std::time::Duration;

use crate::headers::HeaderTemplates;

/// Service origin used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://grok.com";

/// Model used when the caller does not name one.
pub const DEFAULT_MODEL: &str = "grok-3-auto";

const ENV_BASE_URL: &str = "GROKLINE_BASE_URL";
const ENV_PROXY: &str = "GROKLINE_PROXY";
const ENV_CACHE_DIR: &str = "GROKLINE_CACHE_DIR";
const ENV_TIMEOUT: &str = "GROKLINE_TIMEOUT_SECS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONVERSATION_TIMEOUT: Duration = Duration::from_secs(9999);

/// Known models and their request modes: `(name, modelMode, request mode)`.
const MODEL_TABLE: &[(&str, &str, &str)] = &[
    ("grok-3-auto", "MODEL_MODE_AUTO", "auto"),
    ("grok-3-fast", "MODEL_MODE_FAST", "fast"),
    ("grok-4", "MODEL_MODE_EXPERT", "expert"),
    (
        "grok-4-mini-thinking-tahoe",
        "MODEL_MODE_GROK_4_MINI_THINKING",
        "grok-4-mini-thinking",
    ),
];

/// A model selection as it appears in conversation payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Name sent as `modelName`.
    pub name: String,
    /// Value sent as `modelMode`.
    pub mode: String,
    /// Short mode sent in continuation request metadata.
    pub request_mode: String,
}

impl ModelSpec {
    /// Resolve a model name. Unknown names keep the name but use auto modes.
    pub fn resolve(name: &str) -> Self {
        let (mode, request_mode) = MODEL_TABLE
            .iter()
            .find(|(known, _, _)| *known == name)
            .map(|(_, mode, request_mode)| (*mode, *request_mode))
            .unwrap_or(("MODEL_MODE_AUTO", "auto"));

        Self {
            name: name.to_string(),
            mode: mode.to_string(),
            request_mode: request_mode.to_string(),
        }
    }

    /// Whether requests for this model ask for reasoning output.
    pub fn is_reasoning(&self) -> bool {
        self.mode.contains("THINKING")
    }

    /// All model names with a dedicated mode.
    pub fn known_names() -> Vec<&'static str> {
        MODEL_TABLE.iter().map(|(name, _, _)| *name).collect()
    }
}

/// Bounded retry on anti-bot rejection of a buffered send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fresh-session retries after the first attempt.
    pub max_retries: u32,
    /// Pause before each retry.
    pub backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: None,
        }
    }
}

/// Everything a [`crate::Client`] needs besides its transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service origin without trailing slash.
    pub base_url: String,
    pub model: ModelSpec,
    /// Proxy URL applied to every request (`http://`, `https://`, `socks5://`).
    pub proxy: Option<String>,
    /// Timeout for landing page, bootstrap and bundle requests.
    pub timeout: Duration,
    /// Timeout for conversation requests (replies can take minutes).
    pub conversation_timeout: Duration,
    /// Where script intelligence is persisted; `None` keeps it in memory.
    pub cache_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub headers: HeaderTemplates,
}

impl ClientConfig {
    /// Resolve a configuration for `model`, reading overrides from the environment.
    pub fn resolve(model: &str, proxy: Option<&str>) -> Self {
        let base_url = resolve_base_url(None);
        let timeout = std::env::var(ENV_TIMEOUT)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        Self {
            headers: HeaderTemplates::chrome(&base_url),
            base_url,
            model: ModelSpec::resolve(model),
            proxy: resolve_proxy(proxy),
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
            conversation_timeout: timeout.unwrap_or(DEFAULT_CONVERSATION_TIMEOUT),
            cache_dir: Some(resolve_cache_dir(None)),
            retry: RetryPolicy::default(),
        }
    }

    /// A configuration that never touches the environment or the filesystem.
    pub fn detached(base_url: &str, model: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            headers: HeaderTemplates::chrome(&base_url),
            base_url,
            model: ModelSpec::resolve(model),
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
            conversation_timeout: DEFAULT_CONVERSATION_TIMEOUT,
            cache_dir: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_headers(mut self, headers: HeaderTemplates) -> Self {
        self.headers = headers;
        self
    }

    /// Absolute URL for a path on the service origin.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Resolve the service origin. Invalid values fall back to the default.
pub fn resolve_base_url(explicit: Option<&str>) -> String {
    let candidate = explicit
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_BASE_URL).ok());

    match candidate {
        Some(raw) if url::Url::parse(&raw).is_ok() => raw.trim_end_matches('/').to_string(),
        Some(raw) => {
            tracing::warn!("ignoring invalid base url {raw:?}, using {DEFAULT_BASE_URL}");
            DEFAULT_BASE_URL.to_string()
        }
        None => DEFAULT_BASE_URL.to_string(),
    }
}

fn resolve_proxy(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_PROXY).ok())
        .filter(|p| !p.trim().is_empty())
}

/// Resolve the script intelligence cache directory.
pub fn resolve_cache_dir(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(ENV_CACHE_DIR) {
        return PathBuf::from(env_path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".grokline")
        .join("mappings")
}
