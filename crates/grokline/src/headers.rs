// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ordered header templates, one per request phase.
//!
//! The service fingerprints header order, so every request is built from a
//! template: fixed values and empty placeholders in browser order. Rendering
//! fills placeholders by name, drops the ones left empty, and appends any
//! extra field after the template fields.

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
const SEC_CH_UA: &str = r#""Chromium";v="136", "Google Chrome";v="136", "Not.A/Brand";v="99""#;
const ACCEPT_ENCODING: &str = "gzip, deflate, br, zstd";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Router state the landing page hands to its server actions.
const ROUTER_STATE_TREE: &str = "%5B%22%22%2C%7B%22children%22%3A%5B%22c%22%2C%7B%22children%22%3A%5B%5B%22slug%22%2C%22%22%2C%22oc%22%5D%2C%7B%22children%22%3A%5B%22__PAGE__%22%2C%7B%7D%2Cnull%2Cnull%5D%7D%2Cnull%2Cnull%5D%7D%2Cnull%2Cnull%5D%7D%2Cnull%2Cnull%2Ctrue%5D";

/// An ordered list of header names with default values.
///
/// An empty default marks a placeholder that must be filled at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTemplate {
    entries: Vec<(String, String)>,
}

impl HeaderTemplate {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
        }
    }

    /// Header names in send order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// A copy of the template without `name`.
    pub fn without(&self, name: &str) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case(name))
                .cloned()
                .collect(),
        }
    }

    /// Render the template with per-call fields.
    pub fn render(&self, fields: &[(&str, String)]) -> Vec<(String, String)> {
        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let mut out: Vec<(String, String)> = self
            .entries
            .iter()
            .filter_map(|(name, default)| {
                let value = lookup(name).unwrap_or_else(|| default.clone());
                (!value.is_empty()).then(|| (name.clone(), value))
            })
            .collect();

        for (name, value) in fields {
            let known = self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name));
            if !known && !value.is_empty() {
                out.push((name.to_ascii_lowercase(), value.clone()));
            }
        }

        out
    }
}

/// Templates for every request phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTemplates {
    /// Landing page navigation.
    pub load: HeaderTemplate,
    /// The three bootstrap server-action POSTs.
    pub action: HeaderTemplate,
    /// Conversation POSTs.
    pub conversation: HeaderTemplate,
    /// Script bundle fetches.
    pub script: HeaderTemplate,
}

impl HeaderTemplates {
    /// Chrome 136 on Windows, as seen by the service at `base_url`.
    pub fn chrome(base_url: &str) -> Self {
        let origin = base_url.trim_end_matches('/');
        let referer_c = format!("{origin}/c");
        let referer_root = format!("{origin}/");

        let load = HeaderTemplate::new(&[
            ("upgrade-insecure-requests", "1"),
            ("user-agent", USER_AGENT),
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
            ),
            ("sec-fetch-site", "none"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-user", "?1"),
            ("sec-fetch-dest", "document"),
            ("sec-ch-ua", SEC_CH_UA),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("accept-encoding", ACCEPT_ENCODING),
            ("accept-language", ACCEPT_LANGUAGE),
            ("cookie", ""),
            ("priority", "u=0, i"),
        ]);

        let action = HeaderTemplate::new(&[
            ("accept", "text/x-component"),
            ("accept-encoding", ACCEPT_ENCODING),
            ("accept-language", ACCEPT_LANGUAGE),
            ("baggage", ""),
            ("content-type", "text/plain;charset=UTF-8"),
            ("next-action", ""),
            ("next-router-state-tree", ROUTER_STATE_TREE),
            ("origin", origin),
            ("priority", "u=1, i"),
            ("referer", &referer_c),
            ("sec-ch-ua", SEC_CH_UA),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
            ("sentry-trace", ""),
            ("user-agent", USER_AGENT),
            ("cookie", ""),
        ]);

        let conversation = HeaderTemplate::new(&[
            ("accept", "*/*"),
            ("accept-encoding", ACCEPT_ENCODING),
            ("accept-language", ACCEPT_LANGUAGE),
            ("baggage", ""),
            ("content-type", "application/json"),
            ("origin", origin),
            ("priority", "u=1, i"),
            ("referer", &referer_root),
            ("sec-ch-ua", SEC_CH_UA),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
            ("sentry-trace", ""),
            ("traceparent", ""),
            ("user-agent", USER_AGENT),
            ("x-statsig-id", ""),
            ("x-xai-request-id", ""),
            ("cookie", ""),
        ]);

        let script = HeaderTemplate::new(&[
            ("user-agent", USER_AGENT),
            ("accept", "*/*"),
            ("sec-ch-ua", SEC_CH_UA),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("sec-fetch-site", "same-origin"),
            ("sec-fetch-mode", "no-cors"),
            ("sec-fetch-dest", "script"),
            ("referer", &referer_c),
            ("accept-encoding", ACCEPT_ENCODING),
            ("accept-language", ACCEPT_LANGUAGE),
        ]);

        Self {
            load,
            action,
            conversation,
            script,
        }
    }
}
