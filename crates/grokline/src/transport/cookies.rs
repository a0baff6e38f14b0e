// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal cookie jar owned by the session so it can be exported.

use std::collections::BTreeMap;

use cookie::Cookie;
use serde::{Deserialize, Serialize};

/// Name → value cookies for a single origin.
///
/// Attributes (`Path`, `Expires`, ...) are ignored; the service only ever sets
/// cookies for its own origin and the client never outlives them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar(BTreeMap<String, String>);

impl CookieJar {
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Merge another jar, its values winning.
    pub fn extend(&mut self, other: &CookieJar) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Absorb raw `set-cookie` header values. Unparseable headers are skipped.
    pub fn absorb<'a>(&mut self, set_cookies: impl IntoIterator<Item = &'a str>) {
        for raw in set_cookies {
            match Cookie::parse(raw) {
                Ok(cookie) => {
                    self.0
                        .insert(cookie.name().to_string(), cookie.value().to_string());
                }
                Err(e) => tracing::debug!("ignoring set-cookie {raw:?}: {e}"),
            }
        }
    }

    /// Value for a `cookie` request header.
    pub fn header_value(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}
