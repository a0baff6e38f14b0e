// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Site intelligence cache: script URL → numeric table and bundle
//! fingerprint → action set.
//!
//! Entries are read-mostly and shared across clients. Memory is the source of
//! truth for lookups; when a directory is configured every write is merged
//! into the on-disk file (re-read, merge, write temp, rename) so concurrent
//! processes appending different keys do not lose each other's entries.
//! Persistence failures are logged and never fail a turn.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

const NUMERIC_TABLES_FILE: &str = "numeric_tables.json";
const ACTION_SETS_FILE: &str = "action_sets.json";

/// Server actions and transform script discovered from one bundle set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    /// Path of the bundle the action ids came from.
    pub fingerprint: String,
    #[serde(rename = "actions")]
    pub action_ids: Vec<String>,
    pub transform_script_id: String,
}

/// A single cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    NumericTable {
        script_url: String,
        numbers: Vec<usize>,
    },
    ActionSet(ActionSet),
}

/// Process-wide cache of extracted script constants.
pub struct SiteIntelligenceCache {
    dir: Option<PathBuf>,
    numeric_tables: DashMap<String, Vec<usize>>,
    action_sets: DashMap<String, ActionSet>,
    /// Serializes file rewrites within the process.
    write_lock: Mutex<()>,
}

impl SiteIntelligenceCache {
    /// A cache that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            numeric_tables: DashMap::new(),
            action_sets: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a cache persisted in `dir`. Missing files are a cold start.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let cache = Self {
            dir: Some(dir.clone()),
            ..Self::in_memory()
        };

        for (url, numbers) in read_numeric_tables(&dir.join(NUMERIC_TABLES_FILE)) {
            cache.numeric_tables.insert(url, numbers);
        }
        for set in read_action_sets(&dir.join(ACTION_SETS_FILE)) {
            cache.action_sets.insert(set.fingerprint.clone(), set);
        }

        tracing::debug!(
            "site intelligence cache opened: {} numeric tables, {} action sets from {}",
            cache.numeric_tables.len(),
            cache.action_sets.len(),
            dir.display()
        );

        cache
    }

    /// Open at `dir` when given, else keep everything in memory.
    pub fn for_dir(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::open(dir),
            None => Self::in_memory(),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Cached numeric table for a transform script URL.
    pub fn numbers(&self, script_url: &str) -> Option<Vec<usize>> {
        self.numeric_tables.get(script_url).map(|e| e.value().clone())
    }

    /// The first cached action set whose fingerprint is among `script_paths`.
    pub fn action_set_for(&self, script_paths: &[String]) -> Option<ActionSet> {
        script_paths
            .iter()
            .find_map(|path| self.action_sets.get(path).map(|e| e.value().clone()))
    }

    /// Insert or overwrite an entry. Same-key races resolve to the last write.
    pub fn put(&self, entry: CacheEntry) {
        match entry {
            CacheEntry::NumericTable {
                script_url,
                numbers,
            } => {
                tracing::info!(
                    "caching {} transform numbers for {script_url}",
                    numbers.len()
                );
                self.numeric_tables.insert(script_url.clone(), numbers.clone());
                self.persist_numeric_table(&script_url, Some(&numbers));
            }
            CacheEntry::ActionSet(set) => {
                tracing::info!("caching action set for {}", set.fingerprint);
                self.action_sets.insert(set.fingerprint.clone(), set.clone());
                self.persist_action_set(&set.fingerprint, Some(&set));
            }
        }
    }

    /// Drop a numeric table that no longer produces valid signatures.
    pub fn invalidate_numbers(&self, script_url: &str) {
        if self.numeric_tables.remove(script_url).is_some() {
            tracing::info!("invalidated numeric table for {script_url}");
            self.persist_numeric_table(script_url, None);
        }
    }

    /// Drop an action set whose bundles no longer match the page.
    pub fn invalidate_action_set(&self, fingerprint: &str) {
        if self.action_sets.remove(fingerprint).is_some() {
            tracing::info!("invalidated action set {fingerprint}");
            self.persist_action_set(fingerprint, None);
        }
    }

    pub fn numeric_table_count(&self) -> usize {
        self.numeric_tables.len()
    }

    pub fn action_set_count(&self) -> usize {
        self.action_sets.len()
    }

    // ── Persistence ──

    fn persist_numeric_table(&self, script_url: &str, numbers: Option<&Vec<usize>>) {
        let Some(dir) = &self.dir else { return };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = dir.join(NUMERIC_TABLES_FILE);

        let mut on_disk = read_numeric_tables(&path);
        match numbers {
            Some(numbers) => {
                on_disk.insert(script_url.to_string(), numbers.clone());
            }
            None => {
                on_disk.remove(script_url);
            }
        }

        if let Err(e) = write_json(&path, &on_disk) {
            tracing::warn!("failed to persist {}: {e}", path.display());
        }
    }

    fn persist_action_set(&self, fingerprint: &str, set: Option<&ActionSet>) {
        let Some(dir) = &self.dir else { return };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = dir.join(ACTION_SETS_FILE);

        let mut on_disk = read_action_sets(&path);
        on_disk.retain(|s| s.fingerprint != fingerprint);
        if let Some(set) = set {
            on_disk.push(set.clone());
        }

        if let Err(e) = write_json(&path, &on_disk) {
            tracing::warn!("failed to persist {}: {e}", path.display());
        }
    }
}

impl Default for SiteIntelligenceCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn read_numeric_tables(path: &Path) -> BTreeMap<String, Vec<usize>> {
    read_json(path).unwrap_or_default()
}

fn read_action_sets(path: &Path) -> Vec<ActionSet> {
    read_json(path).unwrap_or_default()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("cannot read {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("ignoring unreadable cache file {}: {e}", path.display());
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let tmp = path.with_extension(format!("tmp{}", std::process::id()));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}
