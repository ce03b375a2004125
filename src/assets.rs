//! Asset access boundary.
//!
//! The scene composition layer hands us logical asset paths; an
//! [`AssetResolver`] turns those into fetchable URLs and raw bytes. The
//! in-memory implementation backs tests and embedded use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

/// External asset system contract (out of scope for this crate).
pub trait AssetResolver: Send + Sync {
    /// Turn a scene-graph-relative asset reference into a fetchable URL.
    ///
    /// `from` is the identifier of the referencing asset (used for relative
    /// resolution). `None` means the logical path does not resolve to
    /// anything fetchable, e.g. a probe for an absent UDIM tile.
    fn resolve_url(&self, logical_path: &str, from: Option<&str>) -> Option<String>;

    /// Fetch raw bytes for a resolved URL.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Thread-safe, clone-friendly in-memory asset table keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(url.into(), bytes);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner
            .lock()
            .ok()
            .is_some_and(|map| map.contains_key(url))
    }
}

impl AssetResolver for MemoryAssets {
    fn resolve_url(&self, logical_path: &str, from: Option<&str>) -> Option<String> {
        if self.contains(logical_path) {
            return Some(logical_path.to_string());
        }
        // Relative to the referencing asset's directory.
        if let Some(from) = from {
            let joined = join_relative(from, logical_path);
            if self.contains(&joined) {
                return Some(joined);
            }
        }
        None
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(url).cloned())
            .ok_or_else(|| anyhow!("asset not found: {url}"))
    }
}

/// Resolve `relative` against the directory of `base`.
pub fn join_relative(base: &str, relative: &str) -> String {
    if relative.starts_with('/') || relative.contains("://") {
        return relative.to_string();
    }
    let relative = relative.strip_prefix("./").unwrap_or(relative);
    match base.rfind('/') {
        Some(idx) => format!("{}/{}", &base[..idx], relative),
        None => relative.to_string(),
    }
}
