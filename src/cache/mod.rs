//! Revalidation cache for incremental regeneration
//!
//! Every generated route is recorded with the time it was written and how
//! long it stays fresh. A route is stale once that interval has elapsed,
//! and regenerating it refreshes the entry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cache directory, relative to the site directory
pub const CACHE_DIR: &str = ".spacetraveling-cache";

/// Cache file name
const CACHE_FILE: &str = "db.json";

/// A generated route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Output path relative to the public dir
    pub output_path: String,
    /// Unix timestamp (seconds) of the last generation
    pub generated_at: u64,
    /// Seconds the page stays fresh
    pub revalidate_after: u64,
}

impl RouteEntry {
    pub fn is_stale(&self, now: u64) -> bool {
        now >= self.generated_at.saturating_add(self.revalidate_after)
    }
}

/// Cache database of generated routes, keyed by URL path (`/`, `/post/x/`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RevalidationCache {
    /// Version of the cache format
    pub version: u32,
    pub routes: BTreeMap<String, RouteEntry>,
}

impl RevalidationCache {
    /// Current cache format version
    const VERSION: u32 = 1;

    /// Create a new cache with version set
    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            ..Default::default()
        }
    }

    /// Load cache from disk, or create a new empty cache
    pub fn load(base_dir: &Path) -> Self {
        let cache_path = base_dir.join(CACHE_DIR).join(CACHE_FILE);
        if let Ok(content) = fs::read_to_string(&cache_path) {
            match serde_json::from_str::<RevalidationCache>(&content) {
                Ok(cache) if cache.version == Self::VERSION => return cache,
                Ok(_) => tracing::info!("Cache version mismatch, rebuilding cache"),
                Err(e) => tracing::warn!("Ignoring unreadable cache {:?}: {}", cache_path, e),
            }
        }
        Self::new()
    }

    /// Save cache to disk
    pub fn save(&self, base_dir: &Path) -> Result<()> {
        let cache_dir = base_dir.join(CACHE_DIR);
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create {:?}", cache_dir))?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(cache_dir.join(CACHE_FILE), content)?;
        Ok(())
    }

    pub fn get(&self, route: &str) -> Option<&RouteEntry> {
        self.routes.get(route)
    }

    /// Unknown routes are stale
    pub fn is_stale(&self, route: &str, now: u64) -> bool {
        self.routes.get(route).map_or(true, |entry| entry.is_stale(now))
    }

    /// Record a freshly generated route
    pub fn record(&mut self, route: &str, output_path: &str, now: u64, revalidate: Duration) {
        self.routes.insert(
            route.to_string(),
            RouteEntry {
                output_path: output_path.to_string(),
                generated_at: now,
                revalidate_after: revalidate.as_secs(),
            },
        );
    }

    pub fn remove(&mut self, route: &str) -> Option<RouteEntry> {
        self.routes.remove(route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Cache key of a route relative to the site root (`post/x/` -> `/post/x/`)
pub fn route_key(route: &str) -> String {
    format!("/{}", route.trim_start_matches('/'))
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_route_is_stale() {
        let cache = RevalidationCache::new();
        assert!(cache.is_stale("/", 0));
    }

    #[test]
    fn test_staleness_window() {
        let mut cache = RevalidationCache::new();
        cache.record("/post/a/", "post/a/index.html", 1000, Duration::from_secs(3600));
        assert!(!cache.is_stale("/post/a/", 1000));
        assert!(!cache.is_stale("/post/a/", 4599));
        assert!(cache.is_stale("/post/a/", 4600));

        cache.record("/post/a/", "post/a/index.html", 4600, Duration::from_secs(3600));
        assert!(!cache.is_stale("/post/a/", 4600));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut cache = RevalidationCache::new();
        cache.record("/", "index.html", 10, Duration::from_secs(1800));
        cache.save(dir.path()).unwrap();

        let loaded = RevalidationCache::load(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("/").unwrap().revalidate_after, 1800);
    }

    #[test]
    fn test_version_mismatch_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(CACHE_DIR)).unwrap();
        fs::write(
            dir.path().join(CACHE_DIR).join(CACHE_FILE),
            r#"{"version": 0, "routes": {"/": {"output_path": "index.html", "generated_at": 1, "revalidate_after": 1}}}"#,
        )
        .unwrap();

        let loaded = RevalidationCache::load(dir.path());
        assert!(loaded.is_empty());
        assert_eq!(loaded.version, RevalidationCache::VERSION);
    }

    #[test]
    fn test_route_key() {
        assert_eq!(route_key(""), "/");
        assert_eq!(route_key("page/2/"), "/page/2/");
        assert_eq!(route_key("/post/a/"), "/post/a/");
    }
}
