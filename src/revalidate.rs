//! Read-view cache and the invalidation signal fired after writes.
//!
//! Views are keyed by path, following the page layout of the site:
//! `/` holds aggregate views (latest feed, popular pages, all walls),
//! `/{owner}` a wall and `/{owner}/{thread}` a thread on it.
//! Revalidating a path drops it and everything nested under it.
//!
//! Every eviction bumps a generation counter. A view loaded before an eviction is
//! refused by [`ViewCache::put_if_current`], so a slow read cannot resurrect it.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ViewKey {
    path: String,
    query: String,
}

#[derive(Debug, Clone)]
struct CachedView {
    body: serde_json::Value,
    stored_at: Instant,
}

/// TTL-bounded cache of rendered JSON views.
#[derive(Debug, Clone)]
pub struct ViewCache {
    entries: Arc<DashMap<ViewKey, CachedView>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
    max_entries: usize,
}

impl ViewCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str, query: &str) -> Option<serde_json::Value> {
        let key = ViewKey {
            path: path.to_string(),
            query: query.to_string(),
        };
        let fresh = {
            let entry = self.entries.get(&key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.body.clone())
        };
        if fresh.is_none() {
            self.entries.remove(&key);
        }
        fresh
    }

    pub fn put(&self, path: &str, query: &str, body: serde_json::Value) {
        if self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries.insert(
            ViewKey {
                path: path.to_string(),
                query: query.to_string(),
            },
            CachedView {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of evictions so far. Take it before loading a view that will be stored.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores a view loaded at `generation` unless an eviction happened since.
    /// Returns whether the view was kept.
    pub fn put_if_current(
        &self,
        path: &str,
        query: &str,
        body: serde_json::Value,
        generation: u64,
    ) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.put(path, query, body);
        // An eviction may have slipped in between the check and the insert.
        if self.generation() != generation {
            self.entries.remove(&ViewKey {
                path: path.to_string(),
                query: query.to_string(),
            });
            return false;
        }
        true
    }

    /// Drops `path` and every view nested under it. Returns how many were dropped.
    pub fn evict(&self, path: &str) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries.retain(|key, _| !is_nested(&key.path, path));
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, view| view.stored_at.elapsed() < ttl);
        if self.entries.len() < self.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

fn is_nested(candidate: &str, path: &str) -> bool {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return true;
    }
    candidate == path
        || candidate
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// A view went stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleView {
    pub path: String,
}

/// Marks views stale after a write and tells subscribers about it.
///
/// Fire-and-forget: revalidation never blocks and never fails the write that caused it.
#[derive(Debug, Clone)]
pub struct Revalidator {
    cache: ViewCache,
    notices: broadcast::Sender<StaleView>,
}

impl Revalidator {
    pub fn new(cache: ViewCache) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self { cache, notices }
    }

    pub fn cache(&self) -> &ViewCache {
        &self.cache
    }

    /// Stream of stale-view notices for push consumers, such as a websocket feed or an
    /// edge cache purger. The server itself does not subscribe; with no receivers the
    /// notices are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<StaleView> {
        self.notices.subscribe()
    }

    pub fn revalidate(&self, path: &str) {
        let evicted = self.cache.evict(path);
        tracing::debug!(path, evicted, "View revalidated");
        // No subscribers is fine.
        let _ = self.notices.send(StaleView {
            path: path.to_string(),
        });
    }

    /// Revalidates a wall and the aggregate views that list it.
    pub fn revalidate_wall(&self, owner: impl std::fmt::Display) {
        self.revalidate(&format!("/{owner}"));
        self.revalidate("/");
    }
}
