//! Bounded LRU cache of rendered document sets, keyed by revision id.
//!
//! Rendering is deterministic per revision, so a cached result never goes
//! stale on its own; the [`Renderer`](crate::Renderer) drops the cache
//! defensively whenever a write mints a new revision (bucket writes,
//! rollback re-materialization, delete-all).

use std::collections::{HashMap, VecDeque};

use deckhand_types::Document;

/// LRU cache of rendered outputs per revision.
#[derive(Debug, Clone)]
pub struct RenderCache {
    capacity: usize,
    entries: HashMap<u64, Vec<Document>>,
    recency: VecDeque<u64>,
}

impl RenderCache {
    /// Creates a cache holding up to `capacity` revisions. A zero capacity
    /// disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// The rendered documents of `revision`, if cached.
    pub fn get(&mut self, revision: u64) -> Option<&Vec<Document>> {
        if !self.entries.contains_key(&revision) {
            return None;
        }
        self.touch(revision);
        self.entries.get(&revision)
    }

    /// Caches the rendered documents of `revision`, evicting the least
    /// recently used entry when full.
    pub fn insert(&mut self, revision: u64, documents: Vec<Document>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&revision) {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(revision, documents);
        self.touch(revision);
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Number of cached revisions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, revision: u64) {
        self.recency.retain(|r| *r != revision);
        self.recency.push_back(revision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(tag: u64) -> Vec<Document> {
        vec![Document::from_value(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": format!("doc-{tag}")},
            "data": {}
        }))]
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = RenderCache::new(4);
        assert!(cache.get(1).is_none());

        cache.insert(1, docs(1));
        assert_eq!(cache.get(1).unwrap()[0].name(), "doc-1");
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = RenderCache::new(2);
        cache.insert(1, docs(1));
        cache.insert(2, docs(2));

        // Touch 1 so 2 becomes the eviction candidate.
        cache.get(1);
        cache.insert(3, docs(3));

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_clear() {
        let mut cache = RenderCache::new(4);
        cache.insert(1, docs(1));
        cache.insert(2, docs(2));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let mut cache = RenderCache::new(0);
        cache.insert(1, docs(1));
        assert!(cache.get(1).is_none());
    }
}
