//! Store-backed rendering façade with a per-revision render cache.
//!
//! Ties the revision store to the engine: loading a revision's documents,
//! building a render session, and caching the full rendered output keyed by
//! revision id. Writes go through the same façade so the cache is dropped
//! exactly where new revisions are minted (bucket writes, rollback,
//! delete-all). Rendering is deterministic per revision, so a cached entry
//! never goes stale on its own; clearing on every new revision is the
//! conservative contract transports can rely on.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use deckhand_secrets::SecretStore;
use deckhand_store_core::{
    BucketWriteOutcome, RevisionId, RevisionRecord, RevisionStore,
};
use deckhand_types::{Document, RenderFailure, Result};

use crate::cache::RenderCache;
use crate::{DocumentFilter, Engine, EngineOptions, SchemaRegistry};

/// Default number of revisions whose rendered output is kept in memory.
const DEFAULT_CACHE_CAPACITY: usize = 8;

/// Renders revisions out of a store, caching results per revision id.
pub struct Renderer {
    store: Arc<dyn RevisionStore>,
    secrets: Arc<dyn SecretStore>,
    registry: SchemaRegistry,
    options: EngineOptions,
    cache: Mutex<RenderCache>,
}

impl Renderer {
    /// Creates a renderer over `store` and `secrets` with default options
    /// and cache capacity.
    pub fn new(store: Arc<dyn RevisionStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_options(
            store,
            secrets,
            EngineOptions::default(),
            DEFAULT_CACHE_CAPACITY,
        )
    }

    /// Creates a renderer with explicit options and cache capacity. A zero
    /// capacity disables caching.
    pub fn with_options(
        store: Arc<dyn RevisionStore>,
        secrets: Arc<dyn SecretStore>,
        options: EngineOptions,
        cache_capacity: usize,
    ) -> Self {
        Self {
            store,
            secrets,
            registry: SchemaRegistry::with_builtins(),
            options,
            cache: Mutex::new(RenderCache::new(cache_capacity)),
        }
    }

    /// The fully rendered documents of `revision` matching `filter`.
    ///
    /// An uncached revision is loaded from the store and rendered in full;
    /// the complete result is cached and the filter applied on the way out,
    /// so a later differently-filtered request hits the same entry.
    pub async fn rendered_documents(
        &self,
        revision: RevisionId,
        filter: &DocumentFilter,
    ) -> std::result::Result<Vec<Document>, RenderFailure> {
        if let Some(cached) = self.cache.lock().await.get(revision) {
            debug!(revision, "serving rendered documents from cache");
            return Ok(cached.iter().filter(|d| filter.matches(d)).cloned().collect());
        }

        let rows = self
            .store
            .documents(revision)
            .await
            .map_err(|e| RenderFailure::new(vec![e]))?;
        let documents: Vec<Document> = rows.iter().map(|row| row.document()).collect();

        let engine = Engine::new(
            documents,
            self.registry.clone(),
            self.secrets.clone(),
            self.options.clone(),
        );
        let rendered = engine.render_all().await?;

        let selected = rendered
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        self.cache.lock().await.insert(revision, rendered);
        Ok(selected)
    }

    /// Writes a bucket through the underlying store, dropping every cached
    /// render when the write mints a new revision.
    pub async fn put_bucket(
        &self,
        bucket: &str,
        documents: Vec<Document>,
    ) -> Result<BucketWriteOutcome> {
        let outcome = self.store.put_bucket(bucket, documents).await?;
        if outcome.created_revision {
            self.cache.lock().await.clear();
        }
        Ok(outcome)
    }

    /// Rolls back through the underlying store. A rollback always mints a
    /// revision, so the cache is always dropped.
    pub async fn rollback(&self, target: RevisionId) -> Result<RevisionRecord> {
        let record = self.store.rollback(target).await?;
        self.cache.lock().await.clear();
        Ok(record)
    }

    /// Deletes every revision through the underlying store and drops the
    /// cache.
    pub async fn delete_all_revisions(&self) -> Result<()> {
        self.store.delete_all_revisions().await?;
        self.cache.lock().await.clear();
        Ok(())
    }

    /// Number of revisions currently cached.
    pub async fn cached_revisions(&self) -> usize {
        self.cache.lock().await.len()
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer").finish_non_exhaustive()
    }
}
