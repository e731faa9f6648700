#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **deckhand-store-memory** – In-memory revision store driver for Deckhand.
//!
//! This crate provides a fast, non-persistent [`RevisionStore`] suitable for
//! testing and development. All state lives behind a single `RwLock`, which
//! also serializes concurrent bucket writes: the losing writer classifies
//! its changes against the winner's result, exactly as a SQL driver would
//! with advisory locking. All data is lost when the process terminates.
//!
//! Documents written with `storagePolicy: encrypted` have their payload
//! pushed to the configured secret store; only the returned reference is
//! kept in revision state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use deckhand_secrets::{is_secret_reference, SecretKind, SecretStore};
use deckhand_store_core::{
    classify_changes, diff_revisions, revision_view, BucketWriteOutcome, DocumentRecord,
    RevisionDiff, RevisionId, RevisionRecord, RevisionStore, RevisionTag, RevisionView,
    ValidationEntry,
};
use deckhand_types::{Document, Error, Result, StoragePolicy};

//─────────────────────────────
//  Store state
//─────────────────────────────

#[derive(Debug, Default)]
struct State {
    revisions: BTreeMap<RevisionId, RevisionRecord>,
    rows: Vec<DocumentRecord>,
    tags: BTreeMap<RevisionId, BTreeMap<String, RevisionTag>>,
    validations: BTreeMap<RevisionId, Vec<ValidationEntry>>,
    next_id: RevisionId,
}

impl State {
    fn latest(&self) -> Option<RevisionId> {
        self.revisions.keys().next_back().copied()
    }

    fn rows_at(&self, revision: RevisionId) -> Vec<DocumentRecord> {
        self.rows
            .iter()
            .filter(|row| row.revision_id == revision)
            .cloned()
            .collect()
    }

    fn live_rows_at(&self, revision: RevisionId) -> Vec<DocumentRecord> {
        let mut rows: Vec<DocumentRecord> = self
            .rows
            .iter()
            .filter(|row| row.revision_id == revision && !row.deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.bucket, &a.schema, &a.name).cmp(&(&b.bucket, &b.schema, &b.name))
        });
        rows
    }

    fn require_revision(&self, id: RevisionId) -> Result<&RevisionRecord> {
        self.revisions
            .get(&id)
            .ok_or(Error::RevisionNotFound { revision: id })
    }

    fn view_at(&self, id: RevisionId) -> Result<RevisionView> {
        if id == 0 {
            return Ok(RevisionView::new());
        }
        self.require_revision(id)?;
        Ok(revision_view(&self.rows_at(id)))
    }

    fn mint_revision(&mut self) -> RevisionRecord {
        let record = RevisionRecord {
            id: self.next_id,
            created_at: Utc::now(),
        };
        self.next_id += 1;
        self.revisions.insert(record.id, record.clone());
        record
    }
}

//─────────────────────────────
//  Driver
//─────────────────────────────

/// An in-memory, non-persistent revision store.
#[derive(Clone)]
pub struct MemoryRevisionStore {
    state: Arc<RwLock<State>>,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl Default for MemoryRevisionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRevisionStore {
    /// Creates an empty store without secret-store support; writing an
    /// `encrypted` document through it is an error.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                next_id: 1,
                ..State::default()
            })),
            secrets: None,
        }
    }

    /// Creates an empty store that redirects encrypted payloads through
    /// `secrets`.
    pub fn with_secret_store(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets: Some(secrets),
            ..Self::new()
        }
    }

    /// Replaces an encrypted document's payload with a secret reference.
    ///
    /// Data that already is a reference passes through untouched, so
    /// rollback re-materialization never re-encrypts.
    async fn seal(&self, doc: Document) -> Result<Document> {
        if doc.storage_policy() != StoragePolicy::Encrypted || is_secret_reference(doc.data()) {
            return Ok(doc);
        }
        let secrets = self.secrets.as_ref().ok_or_else(|| Error::SecretStoreError {
            detail: "no secret store configured for encrypted documents".to_string(),
            transient: false,
        })?;
        let reference = secrets
            .store(
                doc.name(),
                SecretKind::from_schema(doc.schema()),
                doc.data().clone(),
            )
            .await?;
        Ok(doc.with_data(Value::String(reference)))
    }
}

impl std::fmt::Debug for MemoryRevisionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRevisionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl RevisionStore for MemoryRevisionStore {
    async fn put_bucket(
        &self,
        bucket: &str,
        documents: Vec<Document>,
    ) -> Result<BucketWriteOutcome> {
        // Hold the write lock across the whole operation; concurrent PUTs
        // to any bucket serialize here.
        let mut state = self.state.write().await;

        let mut seen = BTreeMap::new();
        for doc in &documents {
            let identity = (doc.schema().to_string(), doc.name().to_string());
            if seen.insert(identity, ()).is_some() {
                return Err(Error::Conflict {
                    detail: format!("duplicate document identity {} in write", doc.full_name()),
                });
            }
        }

        let current_rows = state.latest().map(|r| state.rows_at(r)).unwrap_or_default();
        for doc in &documents {
            let clash = current_rows.iter().find(|row| {
                !row.deleted
                    && row.bucket != bucket
                    && row.schema == doc.schema()
                    && row.name == doc.name()
            });
            if let Some(row) = clash {
                return Err(Error::Conflict {
                    detail: format!(
                        "document {} already owned by bucket {}",
                        doc.full_name(),
                        row.bucket
                    ),
                });
            }
        }

        let mut prepared = Vec::with_capacity(documents.len());
        for doc in documents {
            prepared.push(self.seal(doc).await?);
        }

        let current_bucket: Vec<DocumentRecord> = current_rows
            .iter()
            .filter(|row| row.bucket == bucket && !row.deleted)
            .cloned()
            .collect();
        let changes = classify_changes(&current_bucket, &prepared);

        if changes.is_noop() {
            let revision_id = state.latest().unwrap_or(0);
            debug!(%bucket, revision_id, "no-op bucket write; reusing revision");
            return Ok(BucketWriteOutcome {
                revision_id,
                created_revision: false,
                changes,
            });
        }

        let revision = state.mint_revision();
        let now = revision.created_at;
        debug!(%bucket, revision_id = revision.id, "materializing new revision");

        // Other buckets' live rows carry forward with their original
        // revision preserved.
        for row in current_rows.iter().filter(|r| r.bucket != bucket && !r.deleted) {
            state.rows.push(DocumentRecord {
                revision_id: revision.id,
                orig_revision_id: Some(row.effective_revision()),
                created_at: now,
                ..row.clone()
            });
        }

        let current_by_identity: BTreeMap<(String, String), &DocumentRecord> = current_bucket
            .iter()
            .map(|row| (row.identity(), row))
            .collect();

        for doc in &prepared {
            let identity = (doc.schema().to_string(), doc.name().to_string());
            let orig_revision_id = if changes.unchanged.contains(&identity) {
                current_by_identity
                    .get(&identity)
                    .map(|row| row.effective_revision())
            } else {
                None
            };
            state.rows.push(DocumentRecord {
                bucket: bucket.to_string(),
                schema: doc.schema().to_string(),
                name: doc.name().to_string(),
                data: doc.data().clone(),
                metadata: doc
                    .as_value()
                    .get("metadata")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
                revision_id: revision.id,
                orig_revision_id,
                deleted: false,
                created_at: now,
            });
        }

        for (schema, name) in &changes.deletions {
            state.rows.push(DocumentRecord {
                bucket: bucket.to_string(),
                schema: schema.clone(),
                name: name.clone(),
                data: Value::Object(Default::default()),
                metadata: Value::Object(Default::default()),
                revision_id: revision.id,
                orig_revision_id: None,
                deleted: true,
                created_at: now,
            });
        }

        Ok(BucketWriteOutcome {
            revision_id: revision.id,
            created_revision: true,
            changes,
        })
    }

    async fn revision(&self, id: RevisionId) -> Result<RevisionRecord> {
        let state = self.state.read().await;
        state.require_revision(id).cloned()
    }

    async fn list_revisions(&self) -> Result<Vec<RevisionRecord>> {
        let state = self.state.read().await;
        Ok(state.revisions.values().cloned().collect())
    }

    async fn latest_revision_id(&self) -> Result<RevisionId> {
        let state = self.state.read().await;
        Ok(state.latest().unwrap_or(0))
    }

    async fn delete_all_revisions(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.revisions.clear();
        state.rows.clear();
        state.tags.clear();
        state.validations.clear();
        // next_id keeps counting: revision ids stay monotonic for the
        // lifetime of the process.
        Ok(())
    }

    async fn documents(&self, revision: RevisionId) -> Result<Vec<DocumentRecord>> {
        let state = self.state.read().await;
        state.require_revision(revision)?;
        Ok(state.live_rows_at(revision))
    }

    async fn diff(&self, older: RevisionId, newer: RevisionId) -> Result<RevisionDiff> {
        let state = self.state.read().await;
        let older_view = state.view_at(older)?;
        let newer_view = state.view_at(newer)?;
        Ok(diff_revisions(&older_view, &newer_view))
    }

    async fn rollback(&self, target: RevisionId) -> Result<RevisionRecord> {
        let mut state = self.state.write().await;
        let target_rows = if target == 0 {
            Vec::new()
        } else {
            state.require_revision(target)?;
            state.live_rows_at(target)
        };

        let revision = state.mint_revision();
        let now = revision.created_at;
        debug!(target, revision_id = revision.id, "rolling back");

        for row in target_rows {
            let orig = row.effective_revision();
            state.rows.push(DocumentRecord {
                revision_id: revision.id,
                orig_revision_id: Some(orig),
                created_at: now,
                ..row
            });
        }
        Ok(revision)
    }

    async fn tag_revision(
        &self,
        id: RevisionId,
        tag: &str,
        data: Option<Value>,
    ) -> Result<RevisionTag> {
        let mut state = self.state.write().await;
        state.require_revision(id)?;
        let tags = state.tags.entry(id).or_default();
        let created_at = tags
            .get(tag)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        let record = RevisionTag {
            tag: tag.to_string(),
            data,
            created_at,
        };
        tags.insert(tag.to_string(), record.clone());
        Ok(record)
    }

    async fn revision_tag(&self, id: RevisionId, tag: &str) -> Result<Option<RevisionTag>> {
        let state = self.state.read().await;
        state.require_revision(id)?;
        Ok(state.tags.get(&id).and_then(|tags| tags.get(tag)).cloned())
    }

    async fn revision_tags(&self, id: RevisionId) -> Result<Vec<RevisionTag>> {
        let state = self.state.read().await;
        state.require_revision(id)?;
        Ok(state
            .tags
            .get(&id)
            .map(|tags| tags.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn untag_revision(&self, id: RevisionId, tag: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state.require_revision(id)?;
        Ok(state
            .tags
            .get_mut(&id)
            .map(|tags| tags.remove(tag).is_some())
            .unwrap_or(false))
    }

    async fn delete_revision_tags(&self, id: RevisionId) -> Result<()> {
        let mut state = self.state.write().await;
        state.require_revision(id)?;
        state.tags.remove(&id);
        Ok(())
    }

    async fn add_validation(&self, id: RevisionId, entry: ValidationEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.require_revision(id)?;
        state.validations.entry(id).or_default().push(entry);
        Ok(())
    }

    async fn validations(&self, id: RevisionId) -> Result<Vec<ValidationEntry>> {
        let state = self.state.read().await;
        state.require_revision(id)?;
        Ok(state.validations.get(&id).cloned().unwrap_or_default())
    }
}
