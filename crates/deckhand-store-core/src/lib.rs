#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **deckhand-store-core** – Core revision storage abstractions for Deckhand.
//!
//! This crate defines the [`RevisionStore`] trait and the record types it
//! traffics in, plus the pure change-classification and diff semantics every
//! driver shares: a bucket write creates a revision only when something
//! really changed, unchanged rows carry their original revision id forward,
//! deletions become tombstones, and diffs group buckets by how the two
//! revisions disagree. Drivers (in-memory, SQL, …) implement the trait in
//! separate crates on top of these helpers.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use deckhand_types::{Document, Result};

//─────────────────────────────
//  Core type aliases
//─────────────────────────────

/// Monotonically increasing revision identifier. Id `0` addresses the empty
/// state before any revision exists and is valid in diffs.
pub type RevisionId = u64;

/// `(schema, metadata.name)` identity of a document within a revision.
pub type DocumentIdentity = (String, String);

//─────────────────────────────
//  Records
//─────────────────────────────

/// One document row as persisted for one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Bucket this row was written through.
    pub bucket: String,
    /// Document `schema` identifier.
    pub schema: String,
    /// Document `metadata.name`.
    pub name: String,
    /// The `data` section (empty object for tombstones).
    pub data: Value,
    /// The `metadata` section (empty object for tombstones).
    pub metadata: Value,
    /// Revision this row belongs to.
    pub revision_id: RevisionId,
    /// First revision in which this exact content appeared, when the row
    /// was carried forward unchanged.
    pub orig_revision_id: Option<RevisionId>,
    /// Whether this row records a deletion.
    pub deleted: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// The `(schema, name)` identity of this row.
    pub fn identity(&self) -> DocumentIdentity {
        (self.schema.clone(), self.name.clone())
    }

    /// The revision users should see for this row: the original revision
    /// the content first appeared in, falling back to the row's own.
    pub fn effective_revision(&self) -> RevisionId {
        self.orig_revision_id.unwrap_or(self.revision_id)
    }

    /// Reassembles the full document from this row.
    pub fn document(&self) -> Document {
        Document::from_value(serde_json::json!({
            "schema": self.schema,
            "metadata": self.metadata,
            "data": self.data,
        }))
    }
}

/// One revision's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// The revision id.
    pub id: RevisionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A tag attached to a revision, with optional structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionTag {
    /// Tag name, unique per revision.
    pub tag: String,
    /// Optional JSON payload.
    pub data: Option<Value>,
    /// When the tag was attached.
    pub created_at: DateTime<Utc>,
}

/// Outcome reported by an external validator for a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// The validator accepted the revision.
    Success,
    /// The validator rejected the revision.
    Failure,
}

/// An externally submitted validation result attached to a revision.
///
/// The store records these verbatim; it never evaluates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEntry {
    /// Validator name (e.g. `promenade-site-validation`).
    pub name: String,
    /// Reported status.
    pub status: ValidationStatus,
    /// Optional structured detail from the validator.
    pub data: Option<Value>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

//─────────────────────────────
//  Change classification
//─────────────────────────────

/// How one bucket write affected each incoming or departed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Identities not previously in the bucket.
    pub creations: Vec<DocumentIdentity>,
    /// Identities whose content differs from the current counterpart.
    pub updates: Vec<DocumentIdentity>,
    /// Identities previously in the bucket and absent from the write.
    pub deletions: Vec<DocumentIdentity>,
    /// Identities whose content is identical to the current counterpart.
    pub unchanged: Vec<DocumentIdentity>,
}

impl ChangeSet {
    /// Whether the write changes anything at all. A no-op write reuses the
    /// current revision instead of minting a new one.
    pub fn is_noop(&self) -> bool {
        self.creations.is_empty() && self.updates.is_empty() && self.deletions.is_empty()
    }
}

/// Classifies an incoming bucket write against the bucket's current rows.
///
/// Content comparison covers `data` and `metadata`; two documents are "the
/// same" only when both sections are identical.
pub fn classify_changes(current: &[DocumentRecord], incoming: &[Document]) -> ChangeSet {
    let mut changes = ChangeSet::default();

    let current_by_identity: BTreeMap<DocumentIdentity, &DocumentRecord> = current
        .iter()
        .filter(|row| !row.deleted)
        .map(|row| (row.identity(), row))
        .collect();
    let incoming_identities: BTreeSet<DocumentIdentity> = incoming
        .iter()
        .map(|doc| (doc.schema().to_string(), doc.name().to_string()))
        .collect();

    for doc in incoming {
        let identity = (doc.schema().to_string(), doc.name().to_string());
        match current_by_identity.get(&identity) {
            None => changes.creations.push(identity),
            Some(existing) => {
                let same_data = &existing.data == doc.data();
                let same_metadata = Some(&existing.metadata)
                    == doc.as_value().get("metadata");
                if same_data && same_metadata {
                    changes.unchanged.push(identity);
                } else {
                    changes.updates.push(identity);
                }
            }
        }
    }

    for identity in current_by_identity.keys() {
        if !incoming_identities.contains(identity) {
            changes.deletions.push(identity.clone());
        }
    }

    changes
}

//─────────────────────────────
//  Revision diffing
//─────────────────────────────

/// How a bucket differs between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    /// The bucket exists only in the newer revision.
    Created,
    /// The bucket exists in both but at least one document differs.
    Modified,
    /// The bucket exists only in the older revision.
    Deleted,
    /// The bucket's documents are identical in both revisions.
    Unmodified,
}

/// Bucket-level diff between two revisions.
pub type RevisionDiff = BTreeMap<String, BucketStatus>;

/// The documents one revision "sees", grouped per bucket, as comparable
/// content fingerprints.
pub type RevisionView = BTreeMap<String, BTreeMap<DocumentIdentity, Value>>;

/// Builds the per-bucket view of a set of live rows.
pub fn revision_view(rows: &[DocumentRecord]) -> RevisionView {
    let mut view = RevisionView::new();
    for row in rows {
        if row.deleted {
            continue;
        }
        view.entry(row.bucket.clone()).or_default().insert(
            row.identity(),
            serde_json::json!({"data": row.data, "metadata": row.metadata}),
        );
    }
    view
}

/// Diffs two revision views, oldest first.
///
/// Every bucket present in either view appears in the result: `created` if
/// only the newer revision has it, `deleted` if only the older one does,
/// `modified`/`unmodified` by document-level comparison otherwise.
pub fn diff_revisions(older: &RevisionView, newer: &RevisionView) -> RevisionDiff {
    let mut diff = RevisionDiff::new();
    let buckets: BTreeSet<&String> = older.keys().chain(newer.keys()).collect();

    for bucket in buckets {
        let status = match (older.get(bucket), newer.get(bucket)) {
            (None, Some(_)) => BucketStatus::Created,
            (Some(_), None) => BucketStatus::Deleted,
            (Some(old_docs), Some(new_docs)) => {
                if old_docs == new_docs {
                    BucketStatus::Unmodified
                } else {
                    BucketStatus::Modified
                }
            }
            (None, None) => continue,
        };
        diff.insert(bucket.clone(), status);
    }
    diff
}

//─────────────────────────────
//  Store trait
//─────────────────────────────

/// Result of a bucket write.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketWriteOutcome {
    /// The revision the write landed in: a fresh id if anything changed,
    /// the current one otherwise.
    pub revision_id: RevisionId,
    /// Whether a new revision was minted.
    pub created_revision: bool,
    /// Per-document classification of the write.
    pub changes: ChangeSet,
}

/// Abstraction over bucket-scoped, append-only revision storage.
///
/// Implementations must be thread-safe and serialize concurrent writes to
/// the same bucket; the losing writer computes its change set against the
/// winner's result.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Replaces `bucket`'s contribution with `documents`.
    ///
    /// Mints a new revision only when the write actually changes something;
    /// a no-op write returns the current revision id with an empty change
    /// set. Deletions materialize as tombstone rows in the new revision.
    async fn put_bucket(&self, bucket: &str, documents: Vec<Document>)
        -> Result<BucketWriteOutcome>;

    /// Metadata of one revision.
    async fn revision(&self, id: RevisionId) -> Result<RevisionRecord>;

    /// All revisions, oldest first.
    async fn list_revisions(&self) -> Result<Vec<RevisionRecord>>;

    /// The most recent revision id, or `0` when no revision exists.
    async fn latest_revision_id(&self) -> Result<RevisionId>;

    /// Deletes every revision, row, tag and validation entry.
    async fn delete_all_revisions(&self) -> Result<()>;

    /// The live (non-tombstone) document rows of a revision.
    async fn documents(&self, revision: RevisionId) -> Result<Vec<DocumentRecord>>;

    /// Bucket-level diff between two revisions; id `0` is the empty state.
    async fn diff(&self, older: RevisionId, newer: RevisionId) -> Result<RevisionDiff>;

    /// Re-materializes `target`'s documents as a new revision.
    async fn rollback(&self, target: RevisionId) -> Result<RevisionRecord>;

    /// Attaches (or updates) a tag on a revision.
    async fn tag_revision(
        &self,
        id: RevisionId,
        tag: &str,
        data: Option<Value>,
    ) -> Result<RevisionTag>;

    /// Looks a tag up on a revision.
    async fn revision_tag(&self, id: RevisionId, tag: &str) -> Result<Option<RevisionTag>>;

    /// All tags on a revision, ordered by tag name.
    async fn revision_tags(&self, id: RevisionId) -> Result<Vec<RevisionTag>>;

    /// Removes a tag; returns whether it existed.
    async fn untag_revision(&self, id: RevisionId, tag: &str) -> Result<bool>;

    /// Removes every tag on a revision.
    async fn delete_revision_tags(&self, id: RevisionId) -> Result<()>;

    /// Attaches an external validation result to a revision.
    async fn add_validation(&self, id: RevisionId, entry: ValidationEntry) -> Result<()>;

    /// All validation results attached to a revision.
    async fn validations(&self, id: RevisionId) -> Result<Vec<ValidationEntry>>;
}
