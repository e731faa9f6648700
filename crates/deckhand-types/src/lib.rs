#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **deckhand-types** – Shared primitive data structures for Deckhand.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It defines the self-describing [`Document`] model, the multi-document YAML
//! ingestion surface, and the closed error taxonomy shared by the rendering
//! engine and the revision stores. It intentionally makes no assumptions
//! about I/O, schema validation, or storage.

//─────────────────────────────
//  Well-known schema identifiers
//─────────────────────────────

/// Schema of the singleton control document declaring the site layer order.
pub const LAYERING_POLICY_SCHEMA: &str = "deckhand/LayeringPolicy/v1";

/// Schema of control documents that register a JSON Schema for a kind.
pub const DATA_SCHEMA_SCHEMA: &str = "deckhand/DataSchema/v1";

/// Schema of externally submitted validation policy records.
pub const VALIDATION_POLICY_SCHEMA: &str = "deckhand/ValidationPolicy/v1";

/// `metadata.schema` of ordinary, layerable documents.
pub const METADATA_DOCUMENT_SCHEMA: &str = "metadata/Document/v1";

/// `metadata.schema` of control documents (layering policy, data schemas).
pub const METADATA_CONTROL_SCHEMA: &str = "metadata/Control/v1";

//─────────────────────────────
//  Modules
//─────────────────────────────

/// Self-describing configuration documents and their typed metadata views.
pub mod document;

/// Serializable error envelope returned on the wire.
pub mod envelope;

/// Closed error taxonomy shared across the workspace.
pub mod error;

pub use document::{
    documents_from_yaml, kind_prefix, DestSpec, Document, LayeringAction, LayeringDefinition,
    StoragePolicy, Substitution, SubstitutionDest, SubstitutionSource,
};
pub use envelope::{ErrorDetails, ErrorEnvelope, ErrorMessage};
pub use error::{Error, ErrorKind, RenderFailure, Result};
