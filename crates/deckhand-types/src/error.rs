//! Closed error taxonomy for the rendering pipeline and revision stores.
//!
//! Every failure the system can report maps onto exactly one [`ErrorKind`];
//! the kinds, their wire names and their HTTP status codes form a stable
//! contract. Rendering accumulates errors instead of failing fast, so the
//! aggregate [`RenderFailure`] carries every error found in a single pass.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Convenience result alias over the workspace error type.
pub type Result<T> = std::result::Result<T, Error>;

//─────────────────────────────
//  Error type
//─────────────────────────────

/// All failure modes of the core, one variant per taxonomy kind.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    /// The request body could not be parsed as YAML.
    #[error("malformed YAML: {detail}")]
    MalformedYaml {
        /// Parser diagnostic.
        detail: String,
    },

    /// The document failed base or metadata schema validation.
    #[error("structural validation failed for {document} at {pointer}: {detail}")]
    StructuralInvalid {
        /// `schema/name` of the offending document.
        document: String,
        /// JSON Pointer of the offense within the document.
        pointer: String,
        /// Validator diagnostic.
        detail: String,
    },

    /// The document's data failed its registered data schema.
    #[error("data validation failed for {document} at {pointer}: {detail}")]
    DataInvalid {
        /// `schema/name` of the offending document.
        document: String,
        /// JSON Pointer of the offense within the data section.
        pointer: String,
        /// Validator diagnostic.
        detail: String,
    },

    /// No data schema is registered for the document's kind (strict mode).
    #[error("no schema registered for kind {kind} (document {document})")]
    UnknownKind {
        /// `schema/name` of the document.
        document: String,
        /// The kind prefix that had no registration.
        kind: String,
    },

    /// The revision contains no layering policy.
    #[error("no LayeringPolicy document found in the revision")]
    LayeringPolicyMissing,

    /// The layering policy exists but `data.layerOrder` is unusable.
    #[error("layering policy is malformed: {detail}")]
    LayeringPolicyMalformed {
        /// What is wrong with the policy.
        detail: String,
    },

    /// A non-root-layer document matched no parent.
    #[error("no parent found for document {document}")]
    MissingParent {
        /// `schema/name` of the orphaned document.
        document: String,
    },

    /// More than one candidate parent satisfied the selector.
    #[error("{candidates} candidate parents found for document {document}")]
    IndeterminateParent {
        /// `schema/name` of the ambiguous document.
        document: String,
        /// Number of qualifying candidates.
        candidates: usize,
    },

    /// A layering action used a method outside `merge|replace|delete`.
    #[error("invalid layering action method {method:?} in document {document}")]
    InvalidAction {
        /// `schema/name` of the document declaring the action.
        document: String,
        /// The unrecognized method string.
        method: String,
    },

    /// A layering action path was absent from the side that must have it.
    #[error("missing key at {path} while layering document {document}: {detail}")]
    MissingKey {
        /// `schema/name` of the document being layered.
        document: String,
        /// The dotted path that failed to resolve.
        path: String,
        /// Which side lacked the key, or the parse diagnostic.
        detail: String,
    },

    /// A substitution referenced a source document not in the revision.
    #[error("substitution source {source_doc} not found (document {document})")]
    SubstitutionSourceNotFound {
        /// `schema/name` of the consuming document.
        document: String,
        /// `schema/name` of the missing source.
        source_doc: String,
    },

    /// A substitution source exists but its data had nothing at the path.
    #[error("substitution source {source_doc} has no data at {path} (document {document})")]
    SubstitutionSourceDataMissing {
        /// `schema/name` of the consuming document.
        document: String,
        /// `schema/name` of the source document.
        source_doc: String,
        /// The dotted source path that failed to resolve.
        path: String,
    },

    /// The secret store failed to store or resolve a payload.
    #[error("secret store error: {detail}")]
    SecretStoreError {
        /// Store diagnostic (sanitized; never contains payloads).
        detail: String,
        /// Whether retrying the request may succeed.
        transient: bool,
    },

    /// The dependency graph contains at least one cycle.
    #[error("dependency cycle detected: {}", nodes.join(" -> "))]
    CycleDetected {
        /// Node tags participating in the cycle.
        nodes: Vec<String>,
    },

    /// The requested revision id does not exist.
    #[error("revision {revision} not found")]
    RevisionNotFound {
        /// The id that was requested.
        revision: u64,
    },

    /// A uniqueness constraint was violated.
    #[error("conflict: {detail}")]
    Conflict {
        /// Which constraint failed and for what identity.
        detail: String,
    },

    /// The policy engine denied the request.
    #[error("forbidden: {detail}")]
    Forbidden {
        /// Denial reason.
        detail: String,
    },
}

//─────────────────────────────
//  Kind and wire mapping
//─────────────────────────────

/// Stable, kebab-cased identifiers for every error variant.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedYaml,
    StructuralInvalid,
    DataInvalid,
    UnknownKind,
    LayeringPolicyMissing,
    LayeringPolicyMalformed,
    MissingParent,
    IndeterminateParent,
    InvalidAction,
    MissingKey,
    SubstitutionSourceNotFound,
    SubstitutionSourceDataMissing,
    SecretStoreError,
    CycleDetected,
    RevisionNotFound,
    Conflict,
    Forbidden,
}

impl ErrorKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedYaml => "malformed-yaml",
            ErrorKind::StructuralInvalid => "structural-invalid",
            ErrorKind::DataInvalid => "data-invalid",
            ErrorKind::UnknownKind => "unknown-kind",
            ErrorKind::LayeringPolicyMissing => "layering-policy-missing",
            ErrorKind::LayeringPolicyMalformed => "layering-policy-malformed",
            ErrorKind::MissingParent => "missing-parent",
            ErrorKind::IndeterminateParent => "indeterminate-parent",
            ErrorKind::InvalidAction => "invalid-action",
            ErrorKind::MissingKey => "missing-key",
            ErrorKind::SubstitutionSourceNotFound => "substitution-source-not-found",
            ErrorKind::SubstitutionSourceDataMissing => "substitution-source-data-missing",
            ErrorKind::SecretStoreError => "secret-store-error",
            ErrorKind::CycleDetected => "cycle-detected",
            ErrorKind::RevisionNotFound => "revision-not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Forbidden => "forbidden",
        }
    }

    /// The HTTP status code reported for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::LayeringPolicyMissing | ErrorKind::Conflict => 409,
            ErrorKind::SecretStoreError => 502,
            ErrorKind::RevisionNotFound => 404,
            ErrorKind::Forbidden => 403,
            _ => 400,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedYaml { .. } => ErrorKind::MalformedYaml,
            Error::StructuralInvalid { .. } => ErrorKind::StructuralInvalid,
            Error::DataInvalid { .. } => ErrorKind::DataInvalid,
            Error::UnknownKind { .. } => ErrorKind::UnknownKind,
            Error::LayeringPolicyMissing => ErrorKind::LayeringPolicyMissing,
            Error::LayeringPolicyMalformed { .. } => ErrorKind::LayeringPolicyMalformed,
            Error::MissingParent { .. } => ErrorKind::MissingParent,
            Error::IndeterminateParent { .. } => ErrorKind::IndeterminateParent,
            Error::InvalidAction { .. } => ErrorKind::InvalidAction,
            Error::MissingKey { .. } => ErrorKind::MissingKey,
            Error::SubstitutionSourceNotFound { .. } => ErrorKind::SubstitutionSourceNotFound,
            Error::SubstitutionSourceDataMissing { .. } => {
                ErrorKind::SubstitutionSourceDataMissing
            }
            Error::SecretStoreError { .. } => ErrorKind::SecretStoreError,
            Error::CycleDetected { .. } => ErrorKind::CycleDetected,
            Error::RevisionNotFound { .. } => ErrorKind::RevisionNotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Forbidden { .. } => ErrorKind::Forbidden,
        }
    }

    /// The HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// Whether the caller may retry the request unchanged.
    ///
    /// Only transient secret store failures qualify; everything else is a
    /// deterministic property of the inputs.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::SecretStoreError {
                transient: true,
                ..
            }
        )
    }
}

//─────────────────────────────
//  Accumulated render failure
//─────────────────────────────

/// Aggregate of every error accumulated during a single render pass.
///
/// A failing node blocks its descendants but never stops evaluation of
/// independent branches, so a single pass reports all problems at once.
#[derive(Debug, Clone, PartialEq, ThisError)]
#[error("rendering failed with {} error(s)", errors.len())]
pub struct RenderFailure {
    /// Accumulated errors, in evaluation order.
    pub errors: Vec<Error>,
}

impl RenderFailure {
    /// Wraps a non-empty list of accumulated errors.
    pub fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }

    /// Highest-severity HTTP status among the accumulated errors.
    ///
    /// Server-side classes win over client-side ones so transport layers
    /// surface the most actionable code.
    pub fn http_status(&self) -> u16 {
        self.errors
            .iter()
            .map(Error::http_status)
            .max()
            .unwrap_or(500)
    }

    /// Whether any accumulated error is retryable.
    pub fn retryable(&self) -> bool {
        self.errors.iter().any(Error::retryable)
    }
}
