//! Serializable error envelope for transport layers.
//!
//! The core never serves HTTP itself, but the wire shape of failures is part
//! of its contract: any transport folds a [`RenderFailure`](crate::RenderFailure)
//! or single [`Error`] into this envelope and serializes it as YAML or JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// API version advertised in envelopes.
const API_VERSION: &str = "v1.0";

//─────────────────────────────
//  Envelope shape
//─────────────────────────────

/// Top-level error (or status) envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// `Failure` or `Success`.
    pub status: String,
    /// Always the literal `status`.
    pub kind: String,
    /// Envelope format version.
    pub api_version: String,
    /// HTTP status code, as a string (e.g. `"400 Bad Request"` uses the
    /// numeric part only: `"400"`).
    pub code: String,
    /// Short machine-oriented reason, the taxonomy kind of the first error.
    pub reason: String,
    /// Whether retrying the identical request may succeed.
    pub retry: bool,
    /// Reserved for transports; always present, possibly empty.
    pub metadata: Value,
    /// Human-oriented summary.
    pub message: String,
    /// Structured error list.
    pub details: ErrorDetails,
}

/// The `details` section of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// Taxonomy kind of the first (most significant) error.
    pub error_type: String,
    /// Number of entries in `message_list`.
    pub error_count: usize,
    /// One entry per accumulated error.
    pub message_list: Vec<ErrorMessage>,
}

/// A single entry of the envelope's message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Rendered error message.
    pub message: String,
    /// Always `true` for error entries.
    pub error: bool,
    /// Taxonomy kind of this entry.
    pub kind: String,
}

impl ErrorEnvelope {
    /// Builds a failure envelope from accumulated errors.
    ///
    /// The overall status code is the highest-severity code among the
    /// errors; `retry` is set when any error is retryable. Callers are
    /// expected to sanitize secret-bearing messages before building the
    /// envelope.
    pub fn failure(errors: &[Error]) -> Self {
        let code = errors
            .iter()
            .map(Error::http_status)
            .max()
            .unwrap_or(500);
        let reason = errors
            .first()
            .map(|e| e.kind().as_str().to_string())
            .unwrap_or_else(|| "internal-error".to_string());
        let message_list: Vec<ErrorMessage> = errors
            .iter()
            .map(|e| ErrorMessage {
                message: e.to_string(),
                error: true,
                kind: e.kind().as_str().to_string(),
            })
            .collect();

        Self {
            status: "Failure".to_string(),
            kind: "status".to_string(),
            api_version: API_VERSION.to_string(),
            code: code.to_string(),
            reason: reason.clone(),
            retry: errors.iter().any(Error::retryable),
            metadata: Value::Object(Default::default()),
            message: errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown failure".to_string()),
            details: ErrorDetails {
                error_type: reason,
                error_count: message_list.len(),
                message_list,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope_shape() {
        let errors = vec![
            Error::MissingParent {
                document: "a/b/v1/x".to_string(),
            },
            Error::Conflict {
                detail: "duplicate (schema, name)".to_string(),
            },
        ];
        let envelope = ErrorEnvelope::failure(&errors);

        assert_eq!(envelope.status, "Failure");
        assert_eq!(envelope.kind, "status");
        assert_eq!(envelope.code, "409");
        assert_eq!(envelope.reason, "missing-parent");
        assert!(!envelope.retry);
        assert_eq!(envelope.details.error_count, 2);
        assert!(envelope.details.message_list[1]
            .message
            .contains("duplicate"));

        // Wire field names are camelCased.
        let yaml = serde_yaml::to_string(&envelope).unwrap();
        assert!(yaml.contains("apiVersion: v1.0"));
        assert!(yaml.contains("errorCount: 2"));
        assert!(yaml.contains("messageList:"));
    }
}
