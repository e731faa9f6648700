//! Self-describing configuration documents.
//!
//! A [`Document`] wraps the raw JSON value exactly as the client sent it.
//! Structural validation must see the unmodified input, so the wrapper never
//! normalizes or drops unknown fields; typed views over `metadata` are parsed
//! on demand and tolerate malformed shapes (the structural validator is the
//! component that rejects them with a useful error).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::{METADATA_CONTROL_SCHEMA, METADATA_DOCUMENT_SCHEMA};

static NULL: Value = Value::Null;

//─────────────────────────────
//  Document wrapper
//─────────────────────────────

/// A single configuration document: `schema`, `metadata` and `data`.
///
/// Documents are immutable values; every transformation (layering,
/// substitution) produces a new `Document` via [`Document::with_data`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    raw: Value,
}

impl Document {
    /// Wraps a raw JSON value as a document without validating it.
    ///
    /// Malformed values are accepted here on purpose: they enter the render
    /// graph and fail at their `structural` node, which blocks descendants
    /// and reports the offense instead of panicking at parse time.
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    /// The full raw value, exactly as received.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    /// Consumes the wrapper, returning the raw value.
    pub fn into_value(self) -> Value {
        self.raw
    }

    /// The `schema` kind identifier, or `""` when absent.
    pub fn schema(&self) -> &str {
        self.raw.get("schema").and_then(Value::as_str).unwrap_or("")
    }

    /// The `metadata` map, when present and a map.
    pub fn metadata(&self) -> Option<&serde_json::Map<String, Value>> {
        self.raw.get("metadata").and_then(Value::as_object)
    }

    /// The `metadata.schema` identifier, or `""` when absent.
    pub fn metadata_schema(&self) -> &str {
        self.metadata()
            .and_then(|m| m.get("schema"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// The `metadata.name`, or `""` when absent.
    pub fn name(&self) -> &str {
        self.metadata()
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// `"{schema}/{name}"`, the identity used in node tags and messages.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.schema(), self.name())
    }

    /// Whether `metadata.schema` marks this as a control document.
    pub fn is_control(&self) -> bool {
        self.metadata_schema() == METADATA_CONTROL_SCHEMA
    }

    /// Whether `metadata.schema` marks this as an ordinary document.
    pub fn is_ordinary(&self) -> bool {
        self.metadata_schema() == METADATA_DOCUMENT_SCHEMA
    }

    /// The `data` section. Missing data reads as `null`.
    pub fn data(&self) -> &Value {
        self.raw.get("data").unwrap_or(&NULL)
    }

    /// Returns a copy of this document with the `data` section replaced.
    ///
    /// Non-object documents are returned unchanged; structural validation
    /// rejects them before any transform reaches this point.
    pub fn with_data(&self, data: Value) -> Self {
        let mut raw = self.raw.clone();
        if let Some(map) = raw.as_object_mut() {
            map.insert("data".to_string(), data);
        }
        Self { raw }
    }

    /// The typed `metadata.layeringDefinition`, when present and well-formed.
    pub fn layering_definition(&self) -> Option<LayeringDefinition> {
        let raw = self.metadata()?.get("layeringDefinition")?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// The declared layer name, when any.
    pub fn layer(&self) -> Option<String> {
        self.layering_definition().map(|ld| ld.layer)
    }

    /// Whether this document is abstract (excluded from rendered output).
    pub fn is_abstract(&self) -> bool {
        self.layering_definition()
            .map(|ld| ld.is_abstract)
            .unwrap_or(false)
    }

    /// Whether the layering definition declares the inputs parent
    /// resolution needs: both a `parentSelector` and `actions`.
    ///
    /// Note this only reports what the document declares; whether layering
    /// is *required* depends on the document's position in the layer order.
    pub fn has_layering(&self) -> bool {
        self.metadata()
            .and_then(|m| m.get("layeringDefinition"))
            .and_then(Value::as_object)
            .map(|ld| ld.contains_key("parentSelector") && ld.contains_key("actions"))
            .unwrap_or(false)
    }

    /// The typed `metadata.substitutions` list; empty when absent or malformed.
    pub fn substitutions(&self) -> Vec<Substitution> {
        self.metadata()
            .and_then(|m| m.get("substitutions"))
            .and_then(|subs| serde_json::from_value(subs.clone()).ok())
            .unwrap_or_default()
    }

    /// The declared storage policy, defaulting to cleartext.
    pub fn storage_policy(&self) -> StoragePolicy {
        self.metadata()
            .and_then(|m| m.get("storagePolicy"))
            .and_then(|sp| serde_json::from_value(sp.clone()).ok())
            .unwrap_or_default()
    }

    /// Whether every key/value pair of `selector` is present in this
    /// document's `metadata.labels`.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        let labels = self.metadata().and_then(|m| m.get("labels"));
        selector.iter().all(|(key, value)| {
            labels
                .and_then(|l| l.get(key))
                .and_then(Value::as_str)
                .map(|actual| actual == value)
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Document({})", self.full_name())
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name())
    }
}

//─────────────────────────────
//  Typed metadata views
//─────────────────────────────

/// Typed view of `metadata.layeringDefinition`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayeringDefinition {
    /// Layer this document belongs to; must appear in the policy's
    /// `layerOrder`.
    pub layer: String,
    /// Label predicate selecting the unique parent one layer earlier.
    #[serde(rename = "parentSelector")]
    pub parent_selector: BTreeMap<String, String>,
    /// Ordered transforms applied onto the parent's rendered data.
    pub actions: Vec<LayeringAction>,
    /// Abstract documents layer and substitute but are never part of the
    /// rendered output, and skip data validation.
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
}

/// One `merge`/`replace`/`delete` step of a layering definition.
///
/// The method is kept as a raw string so unknown values surface as an
/// `invalid-action` error rather than a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayeringAction {
    /// Dotted path the action applies to; `.` means the whole data section.
    pub path: String,
    /// One of `merge`, `replace`, `delete`.
    pub method: String,
}

/// One entry of `metadata.substitutions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    /// Where the value comes from.
    pub src: SubstitutionSource,
    /// Where the value goes; a single spec or a list of them.
    pub dest: SubstitutionDest,
}

/// The source half of a substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionSource {
    /// Schema of the source document.
    pub schema: String,
    /// Name of the source document.
    pub name: String,
    /// Dotted path into the source data; `.` extracts the whole section.
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    ".".to_string()
}

/// Destination of a substitution: the original accepts either a single
/// `{path, pattern}` object or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubstitutionDest {
    /// A single destination spec.
    One(DestSpec),
    /// Multiple destination specs receiving the same source value.
    Many(Vec<DestSpec>),
}

impl SubstitutionDest {
    /// Normalizes to a list of destination specs, in declaration order.
    pub fn specs(&self) -> Vec<&DestSpec> {
        match self {
            SubstitutionDest::One(spec) => vec![spec],
            SubstitutionDest::Many(specs) => specs.iter().collect(),
        }
    }
}

/// A single substitution destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestSpec {
    /// Dotted path in the destination data to write to.
    pub path: String,
    /// Optional regex whose first match in the existing string value is
    /// replaced by the (string) source value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// How a document's `data` is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePolicy {
    /// Data stored directly in the revision store.
    #[default]
    Cleartext,
    /// Data pushed to the secret store; only the reference is persisted.
    Encrypted,
}

//─────────────────────────────
//  Helpers
//─────────────────────────────

/// Strips the trailing `/vX.Y` component from a schema identifier.
///
/// `example/Chart/v1` and `example/Chart/v1.0` both map to `example/Chart`;
/// identifiers without a version suffix are returned unchanged. The result
/// is the lookup key for registered data schemas.
pub fn kind_prefix(schema: &str) -> &str {
    match schema.rsplit_once('/') {
        Some((prefix, version)) if looks_like_version(version) => prefix,
        _ => schema,
    }
}

fn looks_like_version(component: &str) -> bool {
    let Some(rest) = component.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Parses a multi-document YAML stream into documents.
///
/// Empty documents in the stream (bare `---` separators) are skipped. Any
/// parse failure rejects the whole stream with a `malformed-yaml` error;
/// partial ingestion would make bucket writes ambiguous.
pub fn documents_from_yaml(input: &str) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for de in serde_yaml::Deserializer::from_str(input) {
        let value = Value::deserialize(de).map_err(|e| Error::MalformedYaml {
            detail: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        documents.push(Document::from_value(value));
    }
    Ok(documents)
}
