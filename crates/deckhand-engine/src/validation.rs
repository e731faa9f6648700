//! Two-phase document validation: structural, then data.
//!
//! Structural validation runs the root schema over the raw document and then
//! the metadata schema selected by `metadata.schema` over the metadata
//! section. Data validation runs the registered data schema (if any) over
//! the data section; it runs once before rendering and again afterwards to
//! catch substitutions that corrupted the shape. All violations of a phase
//! are accumulated rather than reported one at a time.

use tracing::debug;

use deckhand_types::{Document, Error};

use crate::schema::SchemaRegistry;

/// Validates the whole document against the root schema, then its metadata
/// against the schema named by `metadata.schema`.
///
/// A document that fails the root phase is returned immediately; metadata
/// validation would only repeat the same offenses against a narrower shape.
pub fn validate_structure(doc: &Document, registry: &SchemaRegistry) -> Vec<Error> {
    let root_errors: Vec<Error> = registry
        .root_schema()
        .violations(doc.as_value())
        .into_iter()
        .map(|(pointer, detail)| Error::StructuralInvalid {
            document: doc.full_name(),
            pointer,
            detail,
        })
        .collect();
    if !root_errors.is_empty() {
        return root_errors;
    }

    let metadata_schema = doc.metadata_schema();
    let Some(schema) = registry.metadata_schema_for(metadata_schema) else {
        return vec![Error::StructuralInvalid {
            document: doc.full_name(),
            pointer: "/metadata/schema".to_string(),
            detail: format!("unrecognized metadata schema {metadata_schema:?}"),
        }];
    };

    let metadata = doc
        .as_value()
        .get("metadata")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    schema
        .violations(&metadata)
        .into_iter()
        .map(|(pointer, detail)| Error::StructuralInvalid {
            document: doc.full_name(),
            pointer: prefix_pointer("/metadata", &pointer),
            detail,
        })
        .collect()
}

/// Validates the document's data section against its registered data schema.
///
/// Abstract documents skip data validation entirely: their data is an
/// intermediate value that only becomes meaningful once a concrete child
/// layers on top of it. A kind with no registration passes by default and
/// fails with `unknown-kind` in strict mode.
pub fn validate_data(doc: &Document, registry: &SchemaRegistry, strict: bool) -> Vec<Error> {
    if doc.is_abstract() {
        return Vec::new();
    }

    let Some(schema) = registry.data_schema_for(doc.schema()) else {
        if strict {
            return vec![Error::UnknownKind {
                document: doc.full_name(),
                kind: deckhand_types::kind_prefix(doc.schema()).to_string(),
            }];
        }
        debug!(document = %doc.full_name(), "no data schema registered; skipping data validation");
        return Vec::new();
    };

    schema
        .violations(doc.data())
        .into_iter()
        .map(|(pointer, detail)| Error::DataInvalid {
            document: doc.full_name(),
            pointer: prefix_pointer("/data", &pointer),
            detail,
        })
        .collect()
}

fn prefix_pointer(prefix: &str, pointer: &str) -> String {
    if pointer == "/" {
        prefix.to_string()
    } else {
        format!("{prefix}{pointer}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_types::ErrorKind;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::with_builtins()
    }

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value)
    }

    #[test]
    fn test_structural_passes_ordinary_document() {
        let d = doc(json!({
            "schema": "example/Kind/v1",
            "metadata": {
                "schema": "metadata/Document/v1",
                "name": "x",
                "layeringDefinition": {"layer": "site"}
            },
            "data": {}
        }));
        assert!(validate_structure(&d, &registry()).is_empty());
    }

    #[test]
    fn test_structural_rejects_bad_schema_identifier() {
        let d = doc(json!({
            "schema": "nonsense",
            "metadata": {"schema": "metadata/Document/v1", "name": "x"}
        }));
        let errors = validate_structure(&d, &registry());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::StructuralInvalid);
        match &errors[0] {
            Error::StructuralInvalid { pointer, .. } => assert_eq!(pointer, "/schema"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_structural_metadata_phase_flags_missing_layering() {
        let d = doc(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x"},
            "data": {}
        }));
        let errors = validate_structure(&d, &registry());
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            Error::StructuralInvalid { pointer, .. } => assert_eq!(pointer, "/metadata"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_structural_rejects_unknown_metadata_schema() {
        let d = doc(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Mystery/v1", "name": "x"}
        }));
        let errors = validate_structure(&d, &registry());
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            Error::StructuralInvalid { pointer, detail, .. } => {
                assert_eq!(pointer, "/metadata/schema");
                assert!(detail.contains("metadata/Mystery/v1"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_data_validation_with_registered_schema() {
        let mut reg = registry();
        reg.register_data_schemas(&[doc(json!({
            "schema": "deckhand/DataSchema/v1",
            "metadata": {"schema": "metadata/Control/v1", "name": "example/Kind/v1"},
            "data": {"type": "object", "required": ["host"]}
        }))]);

        let good = doc(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x",
                         "layeringDefinition": {"layer": "site"}},
            "data": {"host": "a"}
        }));
        assert!(validate_data(&good, &reg, false).is_empty());

        let bad = good.with_data(json!({}));
        let errors = validate_data(&bad, &reg, false);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::DataInvalid);
        match &errors[0] {
            Error::DataInvalid { pointer, .. } => assert_eq!(pointer, "/data"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_data_validation_skipped_for_abstract_documents() {
        let mut reg = registry();
        reg.register_data_schemas(&[doc(json!({
            "schema": "deckhand/DataSchema/v1",
            "metadata": {"schema": "metadata/Control/v1", "name": "example/Kind/v1"},
            "data": {"type": "object", "required": ["host"]}
        }))]);

        let abstract_doc = doc(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x",
                         "layeringDefinition": {"layer": "global", "abstract": true}},
            "data": {}
        }));
        assert!(validate_data(&abstract_doc, &reg, false).is_empty());
    }

    #[test]
    fn test_unregistered_kind_passes_unless_strict() {
        let d = doc(json!({
            "schema": "example/Unknown/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x",
                         "layeringDefinition": {"layer": "site"}},
            "data": {}
        }));
        assert!(validate_data(&d, &registry(), false).is_empty());

        let errors = validate_data(&d, &registry(), true);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::UnknownKind);
    }
}
