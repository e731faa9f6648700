//! Round-trip tests over the wire formats: documents through YAML and the
//! error envelope through its serialized shape.

use deckhand_types::{documents_from_yaml, Document, Error, ErrorEnvelope};
use serde_json::json;

#[test]
fn document_survives_yaml_roundtrip_byte_for_byte() {
    let yaml = r#"schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: keystone
  labels:
    component: keystone
  layeringDefinition:
    layer: site
    parentSelector:
      tier: global
    actions:
      - path: .
        method: merge
  storagePolicy: cleartext
data:
  chart_name: keystone
  values:
    replicas: 3
"#;
    let docs = documents_from_yaml(yaml).unwrap();
    assert_eq!(docs.len(), 1);

    // The wrapper preserves the raw value exactly: serializing it back to
    // JSON and re-wrapping yields an equal document.
    let serialized = serde_json::to_value(&docs[0]).unwrap();
    let rewrapped = Document::from_value(serialized);
    assert_eq!(rewrapped, docs[0]);
    assert_eq!(rewrapped.data()["values"]["replicas"], json!(3));
}

#[test]
fn unknown_fields_are_preserved_not_dropped() {
    let docs = documents_from_yaml(
        "schema: example/Kind/v1\nmetadata:\n  schema: metadata/Document/v1\n  name: x\n  annotations:\n    custom: field\ndata: {}\n",
    )
    .unwrap();
    assert_eq!(
        docs[0].as_value()["metadata"]["annotations"]["custom"],
        json!("field")
    );
}

#[test]
fn envelope_roundtrips_through_yaml() {
    let envelope = ErrorEnvelope::failure(&[Error::RevisionNotFound { revision: 12 }]);

    let yaml = serde_yaml::to_string(&envelope).unwrap();
    let back: ErrorEnvelope = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, envelope);
    assert_eq!(back.code, "404");
    assert_eq!(back.reason, "revision-not-found");
}
