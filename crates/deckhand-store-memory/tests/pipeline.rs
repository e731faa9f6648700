//! Full pipeline tests: bucket writes through the revision store, rendering
//! of stored revisions, diffs and rollback.

use std::sync::Arc;

use serde_json::json;

use deckhand_engine::{DocumentFilter, Engine, EngineOptions, Renderer, SchemaRegistry};
use deckhand_secrets::{MemorySecretStore, SecretStore};
use deckhand_store_core::{BucketStatus, RevisionStore};
use deckhand_store_memory::MemoryRevisionStore;
use deckhand_types::{documents_from_yaml, Document};

fn policy_doc() -> Document {
    Document::from_value(json!({
        "schema": "deckhand/LayeringPolicy/v1",
        "metadata": {"schema": "metadata/Control/v1", "name": "layering-policy"},
        "data": {"layerOrder": ["global", "site"]}
    }))
}

fn simple_doc(name: &str, data: serde_json::Value) -> Document {
    Document::from_value(json!({
        "schema": "example/Kind/v1",
        "metadata": {"schema": "metadata/Document/v1", "name": name,
                     "layeringDefinition": {"layer": "global"}},
        "data": data,
    }))
}

async fn render_revision(
    store: &MemoryRevisionStore,
    secrets: Arc<dyn SecretStore>,
    revision: u64,
) -> Vec<Document> {
    let documents: Vec<Document> = store
        .documents(revision)
        .await
        .unwrap()
        .iter()
        .map(|row| row.document())
        .collect();
    Engine::new(
        documents,
        SchemaRegistry::with_builtins(),
        secrets,
        EngineOptions::default(),
    )
    .render_all()
    .await
    .unwrap()
}

#[tokio::test]
async fn bucket_diff_across_three_revisions() {
    let store = MemoryRevisionStore::new();

    // Revision 1: bucket b1. Revision 2: a distinct bucket b2.
    store
        .put_bucket("b1", vec![policy_doc(), simple_doc("one", json!(1))])
        .await
        .unwrap();
    store
        .put_bucket(
            "b2",
            vec![Document::from_value(json!({
                "schema": "example/Other/v1",
                "metadata": {"schema": "metadata/Document/v1", "name": "two",
                             "layeringDefinition": {"layer": "global"}},
                "data": 2,
            }))],
        )
        .await
        .unwrap();

    let d01 = store.diff(0, 1).await.unwrap();
    assert_eq!(d01.get("b1"), Some(&BucketStatus::Created));
    assert_eq!(d01.len(), 1);

    let d02 = store.diff(0, 2).await.unwrap();
    assert_eq!(d02.get("b1"), Some(&BucketStatus::Created));
    assert_eq!(d02.get("b2"), Some(&BucketStatus::Created));

    let d12 = store.diff(1, 2).await.unwrap();
    assert_eq!(d12.get("b1"), Some(&BucketStatus::Unmodified));
    assert_eq!(d12.get("b2"), Some(&BucketStatus::Created));
}

#[tokio::test]
async fn idempotent_write_returns_same_revision_and_no_changes() {
    let store = MemoryRevisionStore::new();
    let docs = vec![policy_doc(), simple_doc("one", json!({"v": 1}))];

    let first = store.put_bucket("b1", docs.clone()).await.unwrap();
    let second = store.put_bucket("b1", docs).await.unwrap();

    assert_eq!(first.revision_id, second.revision_id);
    assert!(!second.created_revision);
    assert!(second.changes.is_noop());
    assert_eq!(second.changes.unchanged.len(), 2);
}

#[tokio::test]
async fn stored_revision_renders_through_engine() {
    let store = MemoryRevisionStore::new();
    let yaml = r#"---
schema: deckhand/LayeringPolicy/v1
metadata:
  schema: metadata/Control/v1
  name: layering-policy
data:
  layerOrder:
    - global
    - site
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: global-settings
  labels:
    tier: global
  layeringDefinition:
    layer: global
data:
  a:
    x: 1
  b: 4
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: site-settings
  layeringDefinition:
    layer: site
    parentSelector:
      tier: global
    actions:
      - path: .
        method: merge
data:
  a:
    z: 3
"#;
    let outcome = store
        .put_bucket("site", documents_from_yaml(yaml).unwrap())
        .await
        .unwrap();

    let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
    let rendered = render_revision(&store, secrets, outcome.revision_id).await;

    let site = rendered.iter().find(|d| d.name() == "site-settings").unwrap();
    assert_eq!(site.data(), &json!({"a": {"x": 1, "z": 3}, "b": 4}));
}

#[tokio::test]
async fn encrypted_payload_roundtrips_through_substitution() {
    // Store-then-fetch: the passphrase payload never enters revision state,
    // yet the rendered consumer sees the original value.
    let secrets = Arc::new(MemorySecretStore::new());
    let store = MemoryRevisionStore::with_secret_store(secrets.clone());

    let yaml = r#"---
schema: deckhand/LayeringPolicy/v1
metadata:
  schema: metadata/Control/v1
  name: layering-policy
data:
  layerOrder:
    - global
---
schema: deckhand/Passphrase/v1
metadata:
  schema: metadata/Document/v1
  name: example-password
  storagePolicy: encrypted
  layeringDefinition:
    layer: global
data: original-payload
---
schema: example/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: consumer
  layeringDefinition:
    layer: global
  substitutions:
    - src:
        schema: deckhand/Passphrase/v1
        name: example-password
        path: .
      dest:
        path: .password
data: {}
"#;
    let outcome = store
        .put_bucket("secrets", documents_from_yaml(yaml).unwrap())
        .await
        .unwrap();

    // The persisted row holds a reference, not the payload.
    let rows = store.documents(outcome.revision_id).await.unwrap();
    let stored = rows.iter().find(|r| r.name == "example-password").unwrap();
    let stored_text = stored.data.as_str().unwrap();
    assert_ne!(stored_text, "original-payload");
    assert!(stored_text.contains("secrets"));

    // Rendering resolves the reference back to the original payload.
    let rendered = render_revision(&store, secrets, outcome.revision_id).await;
    let consumer = rendered.iter().find(|d| d.name() == "consumer").unwrap();
    assert_eq!(consumer.data(), &json!({"password": "original-payload"}));
}

#[tokio::test]
async fn rollback_rematerializes_target_revision() {
    let store = MemoryRevisionStore::new();
    store
        .put_bucket("b1", vec![policy_doc(), simple_doc("doc", json!({"v": 1}))])
        .await
        .unwrap();
    store
        .put_bucket("b1", vec![policy_doc(), simple_doc("doc", json!({"v": 2}))])
        .await
        .unwrap();

    let rolled = store.rollback(1).await.unwrap();
    assert_eq!(rolled.id, 3);

    // The rollback revision sees exactly revision 1's documents, and the
    // rows remember where their content first appeared.
    let rows = store.documents(3).await.unwrap();
    let doc_row = rows.iter().find(|r| r.name == "doc").unwrap();
    assert_eq!(doc_row.data, json!({"v": 1}));
    assert_eq!(doc_row.effective_revision(), 1);

    // Render of the rollback equals render of the target.
    let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
    let before = render_revision(&store, secrets.clone(), 1).await;
    let after = render_revision(&store, secrets, 3).await;
    assert_eq!(before, after);

    // And the diff between them is all-unmodified.
    let diff = store.diff(1, 3).await.unwrap();
    assert_eq!(diff.get("b1"), Some(&BucketStatus::Unmodified));
}

#[tokio::test]
async fn renderer_caches_renders_and_invalidates_on_writes() {
    let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
    let store = Arc::new(MemoryRevisionStore::new());
    let renderer = Renderer::new(store, secrets);

    let first_write = renderer
        .put_bucket("b1", vec![policy_doc(), simple_doc("doc", json!({"v": 1}))])
        .await
        .unwrap();

    let rendered = renderer
        .rendered_documents(first_write.revision_id, &DocumentFilter::all())
        .await
        .unwrap();
    assert_eq!(renderer.cached_revisions().await, 1);

    // A repeat render hits the cache and yields the identical result; a
    // filtered request reuses the same entry.
    let again = renderer
        .rendered_documents(first_write.revision_id, &DocumentFilter::all())
        .await
        .unwrap();
    assert_eq!(rendered, again);
    let filtered = renderer
        .rendered_documents(
            first_write.revision_id,
            &DocumentFilter::all().with_schema("example/Kind/v1"),
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].name(), "doc");

    // Minting a new revision drops the cache.
    let second_write = renderer
        .put_bucket("b1", vec![policy_doc(), simple_doc("doc", json!({"v": 2}))])
        .await
        .unwrap();
    assert!(second_write.created_revision);
    assert_eq!(renderer.cached_revisions().await, 0);

    // A no-op write leaves it alone.
    renderer
        .rendered_documents(second_write.revision_id, &DocumentFilter::all())
        .await
        .unwrap();
    renderer
        .put_bucket("b1", vec![policy_doc(), simple_doc("doc", json!({"v": 2}))])
        .await
        .unwrap();
    assert_eq!(renderer.cached_revisions().await, 1);

    // Rollback always mints a revision: cache dropped again.
    renderer.rollback(first_write.revision_id).await.unwrap();
    assert_eq!(renderer.cached_revisions().await, 0);
}

#[tokio::test]
async fn rollback_ignores_interim_deletions() {
    let store = MemoryRevisionStore::new();
    store
        .put_bucket(
            "b1",
            vec![
                policy_doc(),
                simple_doc("kept", json!(1)),
                simple_doc("dropped", json!(2)),
            ],
        )
        .await
        .unwrap();
    // Revision 2 deletes "dropped".
    store
        .put_bucket("b1", vec![policy_doc(), simple_doc("kept", json!(1))])
        .await
        .unwrap();

    // Rolling back to revision 1 resurrects the deleted document.
    store.rollback(1).await.unwrap();
    let rows = store.documents(3).await.unwrap();
    assert!(rows.iter().any(|r| r.name == "dropped"));
}
