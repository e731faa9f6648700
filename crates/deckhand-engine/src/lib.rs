#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **deckhand-engine** – The rendering pipeline of Deckhand.
//!
//! An [`Engine`] takes the documents of one revision and computes their
//! fully rendered form: structural validation, layering onto parents,
//! substitution of referenced (possibly encrypted) values, and post-render
//! data validation. Execution is driven by a dependency graph whose
//! topological order guarantees parents render before children layer and
//! sources validate before consumers substitute; a failing operation blocks
//! only its descendants, so one pass reports every problem in the set.
//!
//! Rendering the same revision twice produces identical output. The
//! evaluator yields between graph nodes, so dropping the returned future
//! (client disconnect, `tokio::time::timeout`) cancels the render at the
//! next node boundary without partial side effects.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use deckhand_secrets::SecretStore;
use deckhand_types::{Document, Error, RenderFailure};

pub mod cache;
pub mod filter;
pub mod graph;
pub mod layering;
pub mod path;
pub mod render;
pub mod schema;
pub mod substitution;
pub mod validation;

pub use cache::RenderCache;
pub use filter::DocumentFilter;
pub use graph::{DependencyGraph, NodeTag, OpKind};
pub use render::Renderer;
pub use schema::SchemaRegistry;

use graph::MISSING_PARENT_NAME;
use layering::LayerOrder;
use substitution::SourceKey;

//─────────────────────────────
//  Options
//─────────────────────────────

/// Tunable policy knobs for a render session.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Whether a substitution whose source document is absent fails the
    /// consumer (default) or is logged and skipped.
    pub substitution_sources_required: bool,
    /// Whether documents of a kind with no registered data schema are
    /// rejected with `unknown-kind` instead of passing unvalidated.
    pub strict_data_schemas: bool,
    /// Wall-clock budget callers should apply to [`Engine::render`] (via
    /// `tokio::time::timeout`); the evaluator itself only guarantees
    /// cancellation lands on a node boundary.
    pub render_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            substitution_sources_required: true,
            strict_data_schemas: false,
            render_timeout: Duration::from_secs(60),
        }
    }
}

//─────────────────────────────
//  Engine
//─────────────────────────────

/// A render session over one revision's documents.
///
/// Construction registers the revision's `DataSchema` documents into a
/// session-local clone of the registry, resolves the layering policy and
/// builds the dependency graph. The session holds no interior mutability:
/// concurrent renders of different revisions never observe each other's
/// schema registrations.
pub struct Engine {
    documents: Vec<Document>,
    registry: SchemaRegistry,
    secrets: Arc<dyn SecretStore>,
    options: EngineOptions,
    order: Option<LayerOrder>,
    graph: Option<DependencyGraph>,
    setup_errors: Vec<Error>,
}

impl Engine {
    /// Builds a render session for `documents`.
    ///
    /// Problems that poison the whole revision (duplicate identities, a
    /// missing or malformed layering policy, uncompilable `DataSchema`
    /// documents) are recorded and reported by the first render call
    /// instead of panicking here.
    pub fn new(
        documents: Vec<Document>,
        registry: SchemaRegistry,
        secrets: Arc<dyn SecretStore>,
        options: EngineOptions,
    ) -> Self {
        let mut registry = registry;
        let mut setup_errors = Vec::new();

        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        for doc in &documents {
            let identity = (doc.schema().to_string(), doc.name().to_string());
            if !seen.insert(identity) {
                setup_errors.push(Error::Conflict {
                    detail: format!("duplicate document identity {}", doc.full_name()),
                });
            }
        }

        setup_errors.extend(registry.register_data_schemas(&documents));

        let mut order = None;
        let mut graph = None;
        match layering::extract_layering_policy(&documents) {
            Ok(policy) => match LayerOrder::from_policy(policy) {
                Ok(layer_order) => {
                    graph = Some(DependencyGraph::build(&documents, policy, &layer_order));
                    order = Some(layer_order);
                }
                Err(e) => setup_errors.push(e),
            },
            Err(e) => setup_errors.push(e),
        }

        Self {
            documents,
            registry,
            secrets,
            options,
            order,
            graph,
            setup_errors,
        }
    }

    /// The documents this session was built over, unrendered.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Renders every concrete document in the revision.
    pub async fn render_all(&self) -> Result<Vec<Document>, RenderFailure> {
        self.render(&DocumentFilter::all()).await
    }

    /// Renders the concrete documents matching `filter`.
    ///
    /// Returns the rendered documents in input order on success, or every
    /// error accumulated across the pass. Abstract documents participate as
    /// layering parents and never appear in the output.
    pub async fn render(&self, filter: &DocumentFilter) -> Result<Vec<Document>, RenderFailure> {
        if !self.setup_errors.is_empty() {
            return Err(self.failure(self.setup_errors.clone()));
        }
        let (Some(graph), Some(order)) = (self.graph.as_ref(), self.order.as_ref()) else {
            // Unreachable: a missing graph always comes with a setup error.
            return Err(self.failure(vec![Error::LayeringPolicyMissing]));
        };

        let cycle_errors: Vec<Error> = graph
            .cycles()
            .into_iter()
            .map(|cycle| Error::CycleDetected {
                nodes: cycle.iter().map(NodeTag::to_string).collect(),
            })
            .collect();
        if !cycle_errors.is_empty() {
            return Err(self.failure(cycle_errors));
        }

        let targets: Vec<NodeTag> = self
            .documents
            .iter()
            .filter(|d| !d.is_abstract() && filter.matches(d))
            .map(|d| NodeTag::of(OpKind::Validate, d))
            .collect();

        let mut workspace: HashMap<NodeTag, Document> = self
            .documents
            .iter()
            .map(|d| (NodeTag::of(OpKind::Source, d), d.clone()))
            .collect();

        let mut errors: Vec<Error> = Vec::new();
        let mut completed: BTreeSet<NodeTag> = BTreeSet::new();
        let mut blocked: BTreeSet<NodeTag> = BTreeSet::new();

        for target in &targets {
            let mut scope = graph.ancestors(target);
            scope.insert(target.clone());

            for node in graph.topological_order(&scope) {
                if completed.contains(&node) || blocked.contains(&node) {
                    continue;
                }
                // Cancellation boundary: a dropped render future stops here.
                tokio::task::yield_now().await;

                let node_errors = self.execute(graph, order, &node, &mut workspace).await;
                if node_errors.is_empty() {
                    completed.insert(node);
                } else {
                    debug!(%node, count = node_errors.len(), "operation failed; blocking descendants");
                    errors.extend(node_errors);
                    blocked.insert(node.clone());
                    blocked.extend(graph.descendants(&node));
                }
            }
        }

        if errors.is_empty() {
            Ok(targets
                .iter()
                .filter_map(|target| workspace.get(target).cloned())
                .collect())
        } else {
            Err(self.failure(errors))
        }
    }

    fn failure(&self, errors: Vec<Error>) -> RenderFailure {
        RenderFailure::new(substitution::sanitize_errors(errors, &self.documents))
    }

    /// Executes a single operation node against the workspace.
    async fn execute(
        &self,
        graph: &DependencyGraph,
        order: &LayerOrder,
        node: &NodeTag,
        workspace: &mut HashMap<NodeTag, Document>,
    ) -> Vec<Error> {
        // Gather this document (the predecessor sharing our identity) and
        // the other documents feeding this node.
        let mut this_doc: Option<Document> = None;
        let mut others: Vec<(NodeTag, Document)> = Vec::new();
        for pred in graph.predecessors(node) {
            if let Some(doc) = workspace.get(pred) {
                if pred.identity() == node.identity() {
                    this_doc = Some(doc.clone());
                } else {
                    others.push((pred.clone(), doc.clone()));
                }
            }
        }

        match node.op {
            // Sources are seeded into the workspace up front.
            OpKind::Source => Vec::new(),

            OpKind::Structural => {
                let Some(doc) = this_doc else {
                    return Vec::new();
                };
                let mut errors = validation::validate_structure(&doc, &self.registry);
                if errors.is_empty() {
                    if let Some(layer) = doc.layer() {
                        if doc.is_ordinary() && !order.contains(&layer) {
                            errors.push(Error::StructuralInvalid {
                                document: doc.full_name(),
                                pointer: "/metadata/layeringDefinition/layer".to_string(),
                                detail: format!("layer {layer:?} is not in the layerOrder"),
                            });
                        }
                    }
                }
                if errors.is_empty() {
                    workspace.insert(node.clone(), doc);
                }
                errors
            }

            OpKind::Layer => {
                let Some(doc) = this_doc else {
                    return Vec::new();
                };
                self.execute_layer(&doc, &others, node, workspace)
            }

            OpKind::Substitute => {
                let Some(doc) = this_doc else {
                    return Vec::new();
                };
                let sources: HashMap<SourceKey, Document> = others
                    .into_iter()
                    .map(|(tag, d)| ((tag.schema, tag.name), d))
                    .collect();
                match substitution::apply_substitutions(
                    &doc,
                    &sources,
                    self.secrets.as_ref(),
                    self.options.substitution_sources_required,
                )
                .await
                {
                    Ok(updated) => {
                        workspace.insert(node.clone(), updated);
                        Vec::new()
                    }
                    Err(errors) => errors,
                }
            }

            // Placeholder render nodes (missing parents, unregistered data
            // schema kinds) have no document and publish nothing.
            OpKind::Render => {
                if let Some(doc) = this_doc {
                    workspace.insert(node.clone(), doc);
                }
                Vec::new()
            }

            OpKind::Validate => {
                let Some(doc) = this_doc else {
                    return Vec::new();
                };
                let errors = validation::validate_data(
                    &doc,
                    &self.registry,
                    self.options.strict_data_schemas,
                );
                if errors.is_empty() {
                    workspace.insert(node.clone(), doc);
                }
                errors
            }
        }
    }

    fn execute_layer(
        &self,
        doc: &Document,
        others: &[(NodeTag, Document)],
        node: &NodeTag,
        workspace: &mut HashMap<NodeTag, Document>,
    ) -> Vec<Error> {
        let parents: Vec<&Document> = others
            .iter()
            .filter(|(tag, _)| tag.op == OpKind::Render && tag.name != MISSING_PARENT_NAME)
            .map(|(_, d)| d)
            .collect();

        let parent = match parents.as_slice() {
            [] => {
                return vec![Error::MissingParent {
                    document: doc.full_name(),
                }]
            }
            [parent] => parent,
            many => {
                return vec![Error::IndeterminateParent {
                    document: doc.full_name(),
                    candidates: many.len(),
                }]
            }
        };

        let mut working = parent.data().clone();
        let definition = doc.layering_definition().unwrap_or_default();
        for action in &definition.actions {
            if let Err(e) = layering::apply_action(action, doc, &mut working) {
                // Later actions would operate on an inconsistent copy.
                return vec![e];
            }
        }

        workspace.insert(node.clone(), doc.with_data(working));
        Vec::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("documents", &self.documents.len())
            .field("setup_errors", &self.setup_errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_secrets::MemorySecretStore;
    use deckhand_types::ErrorKind;
    use serde_json::json;

    fn policy() -> Document {
        Document::from_value(json!({
            "schema": "deckhand/LayeringPolicy/v1",
            "metadata": {"schema": "metadata/Control/v1", "name": "layering-policy"},
            "data": {"layerOrder": ["global", "site"]}
        }))
    }

    fn engine(documents: Vec<Document>) -> Engine {
        Engine::new(
            documents,
            SchemaRegistry::with_builtins(),
            Arc::new(MemorySecretStore::new()),
            EngineOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_policy_rejects_render() {
        let doc = Document::from_value(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x",
                         "layeringDefinition": {"layer": "global"}},
            "data": {}
        }));
        let failure = engine(vec![doc]).render_all().await.unwrap_err();
        assert_eq!(failure.errors[0].kind(), ErrorKind::LayeringPolicyMissing);
        assert_eq!(failure.http_status(), 409);
    }

    #[tokio::test]
    async fn test_malformed_policy_rejects_render() {
        let bad_policy = Document::from_value(json!({
            "schema": "deckhand/LayeringPolicy/v1",
            "metadata": {"schema": "metadata/Control/v1", "name": "layering-policy"},
            "data": {"layerOrder": "not-a-list"}
        }));
        let failure = engine(vec![bad_policy]).render_all().await.unwrap_err();
        assert_eq!(
            failure.errors[0].kind(),
            ErrorKind::LayeringPolicyMalformed
        );
    }

    #[tokio::test]
    async fn test_duplicate_identity_conflict() {
        let doc = Document::from_value(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x",
                         "layeringDefinition": {"layer": "global"}},
            "data": {}
        }));
        let failure = engine(vec![policy(), doc.clone(), doc])
            .render_all()
            .await
            .unwrap_err();
        assert_eq!(failure.errors[0].kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_undeclared_layer_is_structural_error() {
        let doc = Document::from_value(json!({
            "schema": "example/Kind/v1",
            "metadata": {"schema": "metadata/Document/v1", "name": "x",
                         "layeringDefinition": {"layer": "mystery"}},
            "data": {}
        }));
        let failure = engine(vec![policy(), doc]).render_all().await.unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].kind(), ErrorKind::StructuralInvalid);
    }

    #[tokio::test]
    async fn test_mutual_substitution_is_cycle_detected() {
        let doc = |name: &str, other: &str| {
            Document::from_value(json!({
                "schema": "example/Kind/v1",
                "metadata": {
                    "schema": "metadata/Document/v1",
                    "name": name,
                    "layeringDefinition": {"layer": "global"},
                    "substitutions": [{
                        "src": {"schema": "example/Kind/v1", "name": other, "path": "."},
                        "dest": {"path": ".peer"}
                    }]
                },
                "data": {}
            }))
        };
        let failure = engine(vec![policy(), doc("a", "b"), doc("b", "a")])
            .render_all()
            .await
            .unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].kind(), ErrorKind::CycleDetected);
    }
}
