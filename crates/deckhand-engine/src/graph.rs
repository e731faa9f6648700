//! The per-operation dependency graph driving render evaluation.
//!
//! Every document contributes a chain of operation nodes
//! (`source → structural → [layer] → [substitute] → render → [validate]`)
//! plus cross-document edges: parents must render before a child layers,
//! substitution sources must validate before their consumers substitute, and
//! the layering policy must validate before anything else is structurally
//! accepted. Evaluation walks the ancestor subgraph of each requested output
//! node in topological order; failures block descendants rather than
//! aborting the pass.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use deckhand_types::{Document, DATA_SCHEMA_SCHEMA};

use crate::layering::{find_parents, LayerOrder};

/// Name of the placeholder parent node fed to layer nodes whose parent
/// resolution came up empty. The placeholder never renders a document, so
/// the dependent layer operation fails with a missing-parent error.
pub const MISSING_PARENT_NAME: &str = "MISSING";

//─────────────────────────────
//  Node tags
//─────────────────────────────

/// The per-document operations, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    /// Placeholder for the raw input document.
    Source,
    /// Structural and metadata validation.
    Structural,
    /// Layering onto the parent's rendered data.
    Layer,
    /// Substitution of referenced values.
    Substitute,
    /// Placeholder for the final (possibly abstract) data.
    Render,
    /// Post-render data validation.
    Validate,
}

impl OpKind {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Source => "source",
            OpKind::Structural => "structural",
            OpKind::Layer => "layer",
            OpKind::Substitute => "substitute",
            OpKind::Render => "render",
            OpKind::Validate => "validate",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one operation on one document: `(op, schema, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeTag {
    /// The operation.
    pub op: OpKind,
    /// `schema` of the document operated on.
    pub schema: String,
    /// `metadata.name` of the document operated on.
    pub name: String,
}

impl NodeTag {
    /// Builds a tag from raw parts.
    pub fn new(op: OpKind, schema: &str, name: &str) -> Self {
        Self {
            op,
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    /// Builds a tag for an operation on `doc`.
    pub fn of(op: OpKind, doc: &Document) -> Self {
        Self::new(op, doc.schema(), doc.name())
    }

    /// The `(schema, name)` identity, without the operation.
    pub fn identity(&self) -> (&str, &str) {
        (&self.schema, &self.name)
    }
}

impl std::fmt::Display for NodeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.op, self.schema, self.name)
    }
}

//─────────────────────────────
//  Graph
//─────────────────────────────

/// Directed acyclic graph of operation nodes; edges mean "must complete
/// before".
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    preds: BTreeMap<NodeTag, BTreeSet<NodeTag>>,
    succs: BTreeMap<NodeTag, BTreeSet<NodeTag>>,
}

impl DependencyGraph {
    /// Builds the graph for a document set under a valid layering policy.
    pub fn build(documents: &[Document], policy: &Document, order: &LayerOrder) -> Self {
        let mut graph = Self::default();
        let policy_validate = NodeTag::of(OpKind::Validate, policy);

        for doc in documents {
            let structural = NodeTag::of(OpKind::Structural, doc);
            graph.add_edge(NodeTag::of(OpKind::Source, doc), structural.clone());
            // Control documents stand outside the policy's blast radius;
            // everything else re-validates when the policy changes.
            if !doc.is_control() {
                graph.add_edge(policy_validate.clone(), structural.clone());
            }
            let mut prev = structural;

            // Layering is required by position, not by declaration: any
            // ordinary document in a non-root layer must resolve a parent,
            // even when it forgot to declare parentSelector/actions.
            let needs_layering = doc.has_layering()
                || doc
                    .layer()
                    .map(|layer| {
                        doc.is_ordinary()
                            && order.contains(&layer)
                            && !order.is_root_layer(&layer)
                    })
                    .unwrap_or(false);

            if needs_layering {
                let layer = NodeTag::of(OpKind::Layer, doc);
                graph.add_edge(prev, layer.clone());

                // Without a parentSelector there is nothing to resolve
                // against; the placeholder fails the branch on evaluation.
                let parents = if doc.has_layering() {
                    find_parents(doc, documents, order)
                } else {
                    Vec::new()
                };
                if parents.is_empty() {
                    graph.add_edge(
                        NodeTag::new(OpKind::Render, doc.schema(), MISSING_PARENT_NAME),
                        layer.clone(),
                    );
                } else {
                    for parent in parents {
                        graph.add_edge(NodeTag::of(OpKind::Render, parent), layer.clone());
                    }
                }
                prev = layer;
            }

            let substitutions = doc.substitutions();
            if !substitutions.is_empty() {
                let substitute = NodeTag::of(OpKind::Substitute, doc);
                graph.add_edge(prev, substitute.clone());
                for sub in &substitutions {
                    graph.add_edge(
                        NodeTag::new(OpKind::Validate, &sub.src.schema, &sub.src.name),
                        substitute.clone(),
                    );
                }
                prev = substitute;
            }

            let render = NodeTag::of(OpKind::Render, doc);
            graph.add_edge(prev, render.clone());

            if !doc.is_abstract() {
                let validate = NodeTag::of(OpKind::Validate, doc);
                graph.add_edge(render, validate.clone());
                graph.add_edge(
                    NodeTag::new(OpKind::Render, DATA_SCHEMA_SCHEMA, doc.schema()),
                    validate,
                );
            }
        }

        graph
    }

    fn add_edge(&mut self, from: NodeTag, to: NodeTag) {
        self.succs.entry(from.clone()).or_default().insert(to.clone());
        self.preds.entry(to.clone()).or_default().insert(from.clone());
        self.preds.entry(from).or_default();
        self.succs.entry(to).or_default();
    }

    /// All nodes, in deterministic order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeTag> {
        self.preds.keys()
    }

    /// Direct predecessors of `node`.
    pub fn predecessors(&self, node: &NodeTag) -> impl Iterator<Item = &NodeTag> {
        self.preds.get(node).into_iter().flatten()
    }

    /// Every node reachable walking edges backwards from `node`.
    pub fn ancestors(&self, node: &NodeTag) -> BTreeSet<NodeTag> {
        self.walk(node, &self.preds)
    }

    /// Every node reachable walking edges forwards from `node`.
    pub fn descendants(&self, node: &NodeTag) -> BTreeSet<NodeTag> {
        self.walk(node, &self.succs)
    }

    fn walk(
        &self,
        start: &NodeTag,
        edges: &BTreeMap<NodeTag, BTreeSet<NodeTag>>,
    ) -> BTreeSet<NodeTag> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&NodeTag> = VecDeque::new();
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            for next in edges.get(current).into_iter().flatten() {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Topologically sorts the induced subgraph over `scope`.
    ///
    /// Kahn's algorithm with an ordered ready set, so two renders of the
    /// same revision walk nodes in exactly the same order.
    pub fn topological_order(&self, scope: &BTreeSet<NodeTag>) -> Vec<NodeTag> {
        let mut in_degree: BTreeMap<&NodeTag, usize> = scope
            .iter()
            .map(|node| {
                let degree = self
                    .preds
                    .get(node)
                    .map(|preds| preds.iter().filter(|p| scope.contains(*p)).count())
                    .unwrap_or(0);
                (node, degree)
            })
            .collect();

        let mut ready: BTreeSet<&NodeTag> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut order = Vec::with_capacity(scope.len());
        while let Some(node) = ready.iter().next().copied() {
            ready.remove(node);
            order.push(node.clone());
            for next in self.succs.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(next);
                    }
                }
            }
        }
        order
    }

    /// Reports every non-trivial strongly connected component.
    ///
    /// Each returned group is one cycle's participating nodes, sorted; the
    /// groups themselves are sorted by their first node. A self-loop counts
    /// as a cycle of one.
    pub fn cycles(&self) -> Vec<Vec<NodeTag>> {
        let mut components = self.strongly_connected_components();
        components.retain(|component| {
            component.len() > 1
                || component.iter().any(|node| {
                    self.succs
                        .get(node)
                        .map(|succs| succs.contains(node))
                        .unwrap_or(false)
                })
        });
        for component in &mut components {
            component.sort();
        }
        components.sort();
        components
    }

    /// Iterative Tarjan over the whole graph.
    fn strongly_connected_components(&self) -> Vec<Vec<NodeTag>> {
        #[derive(Default)]
        struct State {
            index: BTreeMap<NodeTag, usize>,
            lowlink: BTreeMap<NodeTag, usize>,
            on_stack: BTreeSet<NodeTag>,
            stack: Vec<NodeTag>,
            next_index: usize,
            components: Vec<Vec<NodeTag>>,
        }

        enum Frame<'g> {
            Enter(&'g NodeTag),
            Exit(&'g NodeTag),
        }

        let mut state = State::default();

        for root in self.preds.keys() {
            if state.index.contains_key(root) {
                continue;
            }
            let mut frames = vec![Frame::Enter(root)];
            while let Some(frame) = frames.pop() {
                match frame {
                    Frame::Enter(node) => {
                        if state.index.contains_key(node) {
                            continue;
                        }
                        state.index.insert(node.clone(), state.next_index);
                        state.lowlink.insert(node.clone(), state.next_index);
                        state.next_index += 1;
                        state.stack.push(node.clone());
                        state.on_stack.insert(node.clone());

                        frames.push(Frame::Exit(node));
                        for next in self.succs.get(node).into_iter().flatten() {
                            if !state.index.contains_key(next) {
                                frames.push(Frame::Enter(next));
                            }
                        }
                    }
                    Frame::Exit(node) => {
                        let mut low = state.lowlink[node];
                        for next in self.succs.get(node).into_iter().flatten() {
                            if state.on_stack.contains(next) {
                                low = low.min(state.lowlink[next]);
                            }
                        }
                        state.lowlink.insert(node.clone(), low);

                        if low == state.index[node] {
                            let mut component = Vec::new();
                            while let Some(member) = state.stack.pop() {
                                state.on_stack.remove(&member);
                                let done = member == *node;
                                component.push(member);
                                if done {
                                    break;
                                }
                            }
                            state.components.push(component);
                        }
                    }
                }
            }
        }

        state.components
    }
}
