//! Predicate over documents, mirroring the query parameters of the
//! documents endpoints (`schema`, `metadata.name`, label equality, layer,
//! abstract flag).

use std::collections::BTreeMap;

use deckhand_types::Document;

/// A conjunctive document predicate. The default filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    schema: Option<String>,
    name: Option<String>,
    labels: BTreeMap<String, String>,
    layer: Option<String>,
    is_abstract: Option<bool>,
}

impl DocumentFilter {
    /// A filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to documents of exactly this `schema`.
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Restricts to documents with this `metadata.name`.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Requires `metadata.labels[key] == value`.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Restricts to documents declaring this layer.
    pub fn with_layer(mut self, layer: &str) -> Self {
        self.layer = Some(layer.to_string());
        self
    }

    /// Restricts on the `layeringDefinition.abstract` flag.
    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = Some(is_abstract);
        self
    }

    /// Whether `doc` satisfies every configured predicate.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(schema) = &self.schema {
            if doc.schema() != schema {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if doc.name() != name {
                return false;
            }
        }
        if !self.labels.is_empty() && !doc.matches_labels(&self.labels) {
            return false;
        }
        if let Some(layer) = &self.layer {
            if doc.layer().as_deref() != Some(layer.as_str()) {
                return false;
            }
        }
        if let Some(is_abstract) = self.is_abstract {
            if doc.is_abstract() != is_abstract {
                return false;
            }
        }
        true
    }
}
