//! Schema registry: the root structural schema, per-kind metadata schemas,
//! and runtime-registered data schemas.
//!
//! All schemas are JSON Schema draft-07, compiled once and shared via `Arc`.
//! A registry clone is cheap, and every render session works on its own
//! clone so `DataSchema` documents registered for one revision never leak
//! into concurrent renders.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::debug;

use deckhand_types::{
    kind_prefix, Document, Error, DATA_SCHEMA_SCHEMA, METADATA_CONTROL_SCHEMA,
    METADATA_DOCUMENT_SCHEMA,
};

//─────────────────────────────
//  Compiled schema
//─────────────────────────────

/// A compiled draft-07 schema together with its source definition.
#[derive(Debug)]
pub struct CompiledSchema {
    name: String,
    raw: Value,
    compiled: JSONSchema,
}

impl CompiledSchema {
    fn compile(name: &str, raw: Value) -> Result<Self, String> {
        let compiled = match JSONSchema::options().with_draft(Draft::Draft7).compile(&raw) {
            Ok(compiled) => compiled,
            Err(e) => return Err(e.to_string()),
        };
        Ok(Self {
            name: name.to_string(),
            raw,
            compiled,
        })
    }

    /// The registration name of this schema.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw schema definition.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Validates `instance`, returning one `(json-pointer, message)` pair
    /// per violation. An empty result means the instance conforms.
    pub fn violations(&self, instance: &Value) -> Vec<(String, String)> {
        match self.compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    let pointer = e.instance_path.to_string();
                    let pointer = if pointer.is_empty() {
                        "/".to_string()
                    } else {
                        pointer
                    };
                    (pointer, e.to_string())
                })
                .collect(),
        }
    }
}

//─────────────────────────────
//  Built-in definitions
//─────────────────────────────

fn root_schema_definition() -> Value {
    json!({
        "type": "object",
        "properties": {
            "schema": {
                "type": "string",
                "pattern": "^[A-Za-z0-9_-]+/[A-Za-z0-9_-]+/v[0-9]+(\\.[0-9]+)?$"
            },
            "metadata": {
                "type": "object",
                "properties": {
                    "schema": {"type": "string"},
                    "name": {"type": "string"}
                },
                "additionalProperties": true,
                "required": ["schema", "name"]
            },
            "data": {}
        },
        "additionalProperties": false,
        "required": ["schema", "metadata"]
    })
}

fn metadata_document_definition() -> Value {
    json!({
        "type": "object",
        "properties": {
            "schema": {"type": "string"},
            "name": {"type": "string"},
            "labels": {
                "type": "object",
                "additionalProperties": {"type": "string"}
            },
            "layeringDefinition": {
                "type": "object",
                "properties": {
                    "layer": {"type": "string"},
                    "abstract": {"type": "boolean"},
                    "parentSelector": {
                        "type": "object",
                        "additionalProperties": {"type": "string"}
                    },
                    "actions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {"type": "string"},
                                "method": {"type": "string"}
                            },
                            "required": ["path", "method"]
                        }
                    }
                },
                "required": ["layer"]
            },
            "substitutions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "src": {
                            "type": "object",
                            "properties": {
                                "schema": {"type": "string"},
                                "name": {"type": "string"},
                                "path": {"type": "string"}
                            },
                            "required": ["schema", "name"]
                        },
                        "dest": {
                            "oneOf": [
                                {"$ref": "#/definitions/dest"},
                                {
                                    "type": "array",
                                    "items": {"$ref": "#/definitions/dest"}
                                }
                            ]
                        }
                    },
                    "required": ["src", "dest"]
                }
            },
            "storagePolicy": {"enum": ["cleartext", "encrypted"]}
        },
        "definitions": {
            "dest": {
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "pattern": {"type": "string"}
                },
                "required": ["path"]
            }
        },
        "additionalProperties": true,
        "required": ["schema", "name", "layeringDefinition"]
    })
}

fn metadata_control_definition() -> Value {
    json!({
        "type": "object",
        "properties": {
            "schema": {"type": "string"},
            "name": {"type": "string"},
            // Control documents sit outside the layering hierarchy.
            "layeringDefinition": false
        },
        "additionalProperties": true,
        "required": ["schema", "name"]
    })
}

fn layering_policy_data_definition() -> Value {
    json!({
        "type": "object",
        "properties": {
            "layerOrder": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["layerOrder"]
    })
}

fn data_schema_data_definition() -> Value {
    json!({"type": "object"})
}

static BUILTINS: Lazy<SchemaRegistry> = Lazy::new(|| {
    SchemaRegistry::try_with_builtins().expect("built-in schema definitions compile")
});

//─────────────────────────────
//  Registry
//─────────────────────────────

/// Lookup table from documents to their governing schemas.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    root: Arc<CompiledSchema>,
    metadata: HashMap<String, Arc<CompiledSchema>>,
    data: HashMap<String, Arc<CompiledSchema>>,
}

impl SchemaRegistry {
    /// A registry holding the root structural schema, the two metadata
    /// schemas, and built-in data schemas for the control kinds.
    pub fn with_builtins() -> Self {
        BUILTINS.clone()
    }

    fn try_with_builtins() -> Result<Self, String> {
        let mut metadata = HashMap::new();
        metadata.insert(
            METADATA_DOCUMENT_SCHEMA.to_string(),
            Arc::new(CompiledSchema::compile(
                METADATA_DOCUMENT_SCHEMA,
                metadata_document_definition(),
            )?),
        );
        metadata.insert(
            METADATA_CONTROL_SCHEMA.to_string(),
            Arc::new(CompiledSchema::compile(
                METADATA_CONTROL_SCHEMA,
                metadata_control_definition(),
            )?),
        );

        let mut data = HashMap::new();
        data.insert(
            "deckhand/LayeringPolicy".to_string(),
            Arc::new(CompiledSchema::compile(
                "deckhand/LayeringPolicy",
                layering_policy_data_definition(),
            )?),
        );
        data.insert(
            "deckhand/DataSchema".to_string(),
            Arc::new(CompiledSchema::compile(
                "deckhand/DataSchema",
                data_schema_data_definition(),
            )?),
        );

        Ok(Self {
            root: Arc::new(CompiledSchema::compile("root", root_schema_definition())?),
            metadata,
            data,
        })
    }

    /// The root structural schema every document must satisfy.
    pub fn root_schema(&self) -> &CompiledSchema {
        &self.root
    }

    /// The metadata schema registered under `metadata.schema`, if any.
    pub fn metadata_schema_for(&self, metadata_schema: &str) -> Option<&CompiledSchema> {
        self.metadata.get(metadata_schema).map(Arc::as_ref)
    }

    /// The data schema governing documents of `schema_id`'s kind, if any.
    ///
    /// Lookup strips the `/vX.Y` suffix, so `example/Chart/v1` resolves the
    /// registration made for `example/Chart`.
    pub fn data_schema_for(&self, schema_id: &str) -> Option<&CompiledSchema> {
        self.data.get(kind_prefix(schema_id)).map(Arc::as_ref)
    }

    /// Registers a single `DataSchema` document's data as the schema for the
    /// kind named by the document.
    pub fn register_data_schema(&mut self, doc: &Document) -> Result<(), Error> {
        let kind = kind_prefix(doc.name()).to_string();
        let compiled =
            CompiledSchema::compile(&kind, doc.data().clone()).map_err(|detail| {
                Error::DataInvalid {
                    document: doc.full_name(),
                    pointer: "/data".to_string(),
                    detail: format!("not a valid draft-07 schema: {detail}"),
                }
            })?;
        debug!(%kind, document = %doc.full_name(), "registered data schema");
        self.data.insert(kind, Arc::new(compiled));
        Ok(())
    }

    /// Registers every `DataSchema` document in `documents`, returning the
    /// errors of the ones that failed to compile.
    pub fn register_data_schemas(&mut self, documents: &[Document]) -> Vec<Error> {
        let mut errors = Vec::new();
        for doc in documents {
            if doc.schema() != DATA_SCHEMA_SCHEMA {
                continue;
            }
            if let Err(e) = self.register_data_schema(doc) {
                errors.push(e);
            }
        }
        errors
    }
}
