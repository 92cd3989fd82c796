//! In-memory [`DefinitionSource`].
//!
//! Documents are stored raw and checked against a JSON Schema when they are
//! looked up, so a broken definition is reported as a failure of the
//! assignment that uses it rather than aborting the load.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

use canopy_contracts::{
    document::PolicyDefinitionSource,
    error::{CanopyError, CanopyResult},
};

use crate::{parse::get_ignore_case, traits::DefinitionSource};

/// Envelope keys that may hold a definition id.
const ID_KEYS: &[&str] = &["id", "resourceId", "policyDefinitionId"];

/// Top-level keys of an export bundle that hold embedded definitions.
const BUNDLE_KEYS: &[&str] = &["policyDefinitions", "policySetDefinitions"];

/// Structural schema for definitions and initiatives.
fn definition_schema() -> Value {
    json!({
        "type": "object",
        "required": ["properties"],
        "properties": {
            "properties": {
                "type": "object",
                "properties": {
                    "parameters": { "type": "object" },
                    "policyRule": {
                        "type": "object",
                        "required": ["if", "then"],
                        "properties": {
                            "if": { "type": "object" },
                            "then": {
                                "type": "object",
                                "required": ["effect"],
                                "properties": { "effect": { "type": "string" } }
                            }
                        }
                    },
                    "policyDefinitions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["policyDefinitionId"],
                            "properties": { "policyDefinitionId": { "type": "string" } }
                        }
                    }
                },
                "anyOf": [
                    { "required": ["policyRule"] },
                    { "required": ["policyDefinitions"] }
                ]
            }
        }
    })
}

/// Validate `document` against the definition schema.
pub fn validate_definition(document: &Value) -> CanopyResult<()> {
    let schema = definition_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|e| CanopyError::SchemaValidation {
        reason: format!("definition schema did not compile: {e}"),
    })?;

    let messages: Vec<String> = validator
        .iter_errors(document)
        .map(|error| format!("at '{}': {}", error.instance_path, error))
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(CanopyError::SchemaValidation {
            reason: messages.join("; "),
        })
    }
}

/// Definitions and initiatives keyed by id, case-insensitively.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    documents: HashMap<String, Value>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Add one definition document. A later document with the same id
    /// replaces the earlier one.
    pub fn insert(&mut self, document: Value) -> CanopyResult<()> {
        let document = normalize_envelope(document);
        let id = ID_KEYS
            .iter()
            .find_map(|key| document.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CanopyError::malformed("<unknown>", "definition document has no id"))?
            .to_string();
        if self.documents.insert(id.to_ascii_lowercase(), document).is_some() {
            debug!(definition_id = %id, "definition replaced");
        }
        Ok(())
    }

    /// Load a definition file: a single document, an array of documents, or
    /// an export bundle with `policyDefinitions`/`policySetDefinitions`.
    ///
    /// Returns the number of documents added.
    pub fn load(&mut self, value: &Value) -> CanopyResult<usize> {
        match value {
            Value::Array(items) => {
                let mut added = 0;
                for item in items {
                    added += self.load(item)?;
                }
                Ok(added)
            }
            Value::Object(obj) if get_ignore_case(obj, "properties").is_some() => {
                self.insert(value.clone())?;
                Ok(1)
            }
            Value::Object(_) => self.load_embedded(value),
            other => Err(CanopyError::ConfigError {
                reason: format!("expected a definition object or array, found {other}"),
            }),
        }
    }

    /// Load definitions embedded at the top level of an assignment export
    /// (`policyDefinitions` and `policySetDefinitions` arrays).
    pub fn load_embedded(&mut self, value: &Value) -> CanopyResult<usize> {
        let Some(obj) = value.as_object() else {
            return Ok(0);
        };
        let mut added = 0;
        for key in BUNDLE_KEYS {
            if let Some(Value::Array(items)) = get_ignore_case(obj, key) {
                for item in items {
                    self.insert(item.clone())?;
                    added += 1;
                }
            }
        }
        Ok(added)
    }
}

impl DefinitionSource for DefinitionStore {
    fn definition(&self, id: &str) -> CanopyResult<PolicyDefinitionSource> {
        let document = self
            .documents
            .get(&id.to_ascii_lowercase())
            .ok_or_else(|| CanopyError::DefinitionNotFound {
                definition_id: id.to_string(),
            })?;

        if let Err(err) = validate_definition(document) {
            warn!(definition_id = %id, error = %err, "definition failed schema validation");
            return Err(err);
        }

        serde_json::from_value(document.clone()).map_err(|e| CanopyError::malformed(id, e.to_string()))
    }
}

/// Lower-case the PascalCase envelope keys produced by PowerShell exports so
/// the schema sees one spelling.
fn normalize_envelope(document: Value) -> Value {
    let Value::Object(obj) = document else {
        return document;
    };
    let renamed = obj
        .into_iter()
        .map(|(key, value)| {
            let key = match key.as_str() {
                "Properties" => "properties".to_string(),
                "Id" | "ResourceId" => "id".to_string(),
                "PolicyDefinitionId" => "policyDefinitionId".to_string(),
                "Name" => "name".to_string(),
                _ => key,
            };
            (key, value)
        })
        .collect();
    Value::Object(renamed)
}
