//! Input document types: policy assignments, definitions, and initiatives.
//!
//! These mirror the provider's native JSON shapes closely enough to be
//! deserialized straight from an export. Field names follow the REST API's
//! camelCase; the PascalCase spellings produced by PowerShell exports are
//! accepted as aliases on the envelope fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resource type used by initiative (policy set) definitions.
pub const POLICY_SET_TYPE: &str = "Microsoft.Authorization/policySetDefinitions";

/// A concrete value supplied for a parameter: `{ "value": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    #[serde(alias = "Value")]
    pub value: Value,
}

// ── Assignment ────────────────────────────────────────────────────────────────

/// Binding of a policy or initiative to a scope with concrete parameter values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAssignment {
    /// Full resource id of the assignment, when exported.
    #[serde(default, alias = "Id", alias = "ResourceId")]
    pub id: Option<String>,

    /// Assignment name; unique within its scope.
    #[serde(alias = "Name")]
    pub name: String,

    #[serde(alias = "Properties")]
    pub properties: AssignmentProperties,
}

/// The `properties` block of an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentProperties {
    #[serde(default, alias = "DisplayName")]
    pub display_name: Option<String>,

    /// The definition or initiative this assignment applies.
    #[serde(alias = "PolicyDefinitionId")]
    pub policy_definition_id: String,

    #[serde(default, alias = "Scope")]
    pub scope: Option<String>,

    /// Assignment-level parameter overrides.
    #[serde(default, alias = "Parameters")]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl PolicyAssignment {
    /// The definition or initiative id referenced by this assignment.
    pub fn definition_id(&self) -> &str {
        &self.properties.policy_definition_id
    }

    /// Identifier used in logs and failure reports: the full id if present,
    /// otherwise the name.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Flatten `{ name: { value } }` into `{ name: value }`.
    pub fn parameter_overrides(&self) -> BTreeMap<String, Value> {
        self.properties
            .parameters
            .iter()
            .map(|(name, p)| (name.clone(), p.value.clone()))
            .collect()
    }
}

// ── Definition ────────────────────────────────────────────────────────────────

/// A policy definition or initiative, as fetched or loaded by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefinitionSource {
    #[serde(default, alias = "Id", alias = "ResourceId", alias = "PolicyDefinitionId")]
    pub id: String,

    #[serde(default, alias = "Name")]
    pub name: Option<String>,

    /// ARM resource type; distinguishes definitions from policy sets.
    #[serde(default, rename = "type", alias = "ResourceType")]
    pub resource_type: Option<String>,

    #[serde(alias = "Properties")]
    pub properties: DefinitionProperties,
}

/// The `properties` block shared by definitions and initiatives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionProperties {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// `All` or `Indexed` for single policies.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub metadata: DefinitionMetadata,

    /// Declared parameters with their defaults.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterDeclaration>,

    /// The `if`/`then` rule; absent for initiatives.
    #[serde(default)]
    pub policy_rule: Option<PolicyRule>,

    /// Member policies; present only on initiatives.
    #[serde(default)]
    pub policy_definitions: Vec<PolicyReference>,
}

/// Metadata fields the compiler carries into generated rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionMetadata {
    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

/// One declared parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDeclaration {
    /// Declared type (`String`, `Array`, `Integer`, `Boolean`, `Object`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default)]
    pub default_value: Option<Value>,

    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
}

/// The raw `policyRule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The condition tree, left as JSON for the compiler to parse.
    #[serde(rename = "if")]
    pub condition: Value,

    #[serde(rename = "then")]
    pub then: PolicyEffect,
}

/// The `then` block of a policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEffect {
    /// Effect name, or a template expression selecting it from a parameter.
    pub effect: String,

    #[serde(default)]
    pub details: Option<EffectDetails>,
}

/// `then.details` for the `*IfNotExists` effects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDetails {
    /// Related resource type that must exist.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub existence_condition: Option<Value>,
}

/// A member policy reference inside an initiative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReference {
    pub policy_definition_id: String,

    #[serde(default)]
    pub policy_definition_reference_id: Option<String>,

    /// Member parameter bindings, usually `[parameters('initiativeParam')]`.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl PolicyDefinitionSource {
    /// True when this document is an initiative rather than a single policy.
    pub fn is_initiative(&self) -> bool {
        let set_type = self
            .resource_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(POLICY_SET_TYPE));
        set_type || (self.properties.policy_rule.is_none() && !self.properties.policy_definitions.is_empty())
    }

    /// Display name, falling back to the name and then the id.
    pub fn display_name(&self) -> &str {
        self.properties
            .display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Declared default values, keyed by parameter name.
    pub fn parameter_defaults(&self) -> BTreeMap<String, Value> {
        self.properties
            .parameters
            .iter()
            .filter_map(|(name, decl)| decl.default_value.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}
