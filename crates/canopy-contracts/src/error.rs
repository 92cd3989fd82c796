//! Error types for the Canopy compilation pipeline.
//!
//! All fallible operations return `CanopyResult<T>`. A failure while compiling
//! one definition never aborts a batch: the orchestrator records the error
//! against the definition and moves on, so every variant carries enough
//! context to be reported on its own.

use thiserror::Error;

/// The unified error type for the Canopy crates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CanopyError {
    /// The definition document is missing required structure (`if`, `then`,
    /// `effect`) or contains a predicate shape that cannot be read.
    #[error("malformed definition '{definition_id}': {reason}")]
    MalformedDefinition { definition_id: String, reason: String },

    /// No `type` predicate could be found in the policy rule.
    #[error("definition '{definition_id}' does not target any resource type")]
    UnresolvableType { definition_id: String },

    /// After parameter substitution and extraction nothing evaluable remained.
    #[error("definition '{definition_id}' reduces to an empty condition")]
    EmptyCondition { definition_id: String },

    /// A field path could not be parsed.
    #[error("invalid field path '{path}': {reason}")]
    InvalidFieldPath { path: String, reason: String },

    /// A template expression is syntactically valid but uses a shape the
    /// compiler does not support (index access on a computed value, value
    /// counts, and similar).
    #[error("unsupported expression '{expression}': {reason}")]
    UnsupportedExpression { expression: String, reason: String },

    /// A template expression calls a function the value model does not know.
    #[error("unknown function '{name}' in expression")]
    UnknownFunction { name: String },

    /// An assignment or initiative references a definition that is not loaded.
    #[error("policy definition '{definition_id}' was not found")]
    DefinitionNotFound { definition_id: String },

    /// Options or configuration could not be read.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A definition document failed structural JSON Schema validation.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },
}

impl CanopyError {
    /// Build a `MalformedDefinition` error for `definition_id`.
    pub fn malformed(definition_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDefinition {
            definition_id: definition_id.into(),
            reason: reason.into(),
        }
    }

    /// Build an `UnsupportedExpression` error.
    pub fn unsupported(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedDefinition { .. } => "malformed-definition",
            Self::UnresolvableType { .. } => "unresolvable-type",
            Self::EmptyCondition { .. } => "empty-condition",
            Self::InvalidFieldPath { .. } => "invalid-field-path",
            Self::UnsupportedExpression { .. } => "unsupported-expression",
            Self::UnknownFunction { .. } => "unknown-function",
            Self::DefinitionNotFound { .. } => "definition-not-found",
            Self::ConfigError { .. } => "config-error",
            Self::SchemaValidation { .. } => "schema-validation",
        }
    }
}

/// Convenience alias used throughout the Canopy crates.
pub type CanopyResult<T> = Result<T, CanopyError>;
