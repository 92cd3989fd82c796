//! Seams between the compiler and its collaborators.
//!
//! Document retrieval is not the compiler's job: whoever drives a compilation
//! run supplies a [`DefinitionSource`] that can hand back a definition or
//! initiative by id. The expression classifier seam lives in `canopy-expr`
//! as [`ExpressionClassifier`](canopy_expr::ExpressionClassifier).

use canopy_contracts::{document::PolicyDefinitionSource, error::CanopyResult};

/// Provides policy definitions and initiatives by id.
///
/// Implementations must not perform I/O inside `definition()`; all documents
/// are expected to be loaded before a compilation run starts.
pub trait DefinitionSource: Send + Sync {
    /// Look up the definition or initiative with `id`.
    ///
    /// Returns `CanopyError::DefinitionNotFound` when no document has that id,
    /// and `CanopyError::SchemaValidation` or `MalformedDefinition` when the
    /// stored document cannot be read.
    fn definition(&self, id: &str) -> CanopyResult<PolicyDefinitionSource>;
}
