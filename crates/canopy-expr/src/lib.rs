//! # canopy-expr
//!
//! The expression layer of the Canopy policy compiler.
//!
//! - [`template`] parses bracketed template strings (`"[parameters('x')]"`).
//! - [`field`] models field paths and maps provider aliases to property paths.
//! - [`value`] is the value-expression model that compiled rules carry, with
//!   parameter binding, compile-time folding, and the `"$"` output form.
//! - [`classifier`] decides whether a raw parameter value can be inlined.

pub mod classifier;
pub mod field;
pub mod template;
pub mod value;

pub use classifier::{Classification, ExpressionClassifier, TokenClassifier};
pub use field::{FieldPath, Segment};
pub use value::{ContextFunction, Function, ValueExpression, EXPRESSION_MARKER};
