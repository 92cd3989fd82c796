//! # canopy-compiler
//!
//! Compiles policy assignments, definitions, and initiatives into normalized
//! rules that a resource-document rule engine can evaluate offline.
//!
//! This crate provides:
//! - The `DefinitionSource` seam and an in-memory `DefinitionStore`
//! - The condition tree (`condition`), its parser, and parameter resolution
//! - Normalization, type extraction, and rule identity
//! - The `AssignmentVisitor` that drives one compilation run into a
//!   `CompilationContext`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use canopy_compiler::{AssignmentVisitor, CompilationContext, DefinitionStore};
//!
//! let mut store = DefinitionStore::new();
//! store.load(&definitions)?;
//! let visitor = AssignmentVisitor::new(Box::new(store));
//! let mut ctx = CompilationContext::new(options);
//! visitor.visit(&mut ctx, &assignment);
//! let rules = ctx.get_definitions();
//! ```

pub mod condition;
pub mod context;
pub mod extract;
pub mod identity;
pub mod metadata;
pub mod normalize;
pub mod parse;
pub mod resolver;
pub mod store;
pub mod traits;
pub mod visitor;

pub use condition::Condition;
pub use context::{CompilationContext, CompileFailure};
pub use resolver::ParameterScope;
pub use store::DefinitionStore;
pub use traits::DefinitionSource;
pub use visitor::{compile_definition, AssignmentVisitor};
