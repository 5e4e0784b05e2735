//! `tabula-compiler` transforms a [`tabula_model::ComputationModel`] built by
//! a host frontend into its optimized form:
//!
//! 1. acyclicity check
//! 2. rewriting: high-level spreadsheet functions lower to fold/reduce
//!    primitives via a rule store
//! 3. type annotation: every node and cell gets a data type
//! 4. constant folding under a chosen numeric representation
//! 5. reference counting from the output cells
//! 6. inlining of single-use intermediate cells
//!
//! [`transform::transform_model`] runs the whole pipeline; the passes are
//! also exposed individually.

pub mod analysis;
pub mod error;
pub mod fold;
pub mod inline;
pub mod interp;
pub mod refcount;
pub mod rewrite;
pub mod rules;
pub mod transform;

pub use error::CompilerError;
pub use rules::{ParamKind, RuleStore, StoreError};
pub use transform::{transform_model, NumericMode};
