//! `tabula-model` defines the in-memory computation model the compiler
//! middle end operates on.
//!
//! The crate is intentionally self-contained so it can be shared by:
//! - host frontends that build models from spreadsheet files
//! - the compiler middle end (rewriting, typing, folding, inlining)
//! - downstream code generators consuming the optimized model

mod cycles;
mod display;
mod expr;
mod model;
mod value;

pub use cycles::{verify_acyclic, CyclicReferenceError};
pub use display::ExprDisplay;
pub use expr::{
    ArrayShape, Bound, Expr, ExprKind, FoldDef, FoldSource, Function, Operator, ScopeDir,
    SwitchCase, DYNAMIC,
};
pub use model::{Binding, Cell, CellId, ComputationModel, Section, SectionId};
pub use value::{DataType, Value};
