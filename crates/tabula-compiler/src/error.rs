use thiserror::Error;

use tabula_model::CyclicReferenceError;

/// Fatal compile-time failure.
///
/// Passes decorate errors with the owning cell as they unwind, so a caller
/// sees the failing expressions followed by "Cell containing expression
/// is X." context lines.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("{left} and {right} must have the same type")]
    TypeMismatch { left: String, right: String },

    #[error("cannot determine type of {expr}, arguments are untyped")]
    UntypedArguments { expr: String },

    #[error("unbound name '{name}' in {expr}")]
    UnboundName { name: String, expr: String },

    #[error("rewriting of {expr} did not terminate after {limit} steps")]
    RewriteDepthExceeded { expr: String, limit: u32 },

    #[error(transparent)]
    CyclicReference(#[from] CyclicReferenceError),

    #[error("{inner}\n{context}")]
    WithContext {
        context: String,
        #[source]
        inner: Box<CompilerError>,
    },
}

impl CompilerError {
    /// Appends a "Cell containing expression is X." context line.
    #[must_use]
    pub fn in_cell(self, cell_name: &str) -> CompilerError {
        CompilerError::WithContext {
            context: format!("Cell containing expression is {cell_name}."),
            inner: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn context_chain_renders_in_order() {
        let err = CompilerError::TypeMismatch {
            left: "\"a\"".to_string(),
            right: "1.0".to_string(),
        }
        .in_cell("Sum");
        assert_eq!(
            err.to_string(),
            "\"a\" and 1.0 must have the same type\nCell containing expression is Sum."
        );
    }
}
