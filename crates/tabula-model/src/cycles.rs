use thiserror::Error;

use crate::model::{CellId, ComputationModel};

/// A reference cycle among expression cells.
///
/// The pipeline refuses cyclic models up front; every later pass recurses
/// through cell references unguarded.
#[derive(Debug, Error)]
#[error("Cyclic reference: {}.\nCell containing expression is {}.", chain_text, first_cell)]
pub struct CyclicReferenceError {
    /// The cells of the cycle, in reference order, first repeated last.
    pub chain: Vec<CellId>,
    chain_text: String,
    first_cell: String,
}

/// Verifies the cell-reference graph is acyclic.
pub fn verify_acyclic(model: &ComputationModel) -> Result<(), CyclicReferenceError> {
    #[derive(Copy, Clone, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    fn visit(
        model: &ComputationModel,
        id: CellId,
        marks: &mut Vec<Mark>,
        stack: &mut Vec<CellId>,
    ) -> Result<(), CyclicReferenceError> {
        match marks[stack_index(id)] {
            Mark::Black => return Ok(()),
            Mark::Grey => {
                let start = stack.iter().position(|c| *c == id).unwrap_or(0);
                let mut chain: Vec<CellId> = stack[start..].to_vec();
                chain.push(id);
                let chain_text = chain
                    .iter()
                    .map(|c| model.cell(*c).name.clone())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                let first_cell = model.cell(chain[0]).name.clone();
                return Err(CyclicReferenceError {
                    chain,
                    chain_text,
                    first_cell,
                });
            }
            Mark::White => {}
        }
        marks[stack_index(id)] = Mark::Grey;
        stack.push(id);
        if let Some(expr) = &model.cell(id).expr {
            let mut refs = Vec::new();
            expr.collect_cell_refs(&mut refs);
            for r in refs {
                visit(model, r, marks, stack)?;
            }
        }
        stack.pop();
        marks[stack_index(id)] = Mark::Black;
        Ok(())
    }

    fn stack_index(id: CellId) -> usize {
        id.index()
    }

    let mut marks = vec![Mark::White; model.cell_count()];
    let mut stack = Vec::new();
    for id in model.cell_ids() {
        visit(model, id, &mut marks, &mut stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Expr, Operator};

    #[test]
    fn acyclic_model_passes() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_constant(a, 1.0);
        model.set_expression(b, Expr::op(Operator::Plus, vec![Expr::cell(a), Expr::number(1.0)]));
        assert!(verify_acyclic(&model).is_ok());
    }

    #[test]
    fn two_cell_cycle_is_reported_with_chain() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_expression(a, Expr::cell(b));
        model.set_expression(b, Expr::cell(a));
        let err = verify_acyclic(&model).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cyclic reference: A -> B -> A.\nCell containing expression is A."
        );
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        model.set_expression(a, Expr::op(Operator::Plus, vec![Expr::cell(a), Expr::number(1.0)]));
        let err = verify_acyclic(&model).unwrap_err();
        assert_eq!(err.chain.len(), 2);
    }
}
