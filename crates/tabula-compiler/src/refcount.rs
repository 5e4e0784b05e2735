//! Reference counting over the live part of the model.
//!
//! Counts start from the output cells and follow expressions outward, so a
//! cell referenced only by dead intermediates keeps a count of zero.
//! Expressions of input cells do not contribute: the generated code reads
//! the host binding instead of computing them.

use ahash::AHashSet;

use tabula_model::{CellId, ComputationModel};

/// Recomputes `ref_count` for every cell from the output set.
pub fn count_references(model: &mut ComputationModel) {
    for id in model.cell_ids() {
        model.cell_mut(id).ref_count = 0;
    }
    let mut queue: Vec<CellId> = model
        .cell_ids()
        .filter(|&id| model.cell(id).is_output())
        .collect();
    let mut seen: AHashSet<CellId> = queue.iter().copied().collect();
    while let Some(id) = queue.pop() {
        if model.cell(id).is_input() {
            continue;
        }
        let mut refs = Vec::new();
        if let Some(expr) = &model.cell(id).expr {
            expr.collect_cell_refs(&mut refs);
        }
        for r in refs {
            model.cell_mut(r).ref_count += 1;
            if seen.insert(r) {
                queue.push(r);
            }
        }
    }
}
