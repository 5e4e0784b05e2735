//! Inlining of single-use intermediate cells.
//!
//! A cell that is neither bound as input nor output and is referenced by
//! exactly one live cell in the same section has its expression moved to
//! that reference site. The emptied cell is skipped by code generation.
//! Runs after reference counting and relies on its counts.

use tabula_model::{CellId, ComputationModel, Expr, ExprKind};

/// Moves every single-use, unbound expression cell into its referrer.
pub fn inline_intermediates(model: &mut ComputationModel) {
    for id in model.cell_ids() {
        let cell = model.cell(id);
        if cell.is_output() || cell.is_input() || cell.ref_count != 1 || cell.expr.is_none() {
            continue;
        }
        let Some(host) = find_referrer(model, id) else {
            continue;
        };
        // A reference from another section reaches this cell through a
        // scope wrap; moving the expression there would recompute it once
        // per section instance.
        if model.cell(host).section != model.cell(id).section {
            continue;
        }
        if model.cell(host).expr.is_none() {
            continue;
        }
        let Some(moved) = model.cell_mut(id).expr.take() else {
            continue;
        };
        if let Some(mut host_expr) = model.cell_mut(host).expr.take() {
            replace_ref(&mut host_expr, id, &moved);
            model.cell_mut(host).expr = Some(host_expr);
        }
        model.cell_mut(id).ref_count = 0;
    }
}

/// The single live cell whose expression references `id`, if there is
/// exactly one such reference in it.
fn find_referrer(model: &ComputationModel, id: CellId) -> Option<CellId> {
    for h in model.cell_ids() {
        if h == id {
            continue;
        }
        let cell = model.cell(h);
        if cell.is_input() || !(cell.is_output() || cell.ref_count > 0) {
            continue;
        }
        let Some(expr) = &cell.expr else {
            continue;
        };
        let mut occurrences = 0u32;
        expr.visit(&mut |node| {
            if matches!(node.kind, ExprKind::CellRef(r) if r == id) {
                occurrences += 1;
            }
        });
        match occurrences {
            0 => continue,
            1 => return Some(h),
            _ => return None,
        }
    }
    None
}

fn replace_ref(e: &mut Expr, target: CellId, replacement: &Expr) {
    if matches!(e.kind, ExprKind::CellRef(r) if r == target) {
        *e = replacement.clone();
        return;
    }
    e.for_each_child_mut(&mut |child| replace_ref(child, target, replacement));
}
