//! Constant folding under one numeric representation.
//!
//! The folder walks every cell once, replacing subtrees that evaluate
//! completely with literal constants. A non-input cell whose whole
//! expression folds becomes a constant cell, and references to it fold in
//! turn. Input cells always stay symbolic. Declined evaluations are
//! normal: the subtree simply remains for the generated code.

use ahash::AHashSet;
use smallvec::SmallVec;

use tabula_model::{
    Bound, CellId, ComputationModel, Expr, ExprKind, FoldDef, FoldSource, Function, ScopeDir,
    SectionId, Value,
};

use crate::interp::{ConstArg, Interpreter};

/// Fold-time lexical bindings, innermost last.
type Env = Vec<(String, Value)>;

/// Folds every cell of the model under the given representation.
pub fn fold_model(model: &mut ComputationModel, interp: &dyn Interpreter) {
    let mut done = AHashSet::with_capacity(model.cell_count());
    for id in model.cell_ids() {
        fold_cell(model, interp, id, &mut done);
    }
}

/// The cell's constant value after folding, `None` when it stays symbolic.
fn fold_cell(
    model: &mut ComputationModel,
    interp: &dyn Interpreter,
    id: CellId,
    done: &mut AHashSet<CellId>,
) -> Option<Value> {
    if !done.insert(id) {
        let cell = model.cell(id);
        if cell.is_input() {
            return None;
        }
        return cell.constant.clone().map(|v| interp.adjust(v));
    }
    if let Some(mut expr) = model.cell_mut(id).expr.take() {
        let folded = fold_expr(model, interp, &mut expr, &[], done);
        return match folded {
            Some(v) if !model.cell(id).is_input() => {
                let v = interp.adjust(v);
                model.set_constant(id, v.clone());
                Some(v)
            }
            _ => {
                model.cell_mut(id).expr = Some(expr);
                None
            }
        };
    }
    let cell = model.cell(id);
    if cell.is_input() {
        None
    } else {
        cell.constant.clone().map(|v| interp.adjust(v))
    }
}

/// Simplifies the expression in place; returns its value when the whole
/// tree folded to a constant.
fn fold_expr(
    model: &mut ComputationModel,
    interp: &dyn Interpreter,
    e: &mut Expr,
    env: &[(String, Value)],
    done: &mut AHashSet<CellId>,
) -> Option<Value> {
    fold_in(model, interp, e, env, done, None)
}

/// Like [`fold_expr`], tracking the repeating section an enclosing inner
/// wrap spans. Cells of that section hold a distinct value per instance,
/// so references to them stay symbolic even when the cell folded.
fn fold_in(
    model: &mut ComputationModel,
    interp: &dyn Interpreter,
    e: &mut Expr,
    env: &[(String, Value)],
    done: &mut AHashSet<CellId>,
    band: Option<SectionId>,
) -> Option<Value> {
    match &mut e.kind {
        ExprKind::Const(v) => Some(v.clone()),
        ExprKind::Error(_) => None,
        ExprKind::FoldDef(def) => {
            fold_def_parts(model, interp, def, env, done, band);
            None
        }
        ExprKind::CellRef(id) => {
            let id = *id;
            if let Some(sec) = band {
                if model.section_is_within(model.cell(id).section, sec) {
                    return None;
                }
            }
            let v = fold_cell(model, interp, id, done)?;
            *e = Expr::constant(v.clone());
            Some(v)
        }
        ExprKind::LetVar(name) => {
            let v = env.iter().rev().find(|(n, _)| n == name.as_str())?.1.clone();
            *e = Expr::constant(v.clone());
            Some(v)
        }
        ExprKind::Extremum(bound) => {
            let v = match bound {
                Bound::Smallest => interp.min_value(),
                Bound::Largest => interp.max_value(),
            }?;
            *e = Expr::constant(v.clone());
            Some(v)
        }
        ExprKind::Op { op, args } => {
            let op = *op;
            let mut vals: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len());
            let mut all = true;
            for a in args.iter_mut() {
                match fold_in(model, interp, a, env, done, band) {
                    Some(v) => vals.push(v),
                    None => all = false,
                }
            }
            if !all {
                return None;
            }
            let v = interp.compute_op(op, &vals).ok()?;
            *e = Expr::constant(v.clone());
            Some(v)
        }
        ExprKind::Call { function, args } => {
            let function = *function;
            for a in args.iter_mut() {
                fold_in(model, interp, a, env, done, band);
            }
            if let Some(replacement) = short_circuit(interp, function, args) {
                *e = replacement;
                return fold_in(model, interp, e, env, done, band);
            }
            let const_args: Option<Vec<ConstArg>> = args.iter().map(const_arg).collect();
            let v = interp.compute_fn(function, &const_args?).ok()?;
            *e = Expr::constant(v.clone());
            Some(v)
        }
        ExprKind::ArrayRef { elems, .. } => {
            for x in elems.iter_mut() {
                fold_in(model, interp, x, env, done, band);
            }
            None
        }
        ExprKind::ApplyFold { def, over } => {
            if let ExprKind::FoldDef(fd) = &mut def.kind {
                fold_def_parts(model, interp, fd, env, done, band);
            }
            match over {
                FoldSource::List(es) | FoldSource::Vectors(es) => {
                    for x in es.iter_mut() {
                        fold_in(model, interp, x, env, done, band);
                    }
                }
            }
            let v = eval_apply(model, interp, def, over, env, done)?;
            let v = interp.adjust(v);
            *e = Expr::constant(v.clone());
            Some(v)
        }
        ExprKind::Switch {
            selector,
            cases,
            default,
        } => {
            let sel = fold_in(model, interp, selector, env, done, band);
            for c in cases.iter_mut() {
                fold_in(model, interp, &mut c.value, env, done, band);
            }
            fold_in(model, interp, default, env, done, band);
            let key = interp.to_int(&sel?).ok()?;
            let picked = cases
                .iter()
                .find(|c| c.key == key)
                .map(|c| c.value.clone())
                .unwrap_or_else(|| (**default).clone());
            *e = picked;
            fold_in(model, interp, e, env, done, band)
        }
        ExprKind::SectionWrap { dir, section, args } => {
            let dir = *dir;
            let inner = match dir {
                // An inner wrap spans every instance of its section; refs
                // into it are per-instance.
                ScopeDir::Inner => Some(*section),
                // An outer reference evaluates in the enclosing scope.
                ScopeDir::Outer => None,
            };
            let mut vals: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len());
            let mut all = true;
            for a in args.iter_mut() {
                match fold_in(model, interp, a, env, done, inner) {
                    Some(v) => vals.push(v),
                    None => all = false,
                }
            }
            // An outer reference names one cell of an enclosing scope, so
            // constness passes through. Inner wraps span a number of
            // section instances unknown until runtime and never fold.
            if dir == ScopeDir::Outer && all && vals.len() == 1 {
                let v = vals.pop()?;
                *e = Expr::constant(v.clone());
                Some(v)
            } else {
                None
            }
        }
        ExprKind::Splice(args) => {
            for a in args.iter_mut() {
                fold_in(model, interp, a, env, done, band);
            }
            None
        }
    }
}

/// Simplifies the clauses of a fold template in place, hiding outer
/// bindings that the template shadows.
fn fold_def_parts(
    model: &mut ComputationModel,
    interp: &dyn Interpreter,
    def: &mut FoldDef,
    env: &[(String, Value)],
    done: &mut AHashSet<CellId>,
    band: Option<SectionId>,
) {
    for (_, init) in def.accus.iter_mut() {
        fold_in(model, interp, init, env, done, band);
    }
    let mut shadow: Vec<String> = def.accus.iter().map(|(n, _)| n.clone()).collect();
    shadow.extend(def.elt_names.iter().cloned());
    if let Some(i) = &def.index_name {
        shadow.push(i.clone());
    }
    let step_env: Env = env
        .iter()
        .filter(|(n, _)| !shadow.contains(n))
        .cloned()
        .collect();
    for step in def.steps.iter_mut() {
        fold_in(model, interp, step, &step_env, done, band);
    }
    if let Some(merge) = &mut def.merge {
        let mut shadow: Vec<String> = def.accus.iter().map(|(n, _)| n.clone()).collect();
        if let Some(c) = &def.count_name {
            shadow.push(c.clone());
        }
        let merge_env: Env = env
            .iter()
            .filter(|(n, _)| !shadow.contains(n))
            .cloned()
            .collect();
        fold_in(model, interp, merge, &merge_env, done, band);
    }
    if let Some(empty) = &mut def.when_empty {
        fold_in(model, interp, empty, env, done, band);
    }
}

/// Structural replacements that do not need every argument constant.
fn short_circuit(
    interp: &dyn Interpreter,
    function: Function,
    args: &[Expr],
) -> Option<Expr> {
    match (function, args) {
        (Function::If, [cond, rest @ ..]) if (1..=2).contains(&rest.len()) => {
            let b = interp.to_bool(cond.as_const()?).ok()?;
            Some(if b {
                rest[0].clone()
            } else {
                rest.get(1)
                    .cloned()
                    .unwrap_or_else(|| Expr::constant(Value::Bool(false)))
            })
        }
        (Function::Index, [array, index]) => {
            let ExprKind::ArrayRef { shape, elems } = &array.kind else {
                return None;
            };
            if !shape.is_static() {
                return None;
            }
            let i = interp.to_int(index.as_const()?).ok()?;
            if i < 1 || i as usize > elems.len() {
                return None;
            }
            Some(elems[i as usize - 1].clone())
        }
        (Function::Index, [array, row, col]) => {
            let ExprKind::ArrayRef { shape, elems } = &array.kind else {
                return None;
            };
            if !shape.is_static() {
                return None;
            }
            let r = interp.to_int(row.as_const()?).ok()?;
            let c = interp.to_int(col.as_const()?).ok()?;
            if r < 1 || c < 1 || c > shape.cols as i64 {
                return None;
            }
            let flat = (r - 1) * shape.cols as i64 + c;
            if flat as usize > elems.len() {
                return None;
            }
            Some(elems[flat as usize - 1].clone())
        }
        _ => None,
    }
}

/// A folded argument for the compile-time evaluator: a literal, or a static
/// array whose elements are all literal.
fn const_arg(e: &Expr) -> Option<ConstArg> {
    match &e.kind {
        ExprKind::Const(v) => Some(ConstArg::Scalar(v.clone())),
        ExprKind::ArrayRef { shape, elems } if shape.is_static() => elems
            .iter()
            .map(|x| x.as_const().cloned())
            .collect::<Option<Vec<_>>>()
            .map(|vs| ConstArg::Array(*shape, vs)),
        _ => None,
    }
}

fn eval_clone(
    model: &mut ComputationModel,
    interp: &dyn Interpreter,
    template: &Expr,
    env: &[(String, Value)],
    done: &mut AHashSet<CellId>,
) -> Option<Value> {
    let mut work = template.clone();
    fold_expr(model, interp, &mut work, env, done)
}

/// Full compile-time evaluation of a fold application. All or nothing: any
/// element, seed or step that declines leaves the application unfolded.
fn eval_apply(
    model: &mut ComputationModel,
    interp: &dyn Interpreter,
    def: &Expr,
    over: &FoldSource,
    env: &[(String, Value)],
    done: &mut AHashSet<CellId>,
) -> Option<Value> {
    let ExprKind::FoldDef(fd) = &def.kind else {
        return None;
    };
    let columns: Vec<Vec<Value>> = match over {
        FoldSource::List(es) => {
            if fd.elt_names.len() != 1 {
                return None;
            }
            let mut vals = Vec::new();
            for x in es {
                match &x.kind {
                    ExprKind::Const(v) => vals.push(v.clone()),
                    ExprKind::ArrayRef { shape, elems } if shape.is_static() => {
                        for el in elems {
                            vals.push(el.as_const()?.clone());
                        }
                    }
                    _ => return None,
                }
            }
            vec![vals]
        }
        FoldSource::Vectors(vs) => {
            if vs.len() != fd.elt_names.len() || vs.is_empty() {
                return None;
            }
            let mut cols = Vec::with_capacity(vs.len());
            for v in vs {
                let ExprKind::ArrayRef { shape, elems } = &v.kind else {
                    return None;
                };
                if !shape.is_static() {
                    return None;
                }
                let col: Option<Vec<Value>> =
                    elems.iter().map(|x| x.as_const().cloned()).collect();
                cols.push(col?);
            }
            let n = cols[0].len();
            if cols.iter().any(|c| c.len() != n) {
                return None;
            }
            cols
        }
    };
    let n = columns[0].len();
    if n == 0 {
        if let Some(empty) = &fd.when_empty {
            return eval_clone(model, interp, empty, env, done);
        }
    }
    if fd.steps.len() != fd.accus.len() {
        return None;
    }
    let mut accus: Env = Vec::with_capacity(fd.accus.len());
    for (name, init) in &fd.accus {
        accus.push((name.clone(), init.as_const()?.clone()));
    }
    for i in 1..=n {
        let mut step_env: Env = env.to_vec();
        step_env.extend(accus.iter().cloned());
        for (name, col) in fd.elt_names.iter().zip(&columns) {
            step_env.push((name.clone(), col[i - 1].clone()));
        }
        if let Some(ix) = &fd.index_name {
            step_env.push((ix.clone(), interp.adjust(Value::Number(i as f64))));
        }
        // Accumulators advance together from the previous iteration.
        let mut next = Vec::with_capacity(fd.steps.len());
        for step in &fd.steps {
            next.push(eval_clone(model, interp, step, &step_env, done)?);
        }
        for (slot, v) in accus.iter_mut().zip(next) {
            slot.1 = v;
        }
    }
    match &fd.merge {
        Some(merge) => {
            let mut merge_env: Env = env.to_vec();
            merge_env.extend(accus.iter().cloned());
            if let Some(cn) = &fd.count_name {
                merge_env.push((cn.clone(), interp.adjust(Value::Number(n as f64))));
            }
            eval_clone(model, interp, merge, &merge_env, done)
        }
        None => accus.into_iter().next().map(|(_, v)| v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use bigdecimal::RoundingMode;
    use tabula_model::{ArrayShape, Binding, Operator};

    use crate::interp::{DecimalInterp, DoubleInterp, ScaledLongInterp};
    use crate::rewrite::rewrite_expr;
    use crate::rules::RuleStore;

    fn lowered(expr: Expr) -> Expr {
        let model = ComputationModel::new();
        let store = RuleStore::builtin().unwrap();
        let mut e = expr;
        rewrite_expr(&model, &store, &mut e).unwrap();
        e
    }

    #[test]
    fn arithmetic_folds_to_a_constant_cell() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(
            c,
            Expr::op(
                Operator::Times,
                vec![
                    Expr::op(Operator::Plus, vec![Expr::number(1.0), Expr::number(2.0)]),
                    Expr::number(4.0),
                ],
            ),
        );
        fold_model(&mut model, &DoubleInterp);
        assert_eq!(model.cell(c).constant, Some(Value::Number(12.0)));
        assert!(model.cell(c).expr.is_none());
    }

    #[test]
    fn input_references_stay_symbolic() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_constant(a, 1.0);
        model.make_input(a, Binding::new("getA"));
        model.set_expression(
            b,
            Expr::op(Operator::Plus, vec![Expr::cell(a), Expr::number(1.0)]),
        );
        fold_model(&mut model, &DoubleInterp);
        let expr = model.cell(b).expr.as_ref().unwrap();
        assert_eq!(expr.display(&model).to_string(), "(A + 1.0)");
    }

    #[test]
    fn constant_cell_references_fold_through() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_constant(a, 2.0);
        model.set_expression(
            b,
            Expr::op(Operator::Plus, vec![Expr::cell(a), Expr::number(1.0)]),
        );
        fold_model(&mut model, &DoubleInterp);
        assert_eq!(model.cell(b).constant, Some(Value::Number(3.0)));
    }

    #[test]
    fn lowered_sum_evaluates_completely() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        let expr = lowered(Expr::call(
            Function::Sum,
            vec![Expr::number(1.0), Expr::number(2.0), Expr::number(3.0)],
        ));
        model.set_expression(c, expr);
        fold_model(&mut model, &DoubleInterp);
        assert_eq!(model.cell(c).constant, Some(Value::Number(6.0)));
    }

    #[test]
    fn empty_product_uses_the_empty_clause() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(c, lowered(Expr::call(Function::Product, vec![])));
        fold_model(&mut model, &DoubleInterp);
        assert_eq!(model.cell(c).constant, Some(Value::Number(0.0)));
    }

    #[test]
    fn band_cell_references_stay_symbolic_under_inner_wraps() {
        let mut model = ComputationModel::new();
        let band = model.add_section(model.root(), "Band");
        let x = model.add_cell(band, "X");
        model.set_expression(x, Expr::number(5.0));
        let t = model.add_cell(model.root(), "T");
        model.set_expression(
            t,
            Expr::wrap(ScopeDir::Inner, band, vec![Expr::cell(x)]),
        );
        fold_model(&mut model, &DoubleInterp);

        // The cell itself folds, but each band instance carries its own
        // copy, so the wrapped reference keeps its name.
        assert_eq!(model.cell(x).constant, Some(Value::Number(5.0)));
        let expr = model.cell(t).expr.as_ref().unwrap();
        assert_eq!(expr.display(&model).to_string(), "Band~>X");
    }

    #[test]
    fn min_folds_under_double_but_not_under_decimals() {
        let expr = lowered(Expr::call(
            Function::Min,
            vec![Expr::number(3.0), Expr::number(1.0), Expr::number(2.0)],
        ));

        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(c, expr.clone());
        fold_model(&mut model, &DoubleInterp);
        assert_eq!(model.cell(c).constant, Some(Value::Number(1.0)));

        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(c, expr);
        fold_model(&mut model, &DecimalInterp::scaled(2, RoundingMode::HalfUp));
        // Unbounded representations have no seed extreme.
        assert!(model.cell(c).expr.is_some());
        assert!(model.cell(c).constant.is_none());
    }

    #[test]
    fn if_with_constant_condition_keeps_the_live_branch() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_constant(a, 1.0);
        model.make_input(a, Binding::new("getA"));
        model.set_expression(
            b,
            Expr::call(
                Function::If,
                vec![Expr::number(1.0), Expr::cell(a), Expr::number(99.0)],
            ),
        );
        fold_model(&mut model, &DoubleInterp);
        let expr = model.cell(b).expr.as_ref().unwrap();
        assert_eq!(expr.display(&model).to_string(), "A");
    }

    #[test]
    fn switch_with_constant_selector_substitutes_the_case() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_constant(a, 5.0);
        model.make_input(a, Binding::new("getA"));
        model.set_expression(
            b,
            lowered(Expr::call(
                Function::Choose,
                vec![Expr::number(2.0), Expr::number(10.0), Expr::cell(a)],
            )),
        );
        fold_model(&mut model, &DoubleInterp);
        let expr = model.cell(b).expr.as_ref().unwrap();
        assert_eq!(expr.display(&model).to_string(), "A");
    }

    #[test]
    fn index_out_of_range_declines() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(
            c,
            Expr::call(
                Function::Index,
                vec![
                    Expr::array(
                        ArrayShape::new(1, 1, 2),
                        vec![Expr::number(1.0), Expr::number(2.0)],
                    ),
                    Expr::number(5.0),
                ],
            ),
        );
        fold_model(&mut model, &DoubleInterp);
        assert!(model.cell(c).expr.is_some());
    }

    #[test]
    fn results_land_in_the_active_representation() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(
            c,
            Expr::op(Operator::Plus, vec![Expr::number(1.5), Expr::number(1.0)]),
        );
        fold_model(&mut model, &ScaledLongInterp::new(3));
        assert_eq!(model.cell(c).constant, Some(Value::ScaledLong(2500)));
    }
}
