//! Bottom-up type annotation.
//!
//! Every expression node and cell receives a [`DataType`]; results are
//! memoized in the node's type slot and the cell's `data_type`, so the pass
//! is idempotent. Unification treats error placeholders and null-typed
//! branches as ignorable; a genuine conflict is fatal and quotes both
//! offending expressions.

use tabula_model::{
    CellId, ComputationModel, DataType, Expr, ExprKind, FoldSource, Function, Operator,
};

use crate::error::CompilerError;

/// Lexical bindings in scope while typing fold bodies.
type Scope = Vec<(String, DataType)>;

fn returns_text(function: Function) -> bool {
    matches!(
        function,
        Function::Concatenate
            | Function::Mid
            | Function::Clean
            | Function::Char
            | Function::Dollar
            | Function::Fixed
            | Function::Roman
            | Function::Left
            | Function::Right
            | Function::Substitute
            | Function::Replace
            | Function::Lower
            | Function::Upper
            | Function::Proper
            | Function::Rept
            | Function::Trim
            | Function::Text
            | Function::T
    )
}

/// Assigns a data type to every cell and every expression node.
pub fn annotate_model(model: &mut ComputationModel) -> Result<(), CompilerError> {
    for id in model.cell_ids() {
        cell_type(model, id)?;
    }
    Ok(())
}

pub(crate) fn cell_type(
    model: &mut ComputationModel,
    id: CellId,
) -> Result<DataType, CompilerError> {
    if let Some(t) = model.cell(id).data_type {
        return Ok(t);
    }
    let t = match model.cell_mut(id).expr.take() {
        Some(mut expr) => {
            let mut scope = Scope::new();
            let result = annotate_expr(model, &mut expr, &mut scope);
            let cell = model.cell_mut(id);
            let name = cell.name.clone();
            cell.expr = Some(expr);
            result.map_err(|e| e.in_cell(&name))?
        }
        None => match &model.cell(id).constant {
            Some(c) => c.data_type(),
            None => DataType::Null,
        },
    };
    model.cell_mut(id).data_type = Some(t);
    Ok(t)
}

fn lookup(scope: &Scope, name: &str) -> Option<DataType> {
    scope.iter().rev().find(|(n, _)| n == name).map(|(_, t)| *t)
}

/// Branches an unification ignores: explicit error placeholders and
/// null-typed expressions.
fn ignorable(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::Error(_)) || e.ty == Some(DataType::Null)
}

/// Unified type of already-annotated branches; `None` when every branch is
/// ignorable. Order-independent.
fn unify<'a>(
    model: &ComputationModel,
    branches: impl Iterator<Item = &'a Expr>,
) -> Result<Option<DataType>, CompilerError> {
    let mut found: Option<(DataType, &Expr)> = None;
    for b in branches {
        if ignorable(b) {
            continue;
        }
        let t = b.ty.unwrap_or(DataType::Null);
        if t == DataType::Null {
            continue;
        }
        match found {
            None => found = Some((t, b)),
            Some((prev, first)) if prev != t => {
                return Err(CompilerError::TypeMismatch {
                    left: first.display(model).to_string(),
                    right: b.display(model).to_string(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(found.map(|(t, _)| t))
}

fn annotate_all(
    model: &mut ComputationModel,
    exprs: &mut [Expr],
    scope: &mut Scope,
) -> Result<(), CompilerError> {
    for e in exprs {
        annotate_expr(model, e, scope)?;
    }
    Ok(())
}

pub(crate) fn annotate_expr(
    model: &mut ComputationModel,
    e: &mut Expr,
    scope: &mut Scope,
) -> Result<DataType, CompilerError> {
    if let Some(t) = e.ty {
        return Ok(t);
    }
    let t = match &mut e.kind {
        ExprKind::Const(v) => v.data_type(),
        ExprKind::CellRef(id) => cell_type(model, *id)?,
        ExprKind::Op { op, args } => {
            annotate_all(model, args, scope)?;
            match op {
                Operator::Concat => DataType::Text,
                _ => DataType::Numeric,
            }
        }
        ExprKind::Call { function, args } => {
            annotate_all(model, args, scope)?;
            match function {
                Function::If if args.len() >= 3 => {
                    match unify(model, args[1..3].iter())? {
                        Some(t) => t,
                        None => {
                            return Err(CompilerError::UntypedArguments {
                                expr: e.display(model).to_string(),
                            })
                        }
                    }
                }
                Function::If if args.len() == 2 => {
                    // The implicit else branch yields FALSE, a numeric.
                    match unify(model, args[1..2].iter())? {
                        Some(DataType::Text) => {
                            return Err(CompilerError::TypeMismatch {
                                left: args[1].display(model).to_string(),
                                right: "FALSE".to_string(),
                            })
                        }
                        _ => DataType::Numeric,
                    }
                }
                Function::Index => match args.first() {
                    Some(array) => array.ty.unwrap_or(DataType::Numeric),
                    None => DataType::Numeric,
                },
                f if returns_text(*f) => DataType::Text,
                _ => DataType::Numeric,
            }
        }
        ExprKind::ArrayRef { elems, .. } => {
            annotate_all(model, elems, scope)?;
            unify(model, elems.iter())?.unwrap_or(DataType::Null)
        }
        ExprKind::LetVar(name) => match lookup(scope, name) {
            Some(t) => t,
            None => {
                return Err(CompilerError::UnboundName {
                    name: name.clone(),
                    expr: name.clone(),
                })
            }
        },
        ExprKind::FoldDef(_) => {
            // A definition outside an application sees no element types.
            annotate_fold(model, e, &[], scope)?
        }
        ExprKind::ApplyFold { def, over } => {
            let elt_types = match over {
                FoldSource::List(elems) => {
                    annotate_all(model, elems, scope)?;
                    vec![unify(model, elems.iter())?.unwrap_or(DataType::Null)]
                }
                FoldSource::Vectors(vectors) => {
                    annotate_all(model, vectors, scope)?;
                    vectors
                        .iter()
                        .map(|v| v.ty.unwrap_or(DataType::Null))
                        .collect()
                }
            };
            if matches!(def.kind, ExprKind::FoldDef(_)) {
                annotate_fold(model, def, &elt_types, scope)?
            } else {
                annotate_expr(model, def, scope)?
            }
        }
        ExprKind::Switch {
            selector,
            cases,
            default,
        } => {
            annotate_expr(model, selector, scope)?;
            for c in cases.iter_mut() {
                annotate_expr(model, &mut c.value, scope)?;
            }
            annotate_expr(model, default, scope)?;
            let branches = cases.iter().map(|c| &c.value).chain(std::iter::once(&**default));
            match unify(model, branches)? {
                Some(t) => t,
                None => {
                    return Err(CompilerError::UntypedArguments {
                        expr: e.display(model).to_string(),
                    })
                }
            }
        }
        ExprKind::SectionWrap { args, .. } => {
            annotate_all(model, args, scope)?;
            unify(model, args.iter())?.unwrap_or(DataType::Null)
        }
        ExprKind::Splice(args) => {
            annotate_all(model, args, scope)?;
            DataType::Null
        }
        ExprKind::Error(_) => DataType::Null,
        ExprKind::Extremum(_) => DataType::Numeric,
    };
    e.ty = Some(t);
    Ok(t)
}

/// Types a fold definition given the element types from its application
/// site.
fn annotate_fold(
    model: &mut ComputationModel,
    def_expr: &mut Expr,
    elt_types: &[DataType],
    scope: &mut Scope,
) -> Result<DataType, CompilerError> {
    let ExprKind::FoldDef(def) = &mut def_expr.kind else {
        return annotate_expr(model, def_expr, scope);
    };
    let outer = scope.len();
    let mut init_types = Vec::with_capacity(def.accus.len());
    for (_, init) in def.accus.iter_mut() {
        init_types.push(annotate_expr(model, init, scope)?);
    }

    for ((name, _), t) in def.accus.iter().zip(&init_types) {
        scope.push((name.clone(), *t));
    }
    for (i, name) in def.elt_names.iter().enumerate() {
        let t = elt_types.get(i).copied().unwrap_or(DataType::Null);
        scope.push((name.clone(), t));
    }
    if let Some(index) = &def.index_name {
        scope.push((index.clone(), DataType::Numeric));
    }
    let mut step_types = Vec::with_capacity(def.steps.len());
    for step in def.steps.iter_mut() {
        step_types.push(annotate_expr(model, step, scope)?);
    }
    scope.truncate(outer);

    let merge_type = if let Some(merge) = &mut def.merge {
        for ((name, _), t) in def.accus.iter().zip(&init_types) {
            scope.push((name.clone(), *t));
        }
        if let Some(count) = &def.count_name {
            scope.push((count.clone(), DataType::Numeric));
        }
        let t = annotate_expr(model, merge, scope)?;
        scope.truncate(outer);
        Some(t)
    } else {
        None
    };
    if let Some(empty) = &mut def.when_empty {
        annotate_expr(model, empty, scope)?;
    }

    let t = merge_type
        .or_else(|| step_types.first().copied())
        .or_else(|| init_types.first().copied())
        .unwrap_or(DataType::Null);
    def_expr.ty = Some(t);
    Ok(t)
}

/// Read-only variant used by type-driven rewrites before annotation runs.
///
/// Recomputes instead of memoizing; the model stays untouched.
pub(crate) fn type_of(
    model: &ComputationModel,
    e: &Expr,
    scope: &mut Scope,
) -> Result<DataType, CompilerError> {
    if let Some(t) = e.ty {
        return Ok(t);
    }
    let t = match &e.kind {
        ExprKind::Const(v) => v.data_type(),
        ExprKind::CellRef(id) => {
            let cell = model.cell(*id);
            if let Some(t) = cell.data_type {
                t
            } else if let Some(c) = &cell.constant {
                c.data_type()
            } else if let Some(expr) = &cell.expr {
                let mut inner = Scope::new();
                type_of(model, expr, &mut inner)
                    .map_err(|err| err.in_cell(&cell.name))?
            } else {
                DataType::Null
            }
        }
        ExprKind::Op { op, .. } => match op {
            Operator::Concat => DataType::Text,
            _ => DataType::Numeric,
        },
        ExprKind::Call { function, args } => match function {
            Function::If if args.len() >= 3 => {
                let a = type_of(model, &args[1], scope)?;
                let b = type_of(model, &args[2], scope)?;
                match (pick(&args[1], a), pick(&args[2], b)) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(CompilerError::TypeMismatch {
                            left: args[1].display(model).to_string(),
                            right: args[2].display(model).to_string(),
                        })
                    }
                    (Some(t), _) | (_, Some(t)) => t,
                    _ => DataType::Null,
                }
            }
            Function::If if args.len() == 2 => DataType::Numeric,
            Function::Index => match args.first() {
                Some(array) => type_of(model, array, scope)?,
                None => DataType::Numeric,
            },
            f if returns_text(*f) => DataType::Text,
            _ => DataType::Numeric,
        },
        ExprKind::ArrayRef { elems, .. } => {
            let mut found = None;
            for elem in elems {
                let t = type_of(model, elem, scope)?;
                if let Some(t) = pick(elem, t) {
                    match found {
                        None => found = Some((t, elem)),
                        Some((prev, first)) if prev != t => {
                            return Err(CompilerError::TypeMismatch {
                                left: first.display(model).to_string(),
                                right: elem.display(model).to_string(),
                            })
                        }
                        Some(_) => {}
                    }
                }
            }
            found.map(|(t, _)| t).unwrap_or(DataType::Null)
        }
        ExprKind::LetVar(name) => lookup(scope, name).unwrap_or(DataType::Null),
        ExprKind::FoldDef(def) => match (&def.merge, def.steps.first()) {
            (Some(merge), _) => type_of(model, merge, scope)?,
            (None, Some(step)) => type_of(model, step, scope)?,
            (None, None) => DataType::Null,
        },
        ExprKind::ApplyFold { def, .. } => type_of(model, def, scope)?,
        ExprKind::Switch { cases, default, .. } => {
            let mut found = None;
            for branch in cases.iter().map(|c| &c.value).chain(std::iter::once(&**default)) {
                let t = type_of(model, branch, scope)?;
                if let Some(t) = pick(branch, t) {
                    match found {
                        None => found = Some((t, branch)),
                        Some((prev, first)) if prev != t => {
                            return Err(CompilerError::TypeMismatch {
                                left: first.display(model).to_string(),
                                right: branch.display(model).to_string(),
                            })
                        }
                        Some(_) => {}
                    }
                }
            }
            found.map(|(t, _)| t).unwrap_or(DataType::Null)
        }
        ExprKind::SectionWrap { args, .. } => match args.first() {
            Some(first) => type_of(model, first, scope)?,
            None => DataType::Null,
        },
        ExprKind::Splice(_) | ExprKind::Error(_) => DataType::Null,
        ExprKind::Extremum(_) => DataType::Numeric,
    };
    Ok(t)
}

/// Non-ignorable type of a probed branch, if any.
fn pick(e: &Expr, t: DataType) -> Option<DataType> {
    if matches!(e.kind, ExprKind::Error(_)) || t == DataType::Null {
        None
    } else {
        Some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabula_model::{Expr, Function, Operator, Value};

    #[test]
    fn concat_is_text_everything_else_numeric() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(
            c,
            Expr::op(Operator::Concat, vec![Expr::constant("a"), Expr::constant("b")]),
        );
        annotate_model(&mut model).unwrap();
        assert_eq!(model.cell(c).data_type, Some(DataType::Text));
    }

    #[test]
    fn cell_type_follows_references() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        let b = model.add_cell(model.root(), "B");
        model.set_constant(a, "text");
        model.set_expression(b, Expr::cell(a));
        annotate_model(&mut model).unwrap();
        assert_eq!(model.cell(b).data_type, Some(DataType::Text));
    }

    #[test]
    fn if_branches_must_unify() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "Mixed");
        model.set_expression(
            c,
            Expr::call(
                Function::If,
                vec![
                    Expr::number(1.0),
                    Expr::constant("a"),
                    Expr::number(2.0),
                ],
            ),
        );
        let err = annotate_model(&mut model).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"a\" and 2.0 must have the same type\nCell containing expression is Mixed."
        );
    }

    #[test]
    fn error_branches_are_ignorable() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(
            c,
            Expr::call(
                Function::If,
                vec![
                    Expr::number(1.0),
                    Expr::constant("a"),
                    Expr::error("#VALUE! bad branch"),
                ],
            ),
        );
        annotate_model(&mut model).unwrap();
        assert_eq!(model.cell(c).data_type, Some(DataType::Text));
    }

    #[test]
    fn all_ignorable_branches_are_an_error() {
        let mut model = ComputationModel::new();
        let c = model.add_cell(model.root(), "C");
        model.set_expression(
            c,
            Expr::call(
                Function::If,
                vec![
                    Expr::number(1.0),
                    Expr::error("#VALUE! a"),
                    Expr::error("#VALUE! b"),
                ],
            ),
        );
        let err = annotate_model(&mut model).unwrap_err();
        assert!(matches!(
            err,
            CompilerError::WithContext { ref inner, .. }
                if matches!(**inner, CompilerError::UntypedArguments { .. })
        ));
    }

    #[test]
    fn unify_is_commutative() {
        let mut model = ComputationModel::new();
        let mk = |first_text: bool| {
            let mut branches = vec![Expr::constant("a"), Expr::number(1.0)];
            if !first_text {
                branches.reverse();
            }
            let mut args = vec![Expr::number(1.0)];
            args.extend(branches);
            Expr::call(Function::If, args)
        };
        let mut scope = Scope::new();
        let mut left = mk(true);
        let mut right = mk(false);
        let e1 = annotate_expr(&mut model, &mut left, &mut scope).unwrap_err();
        let e2 = annotate_expr(&mut model, &mut right, &mut scope).unwrap_err();
        assert!(matches!(e1, CompilerError::TypeMismatch { .. }));
        assert!(matches!(e2, CompilerError::TypeMismatch { .. }));
    }

    #[test]
    fn annotation_is_idempotent() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        model.set_expression(
            a,
            Expr::op(Operator::Plus, vec![Expr::number(1.0), Expr::number(2.0)]),
        );
        annotate_model(&mut model).unwrap();
        let snapshot = model.clone();
        annotate_model(&mut model).unwrap();
        assert_eq!(model, snapshot);
    }

    #[test]
    fn constant_values_classify() {
        let mut model = ComputationModel::new();
        let a = model.add_cell(model.root(), "A");
        model.set_constant(a, Value::Bool(true));
        annotate_model(&mut model).unwrap();
        assert_eq!(model.cell(a).data_type, Some(DataType::Numeric));
    }
}
