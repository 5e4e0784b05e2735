//! Fixpoint rewriting of high-level function calls into fold applications
//! and primitive expressions, driven by a [`RuleStore`].
//!
//! Rewriting is bottom-up: children first, then the node itself until no
//! rule applies. A handful of type-driven functions (CHOOSE, the ISxxx
//! predicates, N, T, VALUE) are rewritten structurally rather than through
//! the rule language.

use ahash::AHashMap;

use tabula_model::{
    ComputationModel, DataType, Expr, ExprKind, FoldSource, Function, SwitchCase, Value,
};

use crate::analysis::type_of;
use crate::error::CompilerError;
use crate::rules::{ParamKind, RuleStore, RuleTemplate};

/// Rewrite attempts per node before the pass gives up on a cycling rule
/// set.
pub const MAX_REWRITES: u32 = 100;

/// Rewrites every cell expression of the model to fixpoint.
pub fn rewrite_model(
    model: &mut ComputationModel,
    store: &RuleStore,
) -> Result<(), CompilerError> {
    for id in model.cell_ids() {
        if let Some(mut expr) = model.cell_mut(id).expr.take() {
            let result = rewrite_expr(model, store, &mut expr);
            let cell = model.cell_mut(id);
            let name = cell.name.clone();
            cell.expr = Some(expr);
            result.map_err(|e| e.in_cell(&name))?;
        }
    }
    Ok(())
}

fn rewrite_children(
    model: &ComputationModel,
    store: &RuleStore,
    e: &mut Expr,
) -> Result<(), CompilerError> {
    let mut result = Ok(());
    e.for_each_child_mut(&mut |child| {
        if result.is_ok() {
            result = rewrite_expr(model, store, child);
        }
    });
    result
}

pub(crate) fn rewrite_expr(
    model: &ComputationModel,
    store: &RuleStore,
    e: &mut Expr,
) -> Result<(), CompilerError> {
    rewrite_children(model, store, e)?;
    let mut budget = MAX_REWRITES;
    while let Some(replacement) = try_rewrite(model, store, e)? {
        if budget == 0 {
            return Err(CompilerError::RewriteDepthExceeded {
                expr: e.display(model).to_string(),
                limit: MAX_REWRITES,
            });
        }
        budget -= 1;
        *e = replacement;
        rewrite_children(model, store, e)?;
    }
    Ok(())
}

/// One rewrite step at this node, children already at fixpoint.
fn try_rewrite(
    model: &ComputationModel,
    store: &RuleStore,
    e: &Expr,
) -> Result<Option<Expr>, CompilerError> {
    let ExprKind::Call { function, args } = &e.kind else {
        return Ok(None);
    };
    match (function, args.as_slice()) {
        (Function::Choose, [selector, branches @ ..]) if !branches.is_empty() => {
            let cases = branches
                .iter()
                .enumerate()
                .map(|(i, b)| SwitchCase {
                    key: i as i64 + 1,
                    value: b.clone(),
                })
                .collect();
            Ok(Some(Expr::new(ExprKind::Switch {
                selector: Box::new(selector.clone()),
                cases,
                default: Box::new(Expr::error("#VALUE! CHOOSE index out of range")),
            })))
        }
        (Function::IsNumber, [arg]) => {
            let t = type_of(model, arg, &mut Vec::new())?;
            Ok(Some(Expr::constant(Value::Bool(t == DataType::Numeric))))
        }
        (Function::IsText, [arg]) => {
            let t = type_of(model, arg, &mut Vec::new())?;
            Ok(Some(Expr::constant(Value::Bool(t == DataType::Text))))
        }
        (Function::IsNonText, [arg]) => {
            let t = type_of(model, arg, &mut Vec::new())?;
            Ok(Some(Expr::constant(Value::Bool(t != DataType::Text))))
        }
        (Function::N, [arg]) => {
            let t = type_of(model, arg, &mut Vec::new())?;
            Ok(Some(if t == DataType::Numeric {
                arg.clone()
            } else {
                Expr::number(0.0)
            }))
        }
        (Function::T, [arg]) => {
            let t = type_of(model, arg, &mut Vec::new())?;
            Ok(Some(if t == DataType::Text {
                arg.clone()
            } else {
                Expr::constant("")
            }))
        }
        (Function::Value, [arg]) => {
            let t = type_of(model, arg, &mut Vec::new())?;
            if t == DataType::Numeric {
                Ok(Some(arg.clone()))
            } else {
                Ok(None)
            }
        }
        _ => match store.rule_for(*function, args.len()) {
            Some(rule) => Ok(Some(apply_rule(rule, args))),
            None => Ok(None),
        },
    }
}

enum Bind<'a> {
    One(&'a Expr),
    Rest(&'a [Expr]),
}

/// Instantiates a rule body with the call-site arguments.
fn apply_rule(rule: &RuleTemplate, args: &[Expr]) -> Expr {
    let mut bindings: AHashMap<&str, Bind<'_>> = AHashMap::new();
    let fixed = if rule.is_variadic() {
        rule.params.len() - 1
    } else {
        rule.params.len()
    };
    for (param, arg) in rule.params.iter().zip(args) {
        if param.kind != ParamKind::List {
            bindings.insert(param.name.as_str(), Bind::One(arg));
        }
    }
    if rule.is_variadic() {
        let last = &rule.params[fixed];
        bindings.insert(last.name.as_str(), Bind::Rest(&args[fixed..]));
    }
    let mut body = rule.body.clone();
    let mut shadow = Vec::new();
    substitute(&mut body, &bindings, &mut shadow);
    flatten_splices(&mut body);
    body
}

/// Replaces parameter references, respecting fold-introduced shadowing.
fn substitute(e: &mut Expr, bindings: &AHashMap<&str, Bind<'_>>, shadow: &mut Vec<String>) {
    match &mut e.kind {
        ExprKind::LetVar(name) => {
            if shadow.iter().any(|s| s == name.as_str()) {
                return;
            }
            match bindings.get(name.as_str()) {
                Some(Bind::One(arg)) => *e = (*arg).clone(),
                Some(Bind::Rest(rest)) => {
                    *e = Expr::new(ExprKind::Splice(rest.to_vec()));
                }
                None => {}
            }
        }
        ExprKind::FoldDef(def) => {
            for (_, init) in &mut def.accus {
                substitute(init, bindings, shadow);
            }
            let outer = shadow.len();
            shadow.extend(def.accus.iter().map(|(n, _)| n.clone()));
            shadow.extend(def.elt_names.iter().cloned());
            if let Some(i) = &def.index_name {
                shadow.push(i.clone());
            }
            for step in &mut def.steps {
                substitute(step, bindings, shadow);
            }
            shadow.truncate(outer);
            if let Some(merge) = &mut def.merge {
                shadow.extend(def.accus.iter().map(|(n, _)| n.clone()));
                if let Some(c) = &def.count_name {
                    shadow.push(c.clone());
                }
                substitute(merge, bindings, shadow);
                shadow.truncate(outer);
            }
            if let Some(empty) = &mut def.when_empty {
                substitute(empty, bindings, shadow);
            }
        }
        _ => {
            e.for_each_child_mut(&mut |child| substitute(child, bindings, shadow));
        }
    }
}

fn flatten_list(args: &mut Vec<Expr>) {
    if !args.iter().any(|a| matches!(a.kind, ExprKind::Splice(_))) {
        return;
    }
    let mut flat = Vec::with_capacity(args.len());
    for a in args.drain(..) {
        match a.kind {
            ExprKind::Splice(inner) => flat.extend(inner),
            _ => flat.push(a),
        }
    }
    *args = flat;
}

/// Expands transient splice nodes into their enclosing argument lists.
pub(crate) fn flatten_splices(e: &mut Expr) {
    e.for_each_child_mut(&mut |child| flatten_splices(child));
    match &mut e.kind {
        ExprKind::Op { args, .. }
        | ExprKind::Call { args, .. }
        | ExprKind::ArrayRef { elems: args, .. }
        | ExprKind::SectionWrap { args, .. }
        | ExprKind::Splice(args) => flatten_list(args),
        ExprKind::ApplyFold { over, .. } => match over {
            FoldSource::List(elems) | FoldSource::Vectors(elems) => flatten_list(elems),
        },
        _ => {}
    }
}
