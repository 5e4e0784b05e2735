//! The rewrite rule store: fold templates and function-lowering rules,
//! loaded from the embedded rule source and immutable afterwards.
//!
//! Stores are cheap to share: wrap one in an [`Arc`] and hand clones to
//! concurrent compilations.

mod parser;

use std::sync::Arc;

use ahash::AHashMap;
use thiserror::Error;

use tabula_model::{Expr, ExprKind, Function};

/// How a rule parameter binds call-site arguments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// One argument, substituted (and cloned per occurrence).
    Value,
    /// The remaining arguments, spliced flat where the parameter appears.
    /// Only valid as the last parameter.
    List,
    /// One argument kept whole, preserving array shape.
    Array,
    /// One argument passed through verbatim, never flattened.
    Symbolic,
}

/// A named, kinded rule parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleParam {
    pub name: String,
    pub kind: ParamKind,
}

/// One lowering rule for a function at a given parameter count.
#[derive(Clone, Debug)]
pub struct RuleTemplate {
    pub function: Function,
    pub params: Vec<RuleParam>,
    pub body: Expr,
}

impl RuleTemplate {
    /// Variadic rules end in a list parameter and accept any argument count
    /// at or above their fixed parameters.
    pub fn is_variadic(&self) -> bool {
        matches!(
            self.params.last(),
            Some(RuleParam {
                kind: ParamKind::List,
                ..
            })
        )
    }

    pub fn matches(&self, argc: usize) -> bool {
        if self.is_variadic() {
            argc + 1 >= self.params.len()
        } else {
            argc == self.params.len()
        }
    }
}

/// A rule-store configuration problem. These fail fast at load time; a
/// malformed store never reaches formula compilation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule syntax error at line {line}: {message}")]
    Parse { line: u32, message: String },

    #[error("unknown parameter suffix on '{name}' at line {line}")]
    BadSuffix { name: String, line: u32 },

    #[error("unknown function '{name}' at line {line}")]
    UnknownFunction { name: String, line: u32 },

    #[error("unknown fold '{name}' at line {line}")]
    UnknownFold { name: String, line: u32 },

    #[error("duplicate rule for {function} with {arity} parameters")]
    DuplicateRule { function: String, arity: usize },

    #[error("unbound name '{name}' in rule for {rule}")]
    UnboundName { name: String, rule: String },

    #[error("list parameter '{name}' must come last in rule for {rule}")]
    ListNotLast { name: String, rule: String },
}

/// Immutable lookup tables for the rewriter.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: AHashMap<Function, Vec<RuleTemplate>>,
    folds: AHashMap<String, Expr>,
}

impl RuleStore {
    /// Parses and validates a rule source.
    pub fn from_source(src: &str) -> Result<RuleStore, StoreError> {
        let parsed = parser::parse(src)?;
        let mut store = RuleStore::default();
        for (name, body) in parsed.folds {
            let mut scope = Vec::new();
            check_bound(&body, &mut scope, &name)?;
            store.folds.insert(name, body);
        }
        for def in parsed.defs {
            let template = RuleTemplate {
                function: def.function,
                params: def.params,
                body: def.body,
            };
            let mut scope: Vec<String> =
                template.params.iter().map(|p| p.name.clone()).collect();
            check_bound(&template.body, &mut scope, &def.function_name)?;
            let slot = store.rules.entry(def.function).or_default();
            let clash = slot.iter().any(|r| {
                r.params.len() == template.params.len()
                    || (r.is_variadic() && template.is_variadic())
            });
            if clash {
                return Err(StoreError::DuplicateRule {
                    function: def.function_name,
                    arity: template.params.len(),
                });
            }
            slot.push(template);
            slot.sort_by_key(|r| r.params.len());
        }
        Ok(store)
    }

    /// The shipped rule set.
    pub fn builtin() -> Result<Arc<RuleStore>, StoreError> {
        Ok(Arc::new(RuleStore::from_source(include_str!(
            "rewrite.rules"
        ))?))
    }

    /// Best rule for a call site: an exact-arity rule wins, otherwise the
    /// variadic rule.
    pub fn rule_for(&self, function: Function, argc: usize) -> Option<&RuleTemplate> {
        let list = self.rules.get(&function)?;
        let mut variadic = None;
        for r in list {
            if !r.matches(argc) {
                continue;
            }
            if r.is_variadic() {
                variadic = Some(r);
            } else {
                return Some(r);
            }
        }
        variadic
    }

    /// A named fold template, as written in the source.
    pub fn fold(&self, name: &str) -> Option<&Expr> {
        self.folds.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Every let reference in a rule body must resolve to a parameter or an
/// enclosing fold binding.
fn check_bound(e: &Expr, scope: &mut Vec<String>, rule: &str) -> Result<(), StoreError> {
    match &e.kind {
        ExprKind::LetVar(name) => {
            if scope.iter().any(|s| s == name) {
                Ok(())
            } else {
                Err(StoreError::UnboundName {
                    name: name.clone(),
                    rule: rule.to_string(),
                })
            }
        }
        ExprKind::FoldDef(def) => {
            for (_, init) in &def.accus {
                check_bound(init, scope, rule)?;
            }
            let outer = scope.len();
            scope.extend(def.accus.iter().map(|(n, _)| n.clone()));
            scope.extend(def.elt_names.iter().cloned());
            if let Some(i) = &def.index_name {
                scope.push(i.clone());
            }
            for step in &def.steps {
                check_bound(step, scope, rule)?;
            }
            scope.truncate(outer);
            if let Some(merge) = &def.merge {
                scope.extend(def.accus.iter().map(|(n, _)| n.clone()));
                if let Some(c) = &def.count_name {
                    scope.push(c.clone());
                }
                check_bound(merge, scope, rule)?;
                scope.truncate(outer);
            }
            if let Some(empty) = &def.when_empty {
                check_bound(empty, scope, rule)?;
            }
            Ok(())
        }
        _ => {
            let mut result = Ok(());
            e.for_each_child(&mut |child| {
                if result.is_ok() {
                    result = check_bound(child, scope, rule);
                }
            });
            result
        }
    }
}
