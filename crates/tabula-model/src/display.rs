//! Diagnostic rendering of values and expressions.
//!
//! This is the syntax quoted by compiler errors and test expectations, not a
//! parseable surface language. Cell and section references render by name
//! when a model is supplied and by arena index otherwise.

use std::fmt;

use crate::expr::{Expr, ExprKind, FoldSource, Operator, ScopeDir};
use crate::model::ComputationModel;
use crate::value::Value;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            // Debug keeps the trailing ".0" on integral doubles.
            Value::Number(n) => write!(f, "{n:?}"),
            Value::ScaledLong(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

/// Borrowed expression plus optional model context for name resolution.
///
/// Obtained from [`Expr::display`].
pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    model: Option<&'a ComputationModel>,
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_expr(f, self.expr, self.model)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_expr(f, self, None)
    }
}

impl Expr {
    /// Renders with cell and section names resolved against `model`.
    pub fn display<'a>(&'a self, model: &'a ComputationModel) -> ExprDisplay<'a> {
        ExprDisplay {
            expr: self,
            model: Some(model),
        }
    }
}

fn fmt_list(
    f: &mut fmt::Formatter<'_>,
    elems: &[Expr],
    m: Option<&ComputationModel>,
) -> fmt::Result {
    for (i, e) in elems.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_expr(f, e, m)?;
    }
    Ok(())
}

fn fmt_expr(f: &mut fmt::Formatter<'_>, e: &Expr, m: Option<&ComputationModel>) -> fmt::Result {
    match &e.kind {
        ExprKind::Const(v) => write!(f, "{v}"),
        ExprKind::CellRef(id) => match m {
            Some(model) => f.write_str(&model.cell(*id).name),
            None => write!(f, "@{}", id.index()),
        },
        ExprKind::Op { op, args } => match (op, args.as_slice()) {
            (Operator::Neg, [a]) => {
                f.write_str("(-")?;
                fmt_expr(f, a, m)?;
                f.write_str(")")
            }
            (Operator::Percent, [a]) => {
                f.write_str("(")?;
                fmt_expr(f, a, m)?;
                f.write_str("%)")
            }
            (_, [a, b]) => {
                f.write_str("(")?;
                fmt_expr(f, a, m)?;
                write!(f, " {} ", op.symbol())?;
                fmt_expr(f, b, m)?;
                f.write_str(")")
            }
            // Malformed arity still renders something readable.
            (_, args) => {
                write!(f, "{}(", op.symbol())?;
                fmt_list(f, args, m)?;
                f.write_str(")")
            }
        },
        ExprKind::Call { function, args } => {
            if args.is_empty() {
                write!(f, "{}()", function.name())
            } else {
                write!(f, "{}( ", function.name())?;
                fmt_list(f, args, m)?;
                f.write_str(" )")
            }
        }
        ExprKind::ArrayRef { shape, elems } => {
            write!(f, "#({},{},{}){{", shape.sheets, shape.rows, shape.cols)?;
            fmt_list(f, elems, m)?;
            f.write_str("}")
        }
        ExprKind::LetVar(name) => f.write_str(name),
        ExprKind::FoldDef(def) => {
            f.write_str(if def.may_rearrange { "fold" } else { "iterate" })?;
            if def.may_reduce {
                f.write_str("/reduce")?;
            }
            if !def.accus.is_empty() {
                f.write_str(" with ")?;
                for (i, (name, init)) in def.accus.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = ")?;
                    fmt_expr(f, init, m)?;
                }
            }
            if let Some(index) = &def.index_name {
                write!(f, " index {index}")?;
            }
            f.write_str(" each ")?;
            f.write_str(&def.elt_names.join(", "))?;
            if !def.steps.is_empty() {
                f.write_str(" as ")?;
                for (i, step) in def.steps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = ", def.accus[i].0)?;
                    fmt_expr(f, step, m)?;
                }
            }
            if let Some(count) = &def.count_name {
                write!(f, " with count {count}")?;
            }
            if let Some(merge) = &def.merge {
                f.write_str(" into ")?;
                fmt_expr(f, merge, m)?;
            }
            if let Some(empty) = &def.when_empty {
                f.write_str(" when empty ")?;
                fmt_expr(f, empty, m)?;
            }
            Ok(())
        }
        ExprKind::ApplyFold { def, over } => {
            f.write_str("apply (")?;
            fmt_expr(f, def, m)?;
            let elems = match over {
                FoldSource::List(elems) => {
                    f.write_str(") to list {")?;
                    elems
                }
                FoldSource::Vectors(elems) => {
                    f.write_str(") to vectors {")?;
                    elems
                }
            };
            fmt_list(f, elems, m)?;
            f.write_str("}")
        }
        ExprKind::Switch {
            selector,
            cases,
            default,
        } => {
            f.write_str("switch( ")?;
            fmt_expr(f, selector, m)?;
            f.write_str("; ")?;
            for (i, case) in cases.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: ", case.key)?;
                fmt_expr(f, &case.value, m)?;
            }
            f.write_str("; default: ")?;
            fmt_expr(f, default, m)?;
            f.write_str(" )")
        }
        ExprKind::SectionWrap { dir, section, args } => match dir {
            ScopeDir::Outer => {
                f.write_str("<~")?;
                match args.as_slice() {
                    [single] => fmt_expr(f, single, m),
                    args => {
                        f.write_str("{")?;
                        fmt_list(f, args, m)?;
                        f.write_str("}")
                    }
                }
            }
            ScopeDir::Inner => {
                match m {
                    Some(model) => f.write_str(&model.section(*section).name)?,
                    None => write!(f, "#{}", section.index())?,
                }
                f.write_str("~>")?;
                match args.as_slice() {
                    [single] => fmt_expr(f, single, m),
                    args => {
                        f.write_str("{")?;
                        fmt_list(f, args, m)?;
                        f.write_str("}")
                    }
                }
            }
        },
        ExprKind::Splice(elems) => {
            f.write_str("splice{")?;
            fmt_list(f, elems, m)?;
            f.write_str("}")
        }
        ExprKind::Error(message) => write!(f, "ERROR( \"{message}\" )"),
        ExprKind::Extremum(bound) => f.write_str(match bound {
            crate::expr::Bound::Smallest => "minvalue",
            crate::expr::Bound::Largest => "maxvalue",
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{ArrayShape, Bound, FoldDef, Function, SwitchCase};
    use crate::{Expr, ExprKind, FoldSource, Operator, ScopeDir};
    use pretty_assertions::assert_eq;

    fn sum_fold() -> Expr {
        Expr::new(ExprKind::FoldDef(Box::new(FoldDef {
            accus: vec![("s".into(), Expr::number(0.0))],
            index_name: None,
            elt_names: vec!["xi".into()],
            count_name: None,
            steps: vec![Expr::op(
                Operator::Plus,
                vec![Expr::let_var("s"), Expr::let_var("xi")],
            )],
            merge: None,
            when_empty: None,
            may_rearrange: true,
            may_reduce: true,
        })))
    }

    #[test]
    fn operators_render_infix() {
        let e = Expr::op(Operator::Plus, vec![Expr::number(1.0), Expr::number(2.0)]);
        assert_eq!(e.to_string(), "(1.0 + 2.0)");
        let neg = Expr::op(Operator::Neg, vec![Expr::number(3.0)]);
        assert_eq!(neg.to_string(), "(-3.0)");
        let pct = Expr::op(Operator::Percent, vec![Expr::number(3.0)]);
        assert_eq!(pct.to_string(), "(3.0%)");
        let min = Expr::op(Operator::Min, vec![Expr::number(1.0), Expr::number(2.0)]);
        assert_eq!(min.to_string(), "(1.0 _min_ 2.0)");
    }

    #[test]
    fn calls_and_arrays() {
        let call = Expr::call(Function::Sum, vec![Expr::number(1.0), Expr::number(2.0)]);
        assert_eq!(call.to_string(), "SUM( 1.0, 2.0 )");
        let arr = Expr::array(
            ArrayShape::new(1, 1, 3),
            vec![Expr::number(2.0), Expr::number(3.0), Expr::number(4.0)],
        );
        assert_eq!(arr.to_string(), "#(1,1,3){2.0, 3.0, 4.0}");
    }

    #[test]
    fn fold_application_render() {
        let apply = Expr::new(ExprKind::ApplyFold {
            def: Box::new(sum_fold()),
            over: FoldSource::List(vec![Expr::number(1.0), Expr::number(2.0)]),
        });
        assert_eq!(
            apply.to_string(),
            "apply (fold/reduce with s = 0.0 each xi as s = (s + xi)) to list {1.0, 2.0}"
        );
    }

    #[test]
    fn wraps_and_errors() {
        let mut model = crate::ComputationModel::new();
        let band = model.add_section(model.root(), "Band");
        let c = model.add_cell(model.root(), "ConstRefSum");

        let outer = Expr::wrap(ScopeDir::Outer, model.root(), vec![Expr::cell(c)]);
        assert_eq!(outer.display(&model).to_string(), "<~ConstRefSum");

        let inner = Expr::wrap(ScopeDir::Inner, band, vec![Expr::let_var("x")]);
        assert_eq!(inner.display(&model).to_string(), "Band~>x");

        let err = Expr::error("#VALUE! too few arguments");
        assert_eq!(err.to_string(), "ERROR( \"#VALUE! too few arguments\" )");

        assert_eq!(Expr::new(ExprKind::Extremum(Bound::Largest)).to_string(), "maxvalue");
    }

    #[test]
    fn switch_render() {
        let sw = Expr::new(ExprKind::Switch {
            selector: Box::new(Expr::number(2.0)),
            cases: vec![
                SwitchCase {
                    key: 1,
                    value: Expr::number(10.0),
                },
                SwitchCase {
                    key: 2,
                    value: Expr::number(20.0),
                },
            ],
            default: Box::new(Expr::error("#VALUE! CHOOSE index out of range")),
        });
        assert_eq!(
            sw.to_string(),
            "switch( 2.0; 1: 10.0, 2: 20.0; default: ERROR( \"#VALUE! CHOOSE index out of range\" ) )"
        );
    }
}
