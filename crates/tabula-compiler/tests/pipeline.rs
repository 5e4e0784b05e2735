//! Whole-pipeline properties and diagnostics.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use tabula_compiler::{transform_model, NumericMode, RuleStore};
use tabula_model::{Binding, ComputationModel, Expr, Function, Operator, Value};

fn compile_single(expr: Expr, mode: NumericMode) -> ComputationModel {
    let mut model = ComputationModel::new();
    let out = model.add_cell(model.root(), "Out");
    model.set_expression(out, expr);
    model.make_output(out, Binding::new("getOut"));
    let store = RuleStore::builtin().unwrap();
    transform_model(&mut model, &store, mode).unwrap();
    model
}

#[test]
fn population_stdev_folds_exactly() {
    let model = compile_single(
        Expr::call(
            Function::StdevP,
            [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
                .iter()
                .map(|n| Expr::number(*n))
                .collect(),
        ),
        NumericMode::Double,
    );
    let out = model.cell_ids().next().unwrap();
    assert_eq!(model.cell(out).constant, Some(Value::Number(2.0)));
}

#[test]
fn covariance_folds_over_vectors() {
    use tabula_model::ArrayShape;
    let xs = Expr::array(
        ArrayShape::new(1, 1, 3),
        vec![Expr::number(1.0), Expr::number(2.0), Expr::number(3.0)],
    );
    let ys = Expr::array(
        ArrayShape::new(1, 1, 3),
        vec![Expr::number(4.0), Expr::number(8.0), Expr::number(12.0)],
    );
    let model = compile_single(
        Expr::call(Function::Covar, vec![xs, ys]),
        NumericMode::Double,
    );
    let out = model.cell_ids().next().unwrap();
    // sxy = 56, sx = 6, sy = 24, n = 3: (56 - 6 * 24 / 3) / 3
    assert_eq!(
        model.cell(out).constant,
        Some(Value::Number(8.0 / 3.0))
    );
}

#[test]
fn count_is_numeric_only_and_counta_skips_blanks() {
    let args = || {
        vec![
            Expr::number(1.0),
            Expr::number(2.0),
            Expr::constant("x"),
            Expr::constant(Value::Null),
        ]
    };
    let model = compile_single(Expr::call(Function::Count, args()), NumericMode::Double);
    let out = model.cell_ids().next().unwrap();
    assert_eq!(model.cell(out).constant, Some(Value::Number(2.0)));

    let model = compile_single(Expr::call(Function::CountA, args()), NumericMode::Double);
    let out = model.cell_ids().next().unwrap();
    assert_eq!(model.cell(out).constant, Some(Value::Number(3.0)));
}

#[test]
fn type_conflicts_name_the_owning_cell() {
    let mut model = ComputationModel::new();
    let out = model.add_cell(model.root(), "Mixed");
    model.set_expression(
        out,
        Expr::call(
            Function::If,
            vec![Expr::number(1.0), Expr::constant("a"), Expr::number(2.0)],
        ),
    );
    model.make_output(out, Binding::new("getMixed"));
    let store = RuleStore::builtin().unwrap();
    let err = transform_model(&mut model, &store, NumericMode::Double).unwrap_err();
    assert_eq!(
        err.to_string(),
        "\"a\" and 2.0 must have the same type\nCell containing expression is Mixed."
    );
}

fn arb_arith() -> impl Strategy<Value = (Expr, f64)> {
    let leaf = (-100.0..100.0f64).prop_map(|n| (Expr::number(n), n));
    leaf.prop_recursive(3, 24, 2, |inner| {
        (
            inner.clone(),
            inner,
            prop_oneof![
                Just(Operator::Plus),
                Just(Operator::Minus),
                Just(Operator::Times),
            ],
        )
            .prop_map(|((ea, va), (eb, vb), op)| {
                let v = match op {
                    Operator::Plus => va + vb,
                    Operator::Minus => va - vb,
                    Operator::Times => va * vb,
                    _ => unreachable!(),
                };
                (Expr::op(op, vec![ea, eb]), v)
            })
    })
}

proptest! {
    // Folding under doubles performs the same operations in the same order
    // as direct evaluation, so results are bitwise identical.
    #[test]
    fn double_folding_matches_direct_evaluation((expr, expected) in arb_arith()) {
        let model = compile_single(expr, NumericMode::Double);
        let out = model.cell_ids().next().unwrap();
        prop_assert_eq!(model.cell(out).constant.clone(), Some(Value::Number(expected)));
    }

    #[test]
    fn sum_over_constants_always_folds(values in proptest::collection::vec(-1000.0..1000.0f64, 0..12)) {
        let args: Vec<Expr> = values.iter().map(|n| Expr::number(*n)).collect();
        let model = compile_single(Expr::call(Function::Sum, args), NumericMode::Double);
        let out = model.cell_ids().next().unwrap();
        let expected = values.iter().fold(0.0, |s, x| s + x);
        prop_assert_eq!(model.cell(out).constant.clone(), Some(Value::Number(expected)));
    }
}
