//! End-to-end folding behavior over the band fixture, across the numeric
//! representations.

mod common;

use std::num::NonZeroU64;

use bigdecimal::{BigDecimal, RoundingMode};
use pretty_assertions::assert_eq;

use tabula_compiler::analysis::annotate_model;
use tabula_compiler::fold::fold_model;
use tabula_compiler::interp::DoubleInterp;
use tabula_compiler::rewrite::rewrite_model;
use tabula_compiler::{transform_model, NumericMode, RuleStore};
use tabula_model::{verify_acyclic, Binding, ComputationModel, Expr, Function, ScopeDir, Value};

use common::band_model;

#[test]
fn fully_constant_model_folds_to_36_under_doubles() {
    let mut fx = band_model(false);
    let store = RuleStore::builtin().unwrap();
    transform_model(&mut fx.model, &store, NumericMode::Double).unwrap();

    assert_eq!(
        fx.model.cell(fx.band_ref_sum).constant,
        Some(Value::Number(36.0))
    );
    assert_eq!(fx.model.cell(fx.const_sum).constant, Some(Value::Number(3.0)));
    assert_eq!(fx.model.cell(fx.band_expr).constant, Some(Value::Number(10.0)));
    assert_eq!(
        fx.model.cell(fx.band_other).constant,
        Some(Value::Number(11.0))
    );
    assert_eq!(fx.model.cell(fx.const_expr).constant, Some(Value::Number(2.0)));
}

#[test]
fn fully_constant_model_folds_under_every_representation() {
    let store = RuleStore::builtin().unwrap();

    let mut fx = band_model(false);
    transform_model(&mut fx.model, &store, NumericMode::ScaledLong { scale: 3 }).unwrap();
    assert_eq!(
        fx.model.cell(fx.band_ref_sum).constant,
        Some(Value::ScaledLong(36_000))
    );

    let mut fx = band_model(false);
    transform_model(
        &mut fx.model,
        &store,
        NumericMode::ScaledDecimal {
            scale: 2,
            rounding: RoundingMode::HalfUp,
        },
    )
    .unwrap();
    match &fx.model.cell(fx.band_ref_sum).constant {
        Some(Value::Decimal(d)) => assert_eq!(d, &BigDecimal::from(36)),
        other => panic!("expected a decimal constant, got {other:?}"),
    }

    let mut fx = band_model(false);
    transform_model(
        &mut fx.model,
        &store,
        NumericMode::PrecisionDecimal {
            precision: NonZeroU64::new(8).unwrap(),
            rounding: RoundingMode::HalfEven,
        },
    )
    .unwrap();
    match &fx.model.cell(fx.band_ref_sum).constant {
        Some(Value::Decimal(d)) => assert_eq!(d, &BigDecimal::from(36)),
        other => panic!("expected a decimal constant, got {other:?}"),
    }
}

#[test]
fn input_cell_keeps_its_cone_symbolic() {
    let mut fx = band_model(true);
    let store = RuleStore::builtin().unwrap();
    verify_acyclic(&fx.model).unwrap();
    rewrite_model(&mut fx.model, &store).unwrap();
    annotate_model(&mut fx.model).unwrap();
    fold_model(&mut fx.model, &DoubleInterp);

    let const_ref_sum = fx.model.cell(fx.const_ref_sum).expr.as_ref().unwrap();
    assert_eq!(
        const_ref_sum.display(&fx.model).to_string(),
        "(Const + 2.0)"
    );
    let band_ref_sum = fx.model.cell(fx.band_ref_sum).expr.as_ref().unwrap();
    assert_eq!(
        band_ref_sum.display(&fx.model).to_string(),
        "(33.0 + <~ConstRefSum)"
    );
    // Everything outside the input's cone still folds.
    assert_eq!(fx.model.cell(fx.const_sum).constant, Some(Value::Number(3.0)));
    assert!(fx.model.cell(fx.const_cell).is_input());
}

#[test]
fn band_references_to_root_cells_are_never_inlined() {
    let mut fx = band_model(true);
    let store = RuleStore::builtin().unwrap();
    transform_model(&mut fx.model, &store, NumericMode::Double).unwrap();

    // ConstRefSum has a single referrer, but that referrer sits inside the
    // repeating band; moving the expression there would evaluate it once
    // per band instance.
    let const_ref_sum = fx.model.cell(fx.const_ref_sum).expr.as_ref().unwrap();
    assert_eq!(
        const_ref_sum.display(&fx.model).to_string(),
        "(Const + 2.0)"
    );
    let band_ref_sum = fx.model.cell(fx.band_ref_sum).expr.as_ref().unwrap();
    assert_eq!(
        band_ref_sum.display(&fx.model).to_string(),
        "(33.0 + <~ConstRefSum)"
    );
}

#[test]
fn aggregation_over_a_repeating_band_never_folds() {
    let mut model = ComputationModel::new();
    let root = model.root();
    let band = model.add_section(root, "Band");
    let x = model.add_cell(band, "X");
    model.set_expression(x, Expr::number(5.0));
    let total = model.add_cell(root, "Total");
    model.set_expression(
        total,
        Expr::call(
            Function::Sum,
            vec![Expr::wrap(ScopeDir::Inner, band, vec![Expr::cell(x)])],
        ),
    );
    model.make_output(total, Binding::new("getTotal"));

    let store = RuleStore::builtin().unwrap();
    transform_model(&mut model, &store, NumericMode::Double).unwrap();

    // The number of band instances is unknown until runtime, and the band
    // cell reference stays a reference.
    let expr = model.cell(total).expr.as_ref().unwrap();
    assert_eq!(
        expr.display(&model).to_string(),
        "apply (fold/reduce with s = 0.0 each xi as s = (s + xi)) to list {Band~>X}"
    );
}
