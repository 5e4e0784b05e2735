//! Shared model fixture: a sheet with constant cells at the root and a
//! repeating band whose result cell reaches back out to the root.

use tabula_model::{Binding, CellId, ComputationModel, Expr, Function, Operator, ScopeDir};

pub struct Fixture {
    pub model: ComputationModel,
    pub const_cell: CellId,
    pub const_expr: CellId,
    pub const_sum: CellId,
    pub const_ref_sum: CellId,
    pub band_expr: CellId,
    pub band_other: CellId,
    pub band_ref_sum: CellId,
}

/// Builds the band fixture. With `const_as_input`, the `Const` cell is
/// bound as a host input and everything downstream of it stays symbolic.
pub fn band_model(const_as_input: bool) -> Fixture {
    let mut model = ComputationModel::new();
    let root = model.root();

    let const_cell = model.add_cell(root, "Const");
    model.set_constant(const_cell, 1.0);
    if const_as_input {
        model.make_input(const_cell, Binding::new("setConst"));
    }

    let const_expr = model.add_cell(root, "ConstExpr");
    model.set_expression(const_expr, Expr::number(2.0));

    let const_sum = model.add_cell(root, "ConstSum");
    model.set_expression(
        const_sum,
        Expr::op(Operator::Plus, vec![Expr::number(1.0), Expr::number(2.0)]),
    );
    model.make_output(const_sum, Binding::new("getConstSum"));

    let const_ref_sum = model.add_cell(root, "ConstRefSum");
    model.set_expression(
        const_ref_sum,
        Expr::op(
            Operator::Plus,
            vec![Expr::cell(const_cell), Expr::cell(const_expr)],
        ),
    );

    let band = model.add_section(root, "Band");
    let band_expr = model.add_cell(band, "BandExpr");
    model.set_expression(band_expr, Expr::number(10.0));
    let band_other = model.add_cell(band, "BandOther");
    model.set_expression(band_other, Expr::number(11.0));

    let band_ref_sum = model.add_cell(band, "BandRefSum");
    model.set_expression(
        band_ref_sum,
        Expr::op(
            Operator::Plus,
            vec![
                Expr::op(
                    Operator::Plus,
                    vec![
                        Expr::number(12.0),
                        Expr::call(
                            Function::Sum,
                            vec![Expr::cell(band_expr), Expr::cell(band_other)],
                        ),
                    ],
                ),
                Expr::wrap(ScopeDir::Outer, root, vec![Expr::cell(const_ref_sum)]),
            ],
        ),
    );
    model.make_output(band_ref_sum, Binding::new("getBandRefSum"));

    Fixture {
        model,
        const_cell,
        const_expr,
        const_sum,
        const_ref_sum,
        band_expr,
        band_other,
        band_ref_sum,
    }
}
