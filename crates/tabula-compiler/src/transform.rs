//! The compilation pipeline: cycle check, rewrite, annotate, fold, count,
//! inline.
//!
//! Folding is representation-dependent, so a host targeting several numeric
//! representations clones the model and calls [`transform_model`] once per
//! clone.

use std::num::NonZeroU64;

use bigdecimal::RoundingMode;

use tabula_model::{verify_acyclic, ComputationModel};

use crate::error::CompilerError;
use crate::interp::{DecimalInterp, DoubleInterp, Interpreter, ScaledLongInterp};
use crate::rules::RuleStore;
use crate::{analysis, fold, inline, refcount, rewrite};

/// Numeric representation the transformed model folds under.
#[derive(Copy, Clone, Debug)]
pub enum NumericMode {
    /// IEEE 754 doubles.
    Double,
    /// Fixed-point `i64` with a decimal scale.
    ScaledLong { scale: u32 },
    /// Arbitrary-precision decimals rounded to a fixed scale.
    ScaledDecimal { scale: i64, rounding: RoundingMode },
    /// Arbitrary-precision decimals rounded to a significant-digit count.
    PrecisionDecimal {
        precision: NonZeroU64,
        rounding: RoundingMode,
    },
}

impl NumericMode {
    fn interpreter(&self) -> Box<dyn Interpreter> {
        match *self {
            NumericMode::Double => Box::new(DoubleInterp),
            NumericMode::ScaledLong { scale } => Box::new(ScaledLongInterp::new(scale)),
            NumericMode::ScaledDecimal { scale, rounding } => {
                Box::new(DecimalInterp::scaled(scale, rounding))
            }
            NumericMode::PrecisionDecimal {
                precision,
                rounding,
            } => Box::new(DecimalInterp::precise(precision, rounding)),
        }
    }
}

/// Runs the whole pipeline over the model in place.
pub fn transform_model(
    model: &mut ComputationModel,
    store: &RuleStore,
    mode: NumericMode,
) -> Result<(), CompilerError> {
    verify_acyclic(model)?;
    rewrite::rewrite_model(model, store)?;
    analysis::annotate_model(model)?;
    fold::fold_model(model, &*mode.interpreter());
    refcount::count_references(model);
    inline::inline_intermediates(model);
    Ok(())
}
