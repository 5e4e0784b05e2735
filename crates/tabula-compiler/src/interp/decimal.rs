use std::cmp::Ordering;
use std::num::NonZeroU64;
use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use tabula_model::{Function, Operator, Value};

use super::{fallback_fn, fallback_op, ConstArg, EvalNotPossible, EvalResult, Interpreter};

/// How a decimal result is brought back into the representation after each
/// operation and conversion.
#[derive(Clone, Debug)]
enum Adjust {
    /// Fixed number of fraction digits.
    Scale { scale: i64, rounding: RoundingMode },
    /// Fixed number of significant digits.
    Precision {
        precision: NonZeroU64,
        rounding: RoundingMode,
    },
}

/// Arbitrary-precision decimal strategy.
///
/// Unbounded, so MIN/MAX seeds have no representable extreme and never
/// fold under this strategy.
#[derive(Clone, Debug)]
pub struct DecimalInterp {
    adjust: Adjust,
}

impl DecimalInterp {
    /// Fixed-scale decimals, every result rounded to `scale` fraction
    /// digits.
    #[must_use]
    pub fn scaled(scale: i64, rounding: RoundingMode) -> Self {
        Self {
            adjust: Adjust::Scale { scale, rounding },
        }
    }

    /// Precision-context decimals, every result rounded to `precision`
    /// significant digits.
    #[must_use]
    pub fn precise(precision: NonZeroU64, rounding: RoundingMode) -> Self {
        Self {
            adjust: Adjust::Precision {
                precision,
                rounding,
            },
        }
    }

    fn adjust_big(&self, d: BigDecimal) -> BigDecimal {
        match &self.adjust {
            Adjust::Scale { scale, rounding } => d.with_scale_round(*scale, *rounding),
            Adjust::Precision {
                precision,
                rounding,
            } => d.with_precision_round(*precision, *rounding),
        }
    }

    fn as_big(&self, value: &Value) -> EvalResult<BigDecimal> {
        let raw = match value {
            Value::Null => BigDecimal::zero(),
            Value::Decimal(d) => d.clone(),
            Value::Bool(b) => BigDecimal::from(if *b { 1 } else { 0 }),
            Value::Number(n) => {
                if !n.is_finite() {
                    return Err(EvalNotPossible);
                }
                BigDecimal::from_f64(*n).ok_or(EvalNotPossible)?
            }
            Value::Text(s) => BigDecimal::from_str(s.trim()).map_err(|_| EvalNotPossible)?,
            Value::ScaledLong(_) => return Err(EvalNotPossible),
        };
        Ok(self.adjust_big(raw))
    }

    fn ok(&self, d: BigDecimal) -> EvalResult<Value> {
        Ok(Value::Decimal(self.adjust_big(d)))
    }

    /// Integer powers by repeated multiplication; fractional exponents
    /// round-trip through `f64`.
    fn pow(&self, base: &BigDecimal, exp: &BigDecimal) -> EvalResult<BigDecimal> {
        if exp.is_integer() {
            let n = exp.to_i64().ok_or(EvalNotPossible)?;
            if n.unsigned_abs() > 1_000 {
                return Err(EvalNotPossible);
            }
            let mut r = BigDecimal::from(1);
            for _ in 0..n.unsigned_abs() {
                r = self.adjust_big(r * base);
            }
            if n < 0 {
                if r.is_zero() {
                    return Err(EvalNotPossible);
                }
                r = self.adjust_big(BigDecimal::from(1) / r);
            }
            Ok(r)
        } else {
            let b = base.to_f64().ok_or(EvalNotPossible)?;
            let e = exp.to_f64().ok_or(EvalNotPossible)?;
            let r = b.powf(e);
            if !r.is_finite() {
                return Err(EvalNotPossible);
            }
            BigDecimal::from_f64(r).ok_or(EvalNotPossible)
        }
    }
}

impl Interpreter for DecimalInterp {
    fn adjust(&self, value: Value) -> Value {
        match &value {
            Value::Number(_) | Value::Decimal(_) => match self.as_big(&value) {
                Ok(d) => Value::Decimal(d),
                Err(_) => value,
            },
            _ => value,
        }
    }

    fn zero(&self) -> Value {
        Value::Decimal(self.adjust_big(BigDecimal::zero()))
    }

    fn min_value(&self) -> Option<Value> {
        None
    }

    fn max_value(&self) -> Option<Value> {
        None
    }

    fn to_number(&self, value: &Value) -> EvalResult<Value> {
        Ok(Value::Decimal(self.as_big(value)?))
    }

    fn to_int(&self, value: &Value) -> EvalResult<i64> {
        self.as_big(value)?
            .with_scale_round(0, RoundingMode::Down)
            .to_i64()
            .ok_or(EvalNotPossible)
    }

    fn numeric_cmp(&self, a: &Value, b: &Value) -> EvalResult<Ordering> {
        Ok(self.as_big(a)?.cmp(&self.as_big(b)?))
    }

    fn compute_op(&self, op: Operator, args: &[Value]) -> EvalResult<Value> {
        match (op, args) {
            (Operator::Plus, [a, b]) => self.ok(self.as_big(a)? + self.as_big(b)?),
            (Operator::Minus, [a, b]) => self.ok(self.as_big(a)? - self.as_big(b)?),
            (Operator::Times, [a, b]) => self.ok(self.as_big(a)? * self.as_big(b)?),
            (Operator::Div, [a, b]) => {
                let d = self.as_big(b)?;
                if d.is_zero() {
                    return Err(EvalNotPossible);
                }
                self.ok(self.as_big(a)? / d)
            }
            (Operator::Exp, [a, b]) => {
                let r = self.pow(&self.as_big(a)?, &self.as_big(b)?)?;
                self.ok(r)
            }
            (Operator::Percent, [a]) => self.ok(self.as_big(a)? / BigDecimal::from(100)),
            (Operator::Neg, [a]) => self.ok(-self.as_big(a)?),
            _ => fallback_op(self, op, args),
        }
    }

    fn compute_fn(&self, function: Function, args: &[ConstArg]) -> EvalResult<Value> {
        match (function, args) {
            (Function::Abs, [a]) => self.ok(self.as_big(a.scalar()?)?.abs()),
            (Function::Sign, [a]) => {
                let d = self.as_big(a.scalar()?)?;
                let s = if d.is_zero() {
                    0
                } else if d.is_negative() {
                    -1
                } else {
                    1
                };
                self.ok(BigDecimal::from(s))
            }
            (Function::Int, [a]) => {
                self.ok(self.as_big(a.scalar()?)?.with_scale_round(0, RoundingMode::Floor))
            }
            (Function::Round, [a, d]) => {
                let x = self.as_big(a.scalar()?)?;
                let digits = self.to_int(d.scalar()?)?;
                self.ok(x.with_scale_round(digits, RoundingMode::HalfUp))
            }
            (Function::Sqrt, [a]) => {
                let d = self.as_big(a.scalar()?)?;
                self.ok(d.sqrt().ok_or(EvalNotPossible)?)
            }
            _ => fallback_fn(self, function, args),
        }
    }
}
