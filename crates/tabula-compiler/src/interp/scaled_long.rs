use std::cmp::Ordering;

use num_traits::ToPrimitive;
use tabula_model::{Function, Operator, Value};

use super::{fallback_fn, fallback_op, ConstArg, EvalNotPossible, EvalResult, Interpreter};

/// Fixed-point strategy over `i64` with a decimal scale.
///
/// Products and quotients go through `i128` so intermediates cannot wrap;
/// rescaling rounds half away from zero. Transcendentals round-trip through
/// `f64`, as the generated runtime does.
#[derive(Copy, Clone, Debug)]
pub struct ScaledLongInterp {
    scale: u32,
    factor: i64,
}

impl ScaledLongInterp {
    #[must_use]
    pub fn new(scale: u32) -> Self {
        Self {
            scale,
            factor: 10i64.pow(scale),
        }
    }

    fn as_scaled(&self, value: &Value) -> EvalResult<i64> {
        match value {
            Value::Null => Ok(0),
            Value::ScaledLong(v) => Ok(*v),
            Value::Bool(b) => Ok(if *b { self.factor } else { 0 }),
            Value::Number(n) => self.scale_f64(*n),
            Value::Decimal(d) => self.scale_f64(d.to_f64().ok_or(EvalNotPossible)?),
            Value::Text(s) => {
                let n: f64 = s.trim().parse().map_err(|_| EvalNotPossible)?;
                self.scale_f64(n)
            }
        }
    }

    fn scale_f64(&self, n: f64) -> EvalResult<i64> {
        let scaled = (n * self.factor as f64).round();
        if scaled.is_finite() && scaled.abs() < i64::MAX as f64 {
            Ok(scaled as i64)
        } else {
            Err(EvalNotPossible)
        }
    }

    fn to_f64(&self, scaled: i64) -> f64 {
        scaled as f64 / self.factor as f64
    }

    fn narrow(&self, wide: i128) -> EvalResult<Value> {
        i64::try_from(wide)
            .map(Value::ScaledLong)
            .map_err(|_| EvalNotPossible)
    }
}

/// Integer division rounding half away from zero.
fn div_round(n: i128, d: i128) -> EvalResult<i128> {
    if d == 0 {
        return Err(EvalNotPossible);
    }
    let q = n / d;
    let r = n % d;
    if r.abs() * 2 >= d.abs() {
        let bump = if (n < 0) == (d < 0) { 1 } else { -1 };
        Ok(q + bump)
    } else {
        Ok(q)
    }
}

impl Interpreter for ScaledLongInterp {
    fn adjust(&self, value: Value) -> Value {
        match &value {
            Value::Number(_) | Value::Decimal(_) => match self.as_scaled(&value) {
                Ok(v) => Value::ScaledLong(v),
                Err(_) => value,
            },
            _ => value,
        }
    }

    fn zero(&self) -> Value {
        Value::ScaledLong(0)
    }

    fn min_value(&self) -> Option<Value> {
        Some(Value::ScaledLong(i64::MIN))
    }

    fn max_value(&self) -> Option<Value> {
        Some(Value::ScaledLong(i64::MAX))
    }

    fn to_number(&self, value: &Value) -> EvalResult<Value> {
        Ok(Value::ScaledLong(self.as_scaled(value)?))
    }

    fn to_int(&self, value: &Value) -> EvalResult<i64> {
        Ok(self.as_scaled(value)? / self.factor)
    }

    fn numeric_cmp(&self, a: &Value, b: &Value) -> EvalResult<Ordering> {
        Ok(self.as_scaled(a)?.cmp(&self.as_scaled(b)?))
    }

    fn compute_op(&self, op: Operator, args: &[Value]) -> EvalResult<Value> {
        match (op, args) {
            (Operator::Plus, [a, b]) => {
                self.narrow(self.as_scaled(a)? as i128 + self.as_scaled(b)? as i128)
            }
            (Operator::Minus, [a, b]) => {
                self.narrow(self.as_scaled(a)? as i128 - self.as_scaled(b)? as i128)
            }
            (Operator::Times, [a, b]) => {
                let wide = self.as_scaled(a)? as i128 * self.as_scaled(b)? as i128;
                self.narrow(div_round(wide, self.factor as i128)?)
            }
            (Operator::Div, [a, b]) => {
                let wide = self.as_scaled(a)? as i128 * self.factor as i128;
                self.narrow(div_round(wide, self.as_scaled(b)? as i128)?)
            }
            (Operator::Exp, [a, b]) => {
                let x = self.to_f64(self.as_scaled(a)?);
                let y = self.to_f64(self.as_scaled(b)?);
                let r = x.powf(y);
                if !r.is_finite() {
                    return Err(EvalNotPossible);
                }
                Ok(Value::ScaledLong(self.scale_f64(r)?))
            }
            (Operator::Percent, [a]) => {
                self.narrow(div_round(self.as_scaled(a)? as i128, 100)?)
            }
            (Operator::Neg, [a]) => self.narrow(-(self.as_scaled(a)? as i128)),
            _ => fallback_op(self, op, args),
        }
    }

    fn compute_fn(&self, function: Function, args: &[ConstArg]) -> EvalResult<Value> {
        let via_f64 = |f: fn(f64) -> f64, arg: &ConstArg| -> EvalResult<Value> {
            let r = f(self.to_f64(self.as_scaled(arg.scalar()?)?));
            if !r.is_finite() {
                return Err(EvalNotPossible);
            }
            Ok(Value::ScaledLong(self.scale_f64(r)?))
        };
        match (function, args) {
            (Function::Abs, [a]) => {
                self.narrow((self.as_scaled(a.scalar()?)? as i128).abs())
            }
            (Function::Sign, [a]) => {
                let s = self.as_scaled(a.scalar()?)?.signum();
                Ok(Value::ScaledLong(s * self.factor))
            }
            (Function::Int, [a]) => {
                let v = self.as_scaled(a.scalar()?)?;
                Ok(Value::ScaledLong(v.div_euclid(self.factor) * self.factor))
            }
            (Function::Round, [a, d]) => {
                let v = self.as_scaled(a.scalar()?)?;
                let digits = self.to_int(d.scalar()?)?;
                if digits >= self.scale as i64 {
                    return Ok(Value::ScaledLong(v));
                }
                let drop = self.scale as i64 - digits;
                if drop > 18 {
                    return Err(EvalNotPossible);
                }
                let unit = 10i128.pow(drop as u32);
                self.narrow(div_round(v as i128, unit)? * unit)
            }
            (Function::Sqrt, [a]) => via_f64(f64::sqrt, a),
            (Function::Exp, [a]) => via_f64(f64::exp, a),
            (Function::Ln, [a]) => via_f64(f64::ln, a),
            (Function::Log10, [a]) => via_f64(f64::log10, a),
            (Function::Power, [a, b]) => {
                self.compute_op(Operator::Exp, &[a.scalar()?.clone(), b.scalar()?.clone()])
            }
            _ => fallback_fn(self, function, args),
        }
    }
}
