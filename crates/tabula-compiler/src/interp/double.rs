use std::cmp::Ordering;

use num_traits::ToPrimitive;
use tabula_model::{Function, Operator, Value};

use super::{fallback_fn, fallback_op, ConstArg, EvalNotPossible, EvalResult, Interpreter};

/// IEEE-754 double precision strategy, the native representation.
///
/// Any non-finite result declines to fold so runtime error semantics stay
/// untouched.
#[derive(Copy, Clone, Debug, Default)]
pub struct DoubleInterp;

impl DoubleInterp {
    fn as_f64(&self, value: &Value) -> EvalResult<f64> {
        match value {
            Value::Null => Ok(0.0),
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Decimal(d) => d.to_f64().ok_or(EvalNotPossible),
            Value::Text(s) => s.trim().parse().map_err(|_| EvalNotPossible),
            // Raw scaled longs carry no scale of their own.
            Value::ScaledLong(_) => Err(EvalNotPossible),
        }
    }

    fn finite(&self, n: f64) -> EvalResult<Value> {
        if n.is_finite() {
            Ok(Value::Number(n))
        } else {
            Err(EvalNotPossible)
        }
    }
}

fn round_at(x: f64, digits: i64) -> f64 {
    let p = 10f64.powi(digits as i32);
    // f64::round is half away from zero, matching spreadsheet ROUND.
    (x * p).round() / p
}

impl Interpreter for DoubleInterp {
    fn adjust(&self, value: Value) -> Value {
        match value {
            Value::Decimal(d) => match d.to_f64() {
                Some(n) if n.is_finite() => Value::Number(n),
                _ => Value::Decimal(d),
            },
            other => other,
        }
    }

    fn zero(&self) -> Value {
        Value::Number(0.0)
    }

    fn min_value(&self) -> Option<Value> {
        Some(Value::Number(f64::MIN))
    }

    fn max_value(&self) -> Option<Value> {
        Some(Value::Number(f64::MAX))
    }

    fn to_number(&self, value: &Value) -> EvalResult<Value> {
        self.finite(self.as_f64(value)?)
    }

    fn to_int(&self, value: &Value) -> EvalResult<i64> {
        let n = self.as_f64(value)?;
        if n.is_finite() {
            Ok(n.trunc() as i64)
        } else {
            Err(EvalNotPossible)
        }
    }

    fn numeric_cmp(&self, a: &Value, b: &Value) -> EvalResult<Ordering> {
        let a = self.as_f64(a)?;
        let b = self.as_f64(b)?;
        a.partial_cmp(&b).ok_or(EvalNotPossible)
    }

    fn compute_op(&self, op: Operator, args: &[Value]) -> EvalResult<Value> {
        match (op, args) {
            (Operator::Plus, [a, b]) => self.finite(self.as_f64(a)? + self.as_f64(b)?),
            (Operator::Minus, [a, b]) => self.finite(self.as_f64(a)? - self.as_f64(b)?),
            (Operator::Times, [a, b]) => self.finite(self.as_f64(a)? * self.as_f64(b)?),
            (Operator::Div, [a, b]) => self.finite(self.as_f64(a)? / self.as_f64(b)?),
            (Operator::Exp, [a, b]) => self.finite(self.as_f64(a)?.powf(self.as_f64(b)?)),
            (Operator::Percent, [a]) => self.finite(self.as_f64(a)? / 100.0),
            (Operator::Neg, [a]) => self.finite(-self.as_f64(a)?),
            _ => fallback_op(self, op, args),
        }
    }

    fn compute_fn(&self, function: Function, args: &[ConstArg]) -> EvalResult<Value> {
        let unary = |f: fn(f64) -> f64| -> EvalResult<Value> {
            let x = self.as_f64(args[0].scalar()?)?;
            self.finite(f(x))
        };
        match (function, args) {
            (Function::Abs, [_]) => unary(f64::abs),
            (Function::Acos, [_]) => unary(f64::acos),
            (Function::Asin, [_]) => unary(f64::asin),
            (Function::Atan, [_]) => unary(f64::atan),
            (Function::Cos, [_]) => unary(f64::cos),
            (Function::Sin, [_]) => unary(f64::sin),
            (Function::Tan, [_]) => unary(f64::tan),
            (Function::Exp, [_]) => unary(f64::exp),
            (Function::Ln, [_]) => unary(f64::ln),
            (Function::Log10, [_]) => unary(f64::log10),
            (Function::Sqrt, [_]) => unary(f64::sqrt),
            (Function::Degrees, [_]) => unary(f64::to_degrees),
            (Function::Radians, [_]) => unary(f64::to_radians),
            (Function::Int, [_]) => unary(f64::floor),
            (Function::Sign, [_]) => unary(f64::signum),
            (Function::Atan2, [x, y]) => {
                let x = self.as_f64(x.scalar()?)?;
                let y = self.as_f64(y.scalar()?)?;
                // Spreadsheet argument order is (x, y).
                self.finite(y.atan2(x))
            }
            (Function::Log, [a]) => {
                let x = self.as_f64(a.scalar()?)?;
                self.finite(x.log10())
            }
            (Function::Log, [a, base]) => {
                let x = self.as_f64(a.scalar()?)?;
                let b = self.as_f64(base.scalar()?)?;
                self.finite(x.log(b))
            }
            (Function::Power, [a, b]) => {
                let x = self.as_f64(a.scalar()?)?;
                let y = self.as_f64(b.scalar()?)?;
                self.finite(x.powf(y))
            }
            (Function::Mod, [a, b]) => {
                let x = self.as_f64(a.scalar()?)?;
                let y = self.as_f64(b.scalar()?)?;
                if y == 0.0 {
                    return Err(EvalNotPossible);
                }
                // Excel MOD takes the divisor's sign.
                self.finite(x - y * (x / y).floor())
            }
            (Function::Round, [a, d]) => {
                let x = self.as_f64(a.scalar()?)?;
                let d = self.to_int(d.scalar()?)?;
                self.finite(round_at(x, d))
            }
            (Function::RoundDown, [a, d]) => {
                let x = self.as_f64(a.scalar()?)?;
                let p = 10f64.powi(self.to_int(d.scalar()?)? as i32);
                self.finite((x * p).trunc() / p)
            }
            (Function::RoundUp, [a, d]) => {
                let x = self.as_f64(a.scalar()?)?;
                let p = 10f64.powi(self.to_int(d.scalar()?)? as i32);
                self.finite((x.abs() * p).ceil() / p * x.signum())
            }
            (Function::Trunc, [_]) => unary(f64::trunc),
            (Function::Trunc, [a, d]) => {
                let x = self.as_f64(a.scalar()?)?;
                let p = 10f64.powi(self.to_int(d.scalar()?)? as i32);
                self.finite((x * p).trunc() / p)
            }
            (Function::Even, [_]) => unary(|x| {
                let r = (x.abs() / 2.0).ceil() * 2.0;
                r * x.signum()
            }),
            (Function::Odd, [_]) => unary(|x| {
                let r = ((x.abs() + 1.0) / 2.0).ceil() * 2.0 - 1.0;
                r * x.signum()
            }),
            (Function::Floor, [a, s]) => {
                let x = self.as_f64(a.scalar()?)?;
                let s = self.as_f64(s.scalar()?)?;
                if s == 0.0 {
                    return Err(EvalNotPossible);
                }
                self.finite((x / s).floor() * s)
            }
            (Function::Ceiling, [a, s]) => {
                let x = self.as_f64(a.scalar()?)?;
                let s = self.as_f64(s.scalar()?)?;
                if s == 0.0 {
                    return Err(EvalNotPossible);
                }
                self.finite((x / s).ceil() * s)
            }
            (Function::Fact, [a]) => {
                let n = self.to_int(a.scalar()?)?;
                if !(0..=170).contains(&n) {
                    return Err(EvalNotPossible);
                }
                let mut r = 1.0f64;
                for i in 2..=n {
                    r *= i as f64;
                }
                self.finite(r)
            }
            (Function::Pi, []) => Ok(Value::Number(std::f64::consts::PI)),
            _ => fallback_fn(self, function, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn division_by_zero_declines() {
        let i = DoubleInterp;
        assert_eq!(
            i.compute_op(Operator::Div, &[Value::Number(1.0), Value::Number(0.0)]),
            Err(EvalNotPossible)
        );
    }

    #[test]
    fn null_counts_as_zero() {
        let i = DoubleInterp;
        assert_eq!(
            i.compute_op(Operator::Plus, &[Value::Null, Value::Number(2.0)]).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn round_is_half_away_from_zero() {
        let i = DoubleInterp;
        let args = [
            ConstArg::Scalar(Value::Number(-2.5)),
            ConstArg::Scalar(Value::Number(0.0)),
        ];
        assert_eq!(i.compute_fn(Function::Round, &args).unwrap(), Value::Number(-3.0));
    }

    #[test]
    fn excel_mod_takes_divisor_sign() {
        let i = DoubleInterp;
        let args = [
            ConstArg::Scalar(Value::Number(3.0)),
            ConstArg::Scalar(Value::Number(-2.0)),
        ];
        assert_eq!(i.compute_fn(Function::Mod, &args).unwrap(), Value::Number(-1.0));
    }
}
