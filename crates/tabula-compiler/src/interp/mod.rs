//! Compile-time evaluation of constant expressions, one strategy per
//! numeric representation.
//!
//! Strategies implement arithmetic in their own representation and fall
//! back to a shared generic layer for comparisons, string operations and
//! the structural functions (IF, NOT, INDEX, MATCH, COUNT). "Not possible"
//! is the normal way to decline an evaluation and leave the expression for
//! runtime; it is never surfaced as a compile error.

mod decimal;
mod double;
mod scaled_long;

pub use decimal::DecimalInterp;
pub use double::DoubleInterp;
pub use scaled_long::ScaledLongInterp;

use std::cmp::Ordering;

use tabula_model::{ArrayShape, DataType, Function, Operator, Value};

/// Marker: the value cannot be computed at compile time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EvalNotPossible;

pub type EvalResult<T> = Result<T, EvalNotPossible>;

/// A fully folded argument: either a scalar or a constant array.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstArg {
    Scalar(Value),
    Array(ArrayShape, Vec<Value>),
}

impl ConstArg {
    pub fn scalar(&self) -> EvalResult<&Value> {
        match self {
            ConstArg::Scalar(v) => Ok(v),
            ConstArg::Array(..) => Err(EvalNotPossible),
        }
    }

    /// All values in argument order; a scalar yields itself.
    pub fn values(&self) -> &[Value] {
        match self {
            ConstArg::Scalar(v) => std::slice::from_ref(v),
            ConstArg::Array(_, vs) => vs,
        }
    }
}

/// One numeric representation's compile-time evaluator.
pub trait Interpreter {
    /// Converts a constant produced or consumed by folding into this
    /// representation. Non-convertible values pass through unchanged.
    fn adjust(&self, value: Value) -> Value;

    fn zero(&self) -> Value;

    /// Smallest representable value; `None` for unbounded representations,
    /// in which case MIN/MAX seeds never fold.
    fn min_value(&self) -> Option<Value>;

    /// Largest representable value; see [`Interpreter::min_value`].
    fn max_value(&self) -> Option<Value>;

    /// Numeric coercion: null counts as zero, booleans as one and zero,
    /// strings parse in this representation.
    fn to_number(&self, value: &Value) -> EvalResult<Value>;

    /// Integer coercion, truncating.
    fn to_int(&self, value: &Value) -> EvalResult<i64>;

    /// Ordering of two numerically coercible values.
    fn numeric_cmp(&self, a: &Value, b: &Value) -> EvalResult<Ordering>;

    fn compute_op(&self, op: Operator, args: &[Value]) -> EvalResult<Value>;

    fn compute_fn(&self, function: Function, args: &[ConstArg]) -> EvalResult<Value>;

    /// Spreadsheet comparison: any string sorts above any number, null
    /// equals the empty string and counts as zero against numbers.
    fn compare(&self, a: &Value, b: &Value) -> EvalResult<Ordering> {
        match (a, b) {
            (Value::Text(x), Value::Text(y)) => {
                Ok(x.to_lowercase().cmp(&y.to_lowercase()))
            }
            (Value::Text(x), Value::Null) => Ok(x.to_lowercase().cmp(&String::new())),
            (Value::Null, Value::Text(y)) => Ok(String::new().cmp(&y.to_lowercase())),
            (Value::Text(_), _) => Ok(Ordering::Greater),
            (_, Value::Text(_)) => Ok(Ordering::Less),
            _ => self.numeric_cmp(a, b),
        }
    }

    fn to_bool(&self, value: &Value) -> EvalResult<bool> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            _ => Ok(self.numeric_cmp(value, &self.zero())? != Ordering::Equal),
        }
    }
}

/// Compile-time text rendering; numbers are locale-dependent and stay for
/// runtime.
fn to_text(value: &Value) -> EvalResult<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Number(_) | Value::ScaledLong(_) | Value::Decimal(_) => Err(EvalNotPossible),
    }
}

/// Operator fallback shared by every strategy.
pub(crate) fn fallback_op(
    interp: &dyn Interpreter,
    op: Operator,
    args: &[Value],
) -> EvalResult<Value> {
    match (op, args) {
        (Operator::Concat, args) => {
            let mut out = String::new();
            for a in args {
                out.push_str(&to_text(a)?);
            }
            Ok(Value::Text(out))
        }
        (op, [a, b]) if op.is_comparison() => {
            let ord = interp.compare(a, b)?;
            let result = match op {
                Operator::Equal => ord == Ordering::Equal,
                Operator::NotEqual => ord != Ordering::Equal,
                Operator::Greater => ord == Ordering::Greater,
                Operator::GreaterOrEqual => ord != Ordering::Less,
                Operator::Less => ord == Ordering::Less,
                Operator::LessOrEqual => ord != Ordering::Greater,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        (Operator::Min, [a, b]) => {
            let a = interp.to_number(a)?;
            let b = interp.to_number(b)?;
            Ok(if interp.numeric_cmp(&a, &b)? != Ordering::Greater { a } else { b })
        }
        (Operator::Max, [a, b]) => {
            let a = interp.to_number(a)?;
            let b = interp.to_number(b)?;
            Ok(if interp.numeric_cmp(&a, &b)? != Ordering::Less { a } else { b })
        }
        _ => Err(EvalNotPossible),
    }
}

/// Function fallback shared by every strategy: structural functions and the
/// representation-independent string functions.
pub(crate) fn fallback_fn(
    interp: &dyn Interpreter,
    function: Function,
    args: &[ConstArg],
) -> EvalResult<Value> {
    match (function, args) {
        (Function::If, [cond, then]) => {
            let v = if interp.to_bool(cond.scalar()?)? {
                then.scalar()?.clone()
            } else {
                Value::Bool(false)
            };
            Ok(interp.adjust(v))
        }
        (Function::If, [cond, then, other]) => {
            let pick = if interp.to_bool(cond.scalar()?)? { then } else { other };
            Ok(interp.adjust(pick.scalar()?.clone()))
        }
        (Function::Not, [a]) => Ok(Value::Bool(!interp.to_bool(a.scalar()?)?)),
        (Function::Index, [ConstArg::Array(_, elems), index]) => {
            let i = interp.to_int(index.scalar()?)?;
            pick_element(elems, i)
        }
        (Function::Index, [ConstArg::Array(shape, elems), row, col]) => {
            let r = interp.to_int(row.scalar()?)?;
            let c = interp.to_int(col.scalar()?)?;
            if r < 1 || c < 1 || c > shape.cols as i64 {
                return Err(EvalNotPossible);
            }
            pick_element(elems, (r - 1) * shape.cols as i64 + c)
        }
        (Function::Match, [value, ConstArg::Array(_, elems)]) => {
            match_index(interp, value.scalar()?, elems, 1)
        }
        (Function::Match, [value, ConstArg::Array(_, elems), match_type]) => {
            let ty = interp.to_int(match_type.scalar()?)?;
            match_index(interp, value.scalar()?, elems, ty)
        }
        (Function::Count, args) => {
            let n = args
                .iter()
                .flat_map(|a| a.values())
                .filter(|v| v.data_type() == DataType::Numeric)
                .count();
            Ok(interp.adjust(Value::Number(n as f64)))
        }
        (Function::CountA, args) => {
            let n = args.iter().flat_map(|a| a.values()).filter(|v| !v.is_null()).count();
            Ok(interp.adjust(Value::Number(n as f64)))
        }
        (Function::Concatenate, args) => {
            let mut out = String::new();
            for a in args {
                out.push_str(&to_text(a.scalar()?)?);
            }
            Ok(Value::Text(out))
        }
        (Function::Len, [a]) => {
            let s = to_text(a.scalar()?)?;
            Ok(interp.adjust(Value::Number(s.chars().count() as f64)))
        }
        (Function::Lower, [a]) => Ok(Value::Text(to_text(a.scalar()?)?.to_lowercase())),
        (Function::Upper, [a]) => Ok(Value::Text(to_text(a.scalar()?)?.to_uppercase())),
        (Function::Trim, [a]) => {
            // Excel TRIM collapses interior runs of spaces as well.
            let s = to_text(a.scalar()?)?;
            Ok(Value::Text(s.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        (Function::Exact, [a, b]) => {
            Ok(Value::Bool(to_text(a.scalar()?)? == to_text(b.scalar()?)?))
        }
        (Function::Left, [a]) => take_chars(interp, a, &ConstArg::Scalar(Value::Number(1.0)), true),
        (Function::Left, [a, n]) => take_chars(interp, a, n, true),
        (Function::Right, [a]) => {
            take_chars(interp, a, &ConstArg::Scalar(Value::Number(1.0)), false)
        }
        (Function::Right, [a, n]) => take_chars(interp, a, n, false),
        (Function::Mid, [a, start, len]) => {
            let s = to_text(a.scalar()?)?;
            let start = interp.to_int(start.scalar()?)?;
            let len = interp.to_int(len.scalar()?)?;
            if start < 1 || len < 0 {
                return Err(EvalNotPossible);
            }
            Ok(Value::Text(
                s.chars().skip(start as usize - 1).take(len as usize).collect(),
            ))
        }
        (Function::Rept, [a, n]) => {
            let s = to_text(a.scalar()?)?;
            let n = interp.to_int(n.scalar()?)?;
            if n < 0 {
                return Err(EvalNotPossible);
            }
            Ok(Value::Text(s.repeat(n as usize)))
        }
        (Function::True, []) => Ok(Value::Bool(true)),
        (Function::False, []) => Ok(Value::Bool(false)),
        _ => Err(EvalNotPossible),
    }
}

fn take_chars(
    interp: &dyn Interpreter,
    text: &ConstArg,
    count: &ConstArg,
    from_left: bool,
) -> EvalResult<Value> {
    let s = to_text(text.scalar()?)?;
    let n = interp.to_int(count.scalar()?)?;
    if n < 0 {
        return Err(EvalNotPossible);
    }
    let n = n as usize;
    let len = s.chars().count();
    let taken: String = if from_left {
        s.chars().take(n).collect()
    } else {
        s.chars().skip(len.saturating_sub(n)).collect()
    };
    Ok(Value::Text(taken))
}

fn pick_element(elems: &[Value], index_1based: i64) -> EvalResult<Value> {
    if index_1based < 1 || index_1based as usize > elems.len() {
        return Err(EvalNotPossible);
    }
    Ok(elems[index_1based as usize - 1].clone())
}

/// MATCH semantics: type 0 scans for the first exact match; positive types
/// binary-search an ascending range for the rightmost element not above the
/// probe, negative types a descending range for the rightmost element not
/// below it.
fn match_index(
    interp: &dyn Interpreter,
    value: &Value,
    elems: &[Value],
    match_type: i64,
) -> EvalResult<Value> {
    if elems.is_empty() {
        return Err(EvalNotPossible);
    }
    let found = if match_type == 0 {
        let mut hit = None;
        for (i, e) in elems.iter().enumerate() {
            if interp.compare(e, value)? == Ordering::Equal {
                hit = Some(i);
                break;
            }
        }
        hit.ok_or(EvalNotPossible)?
    } else {
        let ascending = match_type > 0;
        let mut lo = 0usize;
        let mut hi = elems.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ord = interp.compare(&elems[mid], value)?;
            let keep_right = if ascending {
                ord != Ordering::Greater
            } else {
                ord != Ordering::Less
            };
            if keep_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Err(EvalNotPossible);
        }
        lo - 1
    };
    Ok(interp.adjust(Value::Number((found + 1) as f64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn interp() -> DoubleInterp {
        DoubleInterp
    }

    #[test]
    fn strings_sort_above_numbers() {
        let i = interp();
        assert_eq!(
            i.compare(&Value::from("a"), &Value::Number(1e300)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            i.compare(&Value::Null, &Value::from("")).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            i.compare(&Value::Null, &Value::Number(0.0)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn match_exact_takes_first_hit() {
        let i = interp();
        let elems = vec![
            Value::Number(3.0),
            Value::Number(1.0),
            Value::Number(1.0),
            Value::Number(2.0),
        ];
        let r = match_index(&i, &Value::Number(1.0), &elems, 0).unwrap();
        assert_eq!(r, Value::Number(2.0));
        assert_eq!(
            match_index(&i, &Value::Number(9.0), &elems, 0),
            Err(EvalNotPossible)
        );
    }

    #[test]
    fn match_ascending_returns_rightmost_not_above() {
        let i = interp();
        let elems: Vec<Value> =
            [1.0, 2.0, 2.0, 4.0].iter().map(|n| Value::Number(*n)).collect();
        // Probe 3 lands after the run of 2s.
        let r = match_index(&i, &Value::Number(3.0), &elems, 1).unwrap();
        assert_eq!(r, Value::Number(3.0));
        // Probe below the first element has no compatible slot.
        assert_eq!(
            match_index(&i, &Value::Number(0.5), &elems, 1),
            Err(EvalNotPossible)
        );
    }

    #[test]
    fn match_descending() {
        let i = interp();
        let elems: Vec<Value> =
            [9.0, 7.0, 5.0, 3.0].iter().map(|n| Value::Number(*n)).collect();
        let r = match_index(&i, &Value::Number(6.0), &elems, -1).unwrap();
        assert_eq!(r, Value::Number(2.0));
    }

    #[test]
    fn if_two_arity_falls_back_to_false() {
        let i = interp();
        let r = fallback_fn(
            &i,
            Function::If,
            &[
                ConstArg::Scalar(Value::Bool(false)),
                ConstArg::Scalar(Value::Number(1.0)),
            ],
        )
        .unwrap();
        assert_eq!(r, Value::Bool(false));
    }

    #[test]
    fn concat_of_number_is_not_possible() {
        let i = interp();
        assert_eq!(
            fallback_op(&i, Operator::Concat, &[Value::from("a"), Value::Number(1.0)]),
            Err(EvalNotPossible)
        );
        assert_eq!(
            fallback_op(&i, Operator::Concat, &[Value::from("a"), Value::from("b")]).unwrap(),
            Value::from("ab")
        );
    }
}
