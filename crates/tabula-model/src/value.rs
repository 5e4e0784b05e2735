use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Constant value held by a cell or a literal expression node.
///
/// The enum uses an explicit `{type, value}` tagged layout for stable
/// serialization across host boundaries. Date-like values reach this layer
/// already converted to serial numbers by the host model builder, so there
/// is no date variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Empty / unset value.
    Null,
    /// IEEE-754 double precision number.
    Number(f64),
    /// Fixed-point number stored as its scaled integer representation.
    ///
    /// The scale is a property of the active numeric representation, not of
    /// the value; a model only ever mixes scaled longs of one scale.
    ScaledLong(i64),
    /// Arbitrary-precision decimal.
    Decimal(BigDecimal),
    /// Plain string.
    Text(String),
    /// Boolean; numeric for typing purposes.
    Bool(bool),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Returns true if the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The data type this value classifies as.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Number(_) | Value::ScaledLong(_) | Value::Decimal(_) | Value::Bool(_) => {
                DataType::Numeric
            }
            Value::Text(_) => DataType::Text,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::Decimal(value)
    }
}

/// Compile-time data type of an expression or cell.
///
/// Booleans and all numeric representations classify as `Numeric`; `Null`
/// marks absent values and unifies with anything.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Numeric,
    Text,
    Null,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classification() {
        assert_eq!(Value::Number(1.5).data_type(), DataType::Numeric);
        assert_eq!(Value::ScaledLong(1000).data_type(), DataType::Numeric);
        assert_eq!(Value::Bool(true).data_type(), DataType::Numeric);
        assert_eq!(Value::from("abc").data_type(), DataType::Text);
        assert_eq!(Value::Null.data_type(), DataType::Null);
    }

    #[test]
    fn tagged_serde_layout() {
        let json = serde_json::to_string(&Value::Number(2.0)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":2.0}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Number(2.0));
    }
}
