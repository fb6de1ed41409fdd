//! value representation
//!
//! Attributes resolve to one of these data types
//! - boolean (true/false)
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//!
//! Additionally there is `object`, an order-preserving map only used to render a resolved node tree.
//!
//! Expressions work on numbers. The conversions in and out of `f64` are:
//! - boolean <-> `0.0`/`1.0` (any non-zero number is true)
//! - integer <-> decimal, rounding to the nearest integer
//! - strings never take part in arithmetic
use serde::{ser::SerializeMap, Serializer};

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Object(indexmap::IndexMap<String, Value>),
}

/// Declared type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Integer,
    Decimal,
    String,
}

impl Value {
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Decimal(_) => Some(ValueType::Decimal),
            Value::String(_) => Some(ValueType::String),
            Value::Object(_) => None,
        }
    }

    /// Numeric view used by expressions
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            Value::String(_) | Value::Object(_) => None,
        }
    }
}

impl ValueType {
    /// Convert the numeric result of an expression into this type
    pub fn from_number(self, number: f64) -> Result<Value, ConversionError> {
        match self {
            ValueType::Decimal => Ok(Value::Decimal(number)),
            ValueType::Boolean => Ok(Value::Boolean(number != 0.0)),
            ValueType::Integer => {
                let rounded = number.round();
                if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                    return Err(ConversionError::OutOfRange(number));
                }
                Ok(Value::Integer(rounded as i64))
            }
            ValueType::String => Err(ConversionError::NotNumeric(self)),
        }
    }

    /// Convert a plain literal, no expressions involved
    pub fn parse_literal(self, raw: &str) -> Result<Value, ConversionError> {
        let trimmed = raw.trim();
        let invalid = || ConversionError::InvalidLiteral {
            value_type: self,
            raw: raw.to_string(),
        };

        match self {
            ValueType::String => Ok(Value::String(raw.to_string())),
            ValueType::Boolean => match trimmed {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
            ValueType::Integer => trimmed.parse().map(Value::Integer).map_err(|_| invalid()),
            ValueType::Decimal => trimmed.parse().map(Value::Decimal).map_err(|_| invalid()),
        }
    }

    /// Whether expressions can produce this type
    pub fn is_numeric(self) -> bool {
        !matches!(self, ValueType::String)
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Boolean => f.write_str("boolean"),
            ValueType::Integer => f.write_str("integer"),
            ValueType::Decimal => f.write_str("decimal"),
            ValueType::String => f.write_str("string"),
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "integer" | "int" => Ok(ValueType::Integer),
            "decimal" | "number" => Ok(ValueType::Decimal),
            "string" => Ok(ValueType::String),
            other => Err(ConversionError::UnknownType(other.to_string())),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(_) => {
                f.write_str(&serde_json::to_string(self).map_err(|_| std::fmt::Error)?)
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("'{raw}' is not a valid {value_type}")]
    InvalidLiteral { value_type: ValueType, raw: String },
    #[error("{0} does not fit into an integer")]
    OutOfRange(f64),
    #[error("expressions cannot produce a {0}")]
    NotNumeric(ValueType),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: ValueType, found: String },
}

/// Typed extraction of a resolved [Value]
pub trait FromValue: Sized {
    const TYPE: ValueType;
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const TYPE: ValueType = ValueType::Boolean;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const TYPE: ValueType = ValueType::Integer;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const TYPE: ValueType = ValueType::Decimal;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    const TYPE: ValueType = ValueType::String;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}
