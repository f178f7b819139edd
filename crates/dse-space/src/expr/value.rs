use dse_types::{ExprError, ParamValue};
use std::collections::HashMap;

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
}

/// Names visible to an expression, usually the values of a parameter's dependencies.
pub type Bindings = HashMap<String, Value>;

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Bool(v) => *v,
            Value::Str(v) => !v.is_empty(),
            Value::List(v) => !v.is_empty(),
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Float view of any numeric value.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            other => other.as_int().map(|v| v as f64),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Python-style equality: numbers compare by value across int, float and bool.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            _ => false,
        }
    }

    /// Converts an evaluated option into a parameter value.
    pub fn to_param_value(&self) -> Result<ParamValue, ExprError> {
        match self {
            Value::Int(v) => Ok(ParamValue::Int(*v)),
            Value::Bool(v) => Ok(ParamValue::Int(i64::from(*v))),
            Value::Str(v) => Ok(ParamValue::Str(v.clone())),
            other => Err(ExprError::Type {
                message: format!("option values must be int or str, found {}", other.type_name()),
            }),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{v:.1}")
            }
            Value::Float(v) if v.is_nan() => write!(f, "nan"),
            Value::Float(v) if v.is_infinite() => {
                write!(f, "{}", if *v > 0.0 { "inf" } else { "-inf" })
            }
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Str(v) => write!(f, "{v}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&ParamValue> for Value {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Int(v) => Value::Int(*v),
            ParamValue::Str(v) => Value::Str(v.clone()),
        }
    }
}
