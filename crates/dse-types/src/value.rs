//! Parameter values and design points.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token rendered in point keys for an empty value.
pub const EMPTY_VALUE_TOKEN: &str = "NA";

/// A concrete value of a design parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            Self::Int(_) => None,
        }
    }

    /// Python-style literal, used when a value is written back into an option expression.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Str(v) => format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// One concrete assignment of values to design parameters, ordered by id.
pub type DesignPoint = BTreeMap<String, ParamValue>;

/// Canonical key of a design point: sorted `id-value` pairs joined by `.`.
pub fn point_key(point: &DesignPoint) -> String {
    point
        .iter()
        .map(|(id, value)| match value {
            ParamValue::Str(s) if s.is_empty() => format!("{id}-{EMPTY_VALUE_TOKEN}"),
            _ => format!("{id}-{value}"),
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_key_is_sorted() {
        let mut point = DesignPoint::new();
        point.insert("C".to_string(), "flatten".into());
        point.insert("A".to_string(), 4.into());
        point.insert("B".to_string(), "".into());

        assert_eq!(point_key(&point), "A-4.B-NA.C-flatten");
    }

    #[test]
    fn test_untagged_serialization() {
        let mut point = DesignPoint::new();
        point.insert("A".to_string(), 8.into());
        point.insert("B".to_string(), "off".into());

        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, r#"{"A":8,"B":"off"}"#);
        let back: DesignPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_literal() {
        assert_eq!(ParamValue::from(3).to_literal(), "3");
        assert_eq!(ParamValue::from("it's").to_literal(), r"'it\'s'");
    }
}
