//! Query-related data models.
//!
//! This module defines the positional parameter values bound to `?` placeholders.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Structured JSON value
    Json(JsonValue),
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for QueryParam {
                fn from(v: $ty) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for QueryParam {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for QueryParam {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert_eq!(QueryParam::from(1), QueryParam::Int(1));
        assert_eq!(QueryParam::from(7u32), QueryParam::Int(7));
        assert_eq!(QueryParam::from("Ada"), QueryParam::String("Ada".to_string()));
        assert_eq!(QueryParam::from(true), QueryParam::Bool(true));
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(2.5)), QueryParam::Float(2.5));
    }

    #[test]
    fn test_untagged_deserialize() {
        let params: Vec<QueryParam> = serde_json::from_str(r#"[1, "x", true, null]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Int(1),
                QueryParam::String("x".to_string()),
                QueryParam::Bool(true),
                QueryParam::Null,
            ]
        );
    }
}
