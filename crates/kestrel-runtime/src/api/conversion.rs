//! Type conversion between Rust and script values
//!
//! - `ToValue` converts Rust types into a [`Value`]
//! - `FromValue` converts a [`Value`] back, failing on a type mismatch
//!
//! Hosts use these for native function arguments and for the arguments and
//! results of [`Runtime::call`](crate::runtime::Runtime::call).
//!
//! # Examples
//!
//! ```
//! use kestrel_runtime::api::conversion::{FromValue, ToValue};
//!
//! let value = vec![1i64, 2, 3].to_value();
//! let back: Vec<i64> = FromValue::from_value(&value).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

use crate::value::{HashKey, Value};
use indexmap::IndexMap;
use thiserror::Error;

/// Error type for value conversion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Array element type mismatch at index {index}: expected {expected}, found {found}")]
    ArrayElementTypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Map value type mismatch for key '{key}': expected {expected}, found {found}")]
    MapValueTypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Convert a script value to a Rust type
pub trait FromValue: Sized {
    /// # Errors
    ///
    /// Returns `ConversionError` if the value has the wrong type.
    fn from_value(value: &Value) -> Result<Self, ConversionError>;
}

/// Convert a Rust type to a script value
pub trait ToValue {
    fn to_value(self) -> Value;
}

fn mismatch(expected: &'static str, value: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        expected,
        found: value.type_name(),
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl ToValue for Value {
    fn to_value(self) -> Value {
        self
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Integer(n) => Ok(*n),
            _ => Err(mismatch("integer", value)),
        }
    }
}

impl ToValue for i64 {
    fn to_value(self) -> Value {
        Value::Integer(self)
    }
}

/// Integers widen to floats; floats never narrow to integers
impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Integer(n) => Ok(*n as f64),
            _ => Err(mismatch("float", value)),
        }
    }
}

impl ToValue for f64 {
    fn to_value(self) -> Value {
        Value::from(self)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Boolean(b) => Ok(*b),
            _ => Err(mismatch("boolean", value)),
        }
    }
}

impl ToValue for bool {
    fn to_value(self) -> Value {
        Value::Boolean(self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            _ => Err(mismatch("string", value)),
        }
    }
}

impl ToValue for String {
    fn to_value(self) -> Value {
        Value::from(self)
    }
}

impl ToValue for &str {
    fn to_value(self) -> Value {
        Value::string(self)
    }
}

impl FromValue for () {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(()),
            _ => Err(mismatch("null", value)),
        }
    }
}

impl ToValue for () {
    fn to_value(self) -> Value {
        Value::Null
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            _ => Ok(Some(T::from_value(value)?)),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(self) -> Value {
        match self {
            None => Value::Null,
            Some(v) => v.to_value(),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        let Value::Array(arr) = value else {
            return Err(mismatch("array", value));
        };
        arr.read()
            .iter()
            .enumerate()
            .map(|(index, elem)| {
                T::from_value(elem).map_err(|err| match err {
                    ConversionError::TypeMismatch { expected, found } => {
                        ConversionError::ArrayElementTypeMismatch {
                            index,
                            expected,
                            found,
                        }
                    }
                    other => other,
                })
            })
            .collect()
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(self) -> Value {
        Value::array(self.into_iter().map(ToValue::to_value).collect())
    }
}

/// String-keyed ordered map; other key types are skipped
impl<T: FromValue> FromValue for IndexMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        let convert = |key: &HashKey, elem: &Value| -> Option<Result<(String, T), ConversionError>> {
            let HashKey::String(key) = key else {
                return None;
            };
            Some(
                T::from_value(elem)
                    .map(|v| (key.to_string(), v))
                    .map_err(|err| match err {
                        ConversionError::TypeMismatch { expected, found } => {
                            ConversionError::MapValueTypeMismatch {
                                key: key.to_string(),
                                expected,
                                found,
                            }
                        }
                        other => other,
                    }),
            )
        };
        match value {
            Value::OrderedMap(map) => map.read().iter().filter_map(|(k, v)| convert(k, v)).collect(),
            Value::HashMap(map) => map.read().iter().filter_map(|(k, v)| convert(k, v)).collect(),
            _ => Err(mismatch("map", value)),
        }
    }
}

impl<T: ToValue> ToValue for IndexMap<String, T> {
    fn to_value(self) -> Value {
        Value::ordered_map(
            self.into_iter()
                .map(|(k, v)| (HashKey::String(k.into()), v.to_value()))
                .collect(),
        )
    }
}
