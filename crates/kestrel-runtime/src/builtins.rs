//! Prelude native functions
//!
//! Every runtime starts with these registered, in this order, so their
//! builtin indexes are stable across compilation units.

use crate::api::native::NativeFunctionBuilder;
use crate::value::{NativeFunction, Value};

/// Prelude functions in registration order
pub fn prelude() -> Vec<NativeFunction> {
    vec![
        fixed("len", 1, len),
        fixed("close", 1, close),
        fixed("keys", 1, keys),
        fixed("values", 1, values),
        fixed("push", 2, push),
        fixed("type", 1, type_of),
        fixed("str", 1, to_str),
        fixed("error", 1, error),
    ]
}

fn fixed(name: &str, arity: usize, f: fn(&[Value]) -> Value) -> NativeFunction {
    NativeFunctionBuilder::new(name).with_arity(arity).build_with(f)
}

fn unsupported(function: &str, value: &Value) -> Value {
    Value::error(
        format!("{}() not supported for {}", function, value.type_name()),
        None,
    )
}

/// Length of a string (bytes), array, map or channel buffer
fn len(args: &[Value]) -> Value {
    let n = match &args[0] {
        Value::String(s) => s.len(),
        Value::Array(arr) => arr.read().len(),
        Value::OrderedMap(map) => map.read().len(),
        Value::HashMap(map) => map.read().len(),
        Value::Channel(ch) => ch.len(),
        other => return unsupported("len", other),
    };
    Value::Integer(n as i64)
}

fn close(args: &[Value]) -> Value {
    match &args[0] {
        Value::Channel(ch) => {
            ch.close();
            Value::Null
        }
        other => unsupported("close", other),
    }
}

/// Keys of a map in iteration order, or the field names of an instance
fn keys(args: &[Value]) -> Value {
    match &args[0] {
        Value::OrderedMap(map) => Value::array(map.read().keys().map(|k| k.to_value()).collect()),
        Value::HashMap(map) => Value::array(map.read().keys().map(|k| k.to_value()).collect()),
        Value::Instance(instance) => {
            Value::array(instance.fields.read().keys().map(Value::string).collect())
        }
        other => unsupported("keys", other),
    }
}

fn values(args: &[Value]) -> Value {
    match &args[0] {
        Value::OrderedMap(map) => Value::array(map.read().values().cloned().collect()),
        Value::HashMap(map) => Value::array(map.read().values().cloned().collect()),
        Value::Array(arr) => Value::array(arr.read().clone()),
        other => unsupported("values", other),
    }
}

/// Append in place and return the same array
fn push(args: &[Value]) -> Value {
    match &args[0] {
        Value::Array(arr) => {
            arr.write().push(args[1].clone());
            args[0].clone()
        }
        other => unsupported("push", other),
    }
}

fn type_of(args: &[Value]) -> Value {
    Value::string(args[0].type_name())
}

fn to_str(args: &[Value]) -> Value {
    Value::from(args[0].to_display_string())
}

/// Raise an error carrying the argument's text
fn error(args: &[Value]) -> Value {
    match &args[0] {
        Value::Error(_) => args[0].clone(),
        other => Value::error(other.to_display_string(), None),
    }
}
