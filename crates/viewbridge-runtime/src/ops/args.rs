//! JSON argument conversion for operations

use crate::error::{BridgeError, BridgeResult};
use crate::handles::HandleId;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::Value;

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> BridgeResult<&'a Value> {
    args.get(index)
        .filter(|value| !value.is_null())
        .ok_or_else(|| BridgeError::invalid_argument(format!("missing argument {} ({})", index, name)))
}

fn mismatch(index: usize, name: &str, expected: &str, value: &Value) -> BridgeError {
    BridgeError::invalid_argument(format!(
        "argument {} ({}) must be {}, got {}",
        index, name, expected, value
    ))
}

pub fn arg_str<'a>(args: &'a [Value], index: usize, name: &str) -> BridgeResult<&'a str> {
    let value = arg(args, index, name)?;
    value
        .as_str()
        .ok_or_else(|| mismatch(index, name, "a string", value))
}

/// Optional string; absent and `null` are both `None`
pub fn arg_opt_str<'a>(args: &'a [Value], index: usize, name: &str) -> BridgeResult<Option<&'a str>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| mismatch(index, name, "a string", value)),
    }
}

/// Booleans also accept `0`/`1`, which is what C callers tend to send
pub fn arg_bool(args: &[Value], index: usize, name: &str) -> BridgeResult<bool> {
    let value = arg(args, index, name)?;
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) if number.as_i64().is_some() => Ok(number.as_i64() != Some(0)),
        _ => Err(mismatch(index, name, "a boolean", value)),
    }
}

pub fn arg_opt_bool(args: &[Value], index: usize, name: &str) -> BridgeResult<Option<bool>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg_bool(args, index, name).map(Some),
    }
}

pub fn arg_i64(args: &[Value], index: usize, name: &str) -> BridgeResult<i64> {
    let value = arg(args, index, name)?;
    value
        .as_i64()
        .ok_or_else(|| mismatch(index, name, "an integer", value))
}

pub fn arg_u32(args: &[Value], index: usize, name: &str) -> BridgeResult<u32> {
    let value = arg(args, index, name)?;
    value
        .as_u64()
        .and_then(|number| u32::try_from(number).ok())
        .ok_or_else(|| mismatch(index, name, "an unsigned 32-bit integer", value))
}

pub fn arg_f64(args: &[Value], index: usize, name: &str) -> BridgeResult<f64> {
    let value = arg(args, index, name)?;
    value
        .as_f64()
        .ok_or_else(|| mismatch(index, name, "a number", value))
}

pub fn arg_handle(args: &[Value], index: usize, name: &str) -> BridgeResult<HandleId> {
    arg_u32(args, index, name)
}

/// Structured argument; a JSON string holding the document is accepted too
pub fn arg_json<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> BridgeResult<T> {
    let value = arg(args, index, name)?;
    let parsed = match value {
        Value::String(text) => {
            serde_json::from_str(text).or_else(|_| serde_json::from_value(value.clone()))
        }
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| BridgeError::invalid_argument(format!("argument {} ({}): {}", index, name, e)))
}

pub fn arg_opt_json<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> BridgeResult<Option<T>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg_json(args, index, name).map(Some),
    }
}

pub fn encode_base64(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

pub fn decode_base64(args: &[Value], index: usize, name: &str) -> BridgeResult<Vec<u8>> {
    let text = arg_opt_str(args, index, name)?.unwrap_or_default();
    STANDARD
        .decode(text)
        .map_err(|e| BridgeError::invalid_argument(format!("argument {} ({}): {}", index, name, e)))
}
