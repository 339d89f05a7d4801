//! Text payload codec
//!
//! Payloads are plain UTF-8 decimal text such as `200`, `-17` or `13.3`,
//! independent of locale. Floats use the shortest text that parses back to the
//! same value; non-finite floats are written `NaN`, `Infinity`, `-Infinity`.

use bytes::Bytes;

use crate::core::device::{Value, ValueType};
use crate::error::{LogoSrvError, Result};

/// Text form of `value`
pub fn encode(value: Value) -> String {
    match value {
        Value::Byte(v) => v.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) if v.is_nan() => "NaN".to_string(),
        Value::Float(v) if v.is_infinite() => {
            if v > 0.0 {
                "Infinity".to_string()
            } else {
                "-Infinity".to_string()
            }
        },
        Value::Float(v) => v.to_string(),
    }
}

pub fn encode_payload(value: Value) -> Bytes {
    Bytes::from(encode(value))
}

/// Parse `payload` as a value of `value_type`
pub fn decode(value_type: ValueType, payload: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| LogoSrvError::data("Payload is not UTF-8 text"))?
        .trim();
    if text.is_empty() {
        return Err(LogoSrvError::data("Payload is empty"));
    }

    match value_type {
        ValueType::Byte => {
            let v = parse_integral(text)?;
            u8::try_from(v)
                .map(Value::Byte)
                .map_err(|_| LogoSrvError::data(format!("{} is not a byte value", text)))
        },
        ValueType::Integer => {
            let v = parse_integral(text)?;
            i16::try_from(v)
                .map(Value::Integer)
                .map_err(|_| LogoSrvError::data(format!("{} is not a 16 bit integer", text)))
        },
        ValueType::Float => parse_float(text).map(Value::Float),
    }
}

/// Integer text, or decimal text without a fractional part (`42.0`)
fn parse_integral(text: &str) -> Result<i64> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(v);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() <= i64::MAX as f64 => Ok(v as i64),
        _ => Err(LogoSrvError::data(format!("'{}' is not an integer", text))),
    }
}

fn parse_float(text: &str) -> Result<f32> {
    match text {
        "NaN" => Ok(f32::NAN),
        "Infinity" | "+Infinity" => Ok(f32::INFINITY),
        "-Infinity" => Ok(f32::NEG_INFINITY),
        _ => {
            // Rust also reads "inf" and "nan"; only the spelled out forms count
            if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return Err(LogoSrvError::data(format!("'{}' is not a number", text)));
            }
            text.parse::<f32>()
                .map_err(|_| LogoSrvError::data(format!("'{}' is not a number", text)))
        },
    }
}
