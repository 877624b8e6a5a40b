//! Value codec: wire-format text to typed values and back.
//!
//! Scalars are parsed from their text form, arrays and objects from JSON,
//! binary values from base64. Decoding never panics; a value that does not
//! fit its declared type decodes to `None`.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::value::{Value, ValueType};

/// Decode `raw` as a value of type `ty`.
pub fn decode(ty: &ValueType, raw: &str) -> Option<Value> {
    match ty {
        ValueType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueType::String => Some(Value::String(raw.to_string())),
        ValueType::Uint8 => raw.trim().parse().ok().map(Value::Uint8),
        ValueType::Uint16 => raw.trim().parse().ok().map(Value::Uint16),
        ValueType::Uint32 => raw.trim().parse().ok().map(Value::Uint32),
        ValueType::Uint64 => raw.trim().parse().ok().map(Value::Uint64),
        ValueType::Int8 => raw.trim().parse().ok().map(Value::Int8),
        ValueType::Int16 => raw.trim().parse().ok().map(Value::Int16),
        ValueType::Int32 => raw.trim().parse().ok().map(Value::Int32),
        ValueType::Int64 => raw.trim().parse().ok().map(Value::Int64),
        ValueType::Float32 => raw
            .trim()
            .parse()
            .ok()
            .or_else(|| float_from_base64::<4>(raw).map(f32::from_le_bytes))
            .map(Value::Float32),
        ValueType::Float64 => raw
            .trim()
            .parse()
            .ok()
            .or_else(|| float_from_base64::<8>(raw).map(f64::from_le_bytes))
            .map(Value::Float64),
        ValueType::Binary => BASE64.decode(raw.trim()).ok().map(Value::Binary),
        ValueType::Object => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Some(Value::Object(map)),
            _ => None,
        },
        ValueType::Array(element) => decode_array(element, raw),
    }
}

/// Accept raw bytes for a binary resource without any text parsing.
pub fn decode_binary(ty: &ValueType, bytes: &[u8]) -> Option<Value> {
    match ty {
        ValueType::Binary => Some(Value::Binary(bytes.to_vec())),
        _ => None,
    }
}

fn decode_array(element: &ValueType, raw: &str) -> Option<Value> {
    let items: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
    let mut decoded = Vec::with_capacity(items.len());
    for item in items {
        let value = match item {
            serde_json::Value::String(s) => decode(element, &s)?,
            other => decode(element, &other.to_string())?,
        };
        decoded.push(value);
    }
    Some(Value::Array(element.clone(), decoded))
}

fn float_from_base64<const N: usize>(raw: &str) -> Option<[u8; N]> {
    let bytes = BASE64.decode(raw.trim()).ok()?;
    bytes.try_into().ok()
}

/// Encode a value into its wire text form.
pub fn encode(value: &Value) -> String {
    match value {
        Value::Bool(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Uint8(v) => v.to_string(),
        Value::Uint16(v) => v.to_string(),
        Value::Uint32(v) => v.to_string(),
        Value::Uint64(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float32(v) => v.to_string(),
        Value::Float64(v) => v.to_string(),
        Value::Binary(v) => BASE64.encode(v),
        Value::Object(map) => serde_json::Value::Object(map.clone()).to_string(),
        Value::Array(_, items) => {
            let parts: Vec<String> = items.iter().map(encode_array_item).collect();
            format!("[{}]", parts.join(","))
        }
    }
}

fn encode_array_item(value: &Value) -> String {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()).to_string(),
        other => encode(other),
    }
}

/// Bit mask of a masked resource.
///
/// The declared mask is complemented once when the command is resolved so
/// the write path is a single AND on the current register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask {
    /// Declared mask: the bits a write may change
    pub bits: u64,
    /// Complement of `bits`: the bits a write preserves
    pub keep: u64,
}

impl Mask {
    pub fn new(bits: u64) -> Self {
        Self { bits, keep: !bits }
    }

    /// Merge `value` into `current`, touching only the masked bits.
    pub fn merge(&self, current: u64, value: u64) -> u64 {
        (current & self.keep) | (value & self.bits)
    }

    /// Reduce a reading to its masked bits.
    pub fn read(&self, value: u64) -> u64 {
        value & self.bits
    }

    /// Apply `merge` to typed values of the same integer type.
    pub fn merge_values(&self, current: &Value, value: &Value) -> Option<Value> {
        let merged = self.merge(current.to_bits()?, value.to_bits()?);
        Value::from_bits(&value.value_type(), merged)
    }

    /// Apply `read` to a typed integer value.
    pub fn read_value(&self, value: &Value) -> Option<Value> {
        Value::from_bits(&value.value_type(), self.read(value.to_bits()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let text = encode(&value);
        assert_eq!(
            decode(&value.value_type(), &text),
            Some(value.clone()),
            "round trip of {:?} via {:?}",
            value,
            text
        );
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(Value::Bool(true));
        round_trip(Value::String("hello, world".to_string()));
        round_trip(Value::Uint8(u8::MAX));
        round_trip(Value::Uint16(513));
        round_trip(Value::Uint32(u32::MAX));
        round_trip(Value::Uint64(u64::MAX));
        round_trip(Value::Int8(i8::MIN));
        round_trip(Value::Int16(-300));
        round_trip(Value::Int32(72));
        round_trip(Value::Int64(i64::MIN));
        round_trip(Value::Float32(0.1));
        round_trip(Value::Float32(-3.4e38));
        round_trip(Value::Float64(std::f64::consts::PI));
        round_trip(Value::Float64(1e-300));
    }

    #[test]
    fn test_binary_object_array_round_trips() {
        round_trip(Value::Binary(vec![0, 1, 2, 254, 255]));
        round_trip(Value::Binary(Vec::new()));

        let mut map = serde_json::Map::new();
        map.insert("mode".to_string(), serde_json::json!("auto"));
        map.insert("level".to_string(), serde_json::json!(3));
        round_trip(Value::Object(map));

        round_trip(Value::Array(
            ValueType::Int16,
            vec![Value::Int16(-1), Value::Int16(0), Value::Int16(7)],
        ));
        round_trip(Value::Array(
            ValueType::String,
            vec![Value::String("a,b".to_string()), Value::String("\"q\"".to_string())],
        ));
        round_trip(Value::Array(
            ValueType::Float64,
            vec![Value::Float64(1.5), Value::Float64(-0.25)],
        ));
        round_trip(Value::Array(ValueType::Bool, vec![Value::Bool(false)]));
        round_trip(Value::Array(ValueType::Uint8, Vec::new()));
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(decode(&ValueType::Uint8, "256"), None);
        assert_eq!(decode(&ValueType::Int32, "seventy"), None);
        assert_eq!(decode(&ValueType::Bool, "yes"), None);
        assert_eq!(decode(&ValueType::Object, "[1,2]"), None);
        assert_eq!(decode(&ValueType::Binary, "***"), None);
    }

    #[test]
    fn test_array_fails_on_single_bad_element() {
        let ty = ValueType::array_of(ValueType::Uint8);
        assert!(decode(&ty, "[1, 2, 3]").is_some());
        assert_eq!(decode(&ty, "[1, 300, 3]"), None);
        assert_eq!(decode(&ty, "not json"), None);
    }

    #[test]
    fn test_float_base64_fallback() {
        let encoded = BASE64.encode(2.5f32.to_le_bytes());
        assert_eq!(decode(&ValueType::Float32, &encoded), Some(Value::Float32(2.5)));
    }

    #[test]
    fn test_decode_binary_bypasses_text() {
        assert_eq!(
            decode_binary(&ValueType::Binary, b"\xff\x00"),
            Some(Value::Binary(vec![0xff, 0x00]))
        );
        assert_eq!(decode_binary(&ValueType::String, b"abc"), None);
    }

    #[test]
    fn test_mask_merge_is_bit_exact() {
        let cases: [(u64, u64, u64); 4] = [
            (0xF0, 0x1234, 0xABCD),
            (0x0F0F, 0xFFFF, 0x0000),
            (0, 0xDEAD, 0xBEEF),
            (u64::MAX, 0x1, 0x2),
        ];
        for (m, c, v) in cases {
            let mask = Mask::new(m);
            assert_eq!(mask.merge(c, v), (c & !m) | (v & m));
        }
    }

    #[test]
    fn test_mask_typed_values() {
        let mask = Mask::new(0x0F);
        assert_eq!(
            mask.merge_values(&Value::Uint8(0xA5), &Value::Uint8(0x03)),
            Some(Value::Uint8(0xA3))
        );
        assert_eq!(mask.read_value(&Value::Uint16(0x1234)), Some(Value::Uint16(0x4)));
        assert_eq!(mask.read_value(&Value::Float32(1.0)), None);
    }
}
