//! Value transformations between raw device values and presented values.
//!
//! Reads apply `base`, then `scale`, then `offset`; writes apply the
//! inverse in reverse order. Results must still fit the resource type.
//! Mappings substitute whole values and are applied whether or not numeric
//! transforms are enabled.

use std::borrow::Cow;
use std::collections::HashMap;
use thiserror::Error;

use crate::codec;
use crate::profile::ResourceProperties;
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("transformed value {value} overflows {value_type}")]
    Overflow { value: f64, value_type: ValueType },
}

/// Numeric transforms applied by the pipeline when data transform is on.
pub trait TransformEngine: Send + Sync {
    /// Whether a value to be written lies within the resource's min/max.
    fn validate_range(&self, props: &ResourceProperties, value: &Value) -> bool;

    /// Presented value -> raw device value (writes).
    fn apply_incoming(&self, props: &ResourceProperties, value: Value) -> Result<Value, TransformError>;

    /// Raw device value -> presented value (reads).
    fn apply_outgoing(&self, props: &ResourceProperties, value: Value) -> Result<Value, TransformError>;
}

/// Scale/offset/base transforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransforms;

impl DefaultTransforms {
    fn has_numeric_transform(props: &ResourceProperties) -> bool {
        props.scale.is_some() || props.offset.is_some() || props.base.is_some()
    }
}

impl TransformEngine for DefaultTransforms {
    fn validate_range(&self, props: &ResourceProperties, value: &Value) -> bool {
        let Some(v) = value.as_f64() else {
            return true;
        };
        props.minimum.is_none_or(|min| v >= min) && props.maximum.is_none_or(|max| v <= max)
    }

    fn apply_incoming(&self, props: &ResourceProperties, value: Value) -> Result<Value, TransformError> {
        if !Self::has_numeric_transform(props) {
            return Ok(value);
        }
        let Some(mut v) = value.as_f64() else {
            return Ok(value);
        };
        if let Some(offset) = props.offset {
            v -= offset;
        }
        if let Some(scale) = props.scale.filter(|s| *s != 0.0) {
            v /= scale;
        }
        if let Some(base) = props.base {
            v = v.log(base);
        }
        from_f64(&value.value_type(), v)
    }

    fn apply_outgoing(&self, props: &ResourceProperties, value: Value) -> Result<Value, TransformError> {
        if !Self::has_numeric_transform(props) {
            return Ok(value);
        }
        let Some(mut v) = value.as_f64() else {
            return Ok(value);
        };
        if let Some(base) = props.base {
            v = base.powf(v);
        }
        if let Some(scale) = props.scale {
            v *= scale;
        }
        if let Some(offset) = props.offset {
            v += offset;
        }
        from_f64(&value.value_type(), v)
    }
}

/// Rebuild a value of type `ty` from a transformed number. Integer results
/// are truncated toward zero.
fn from_f64(ty: &ValueType, v: f64) -> Result<Value, TransformError> {
    let overflow = || TransformError::Overflow {
        value: v,
        value_type: ty.clone(),
    };
    if !v.is_finite() {
        return Err(overflow());
    }

    macro_rules! int {
        ($variant:ident, $t:ty) => {{
            let t = v.trunc();
            // MAX + 1 is a power of two, so it is exact even for 64-bit types.
            if t < <$t>::MIN as f64 || t >= <$t>::MAX as f64 + 1.0 {
                return Err(overflow());
            }
            Value::$variant(t as $t)
        }};
    }

    Ok(match ty {
        ValueType::Uint8 => int!(Uint8, u8),
        ValueType::Uint16 => int!(Uint16, u16),
        ValueType::Uint32 => int!(Uint32, u32),
        ValueType::Uint64 => int!(Uint64, u64),
        ValueType::Int8 => int!(Int8, i8),
        ValueType::Int16 => int!(Int16, i16),
        ValueType::Int32 => int!(Int32, i32),
        ValueType::Int64 => int!(Int64, i64),
        ValueType::Float32 => {
            if v.abs() > f32::MAX as f64 {
                return Err(overflow());
            }
            Value::Float32(v as f32)
        }
        ValueType::Float64 => Value::Float64(v),
        _ => return Err(overflow()),
    })
}

/// Substitute a reading through the resource's mappings. A mapped value
/// becomes a string reading.
pub fn map_reading(mappings: &HashMap<String, String>, value: Value) -> Value {
    if mappings.is_empty() {
        return value;
    }
    match mappings.get(&codec::encode(&value)) {
        Some(mapped) => Value::String(mapped.clone()),
        None => value,
    }
}

/// Translate a presented parameter back to its raw form before decoding.
pub fn unmap_parameter<'a>(mappings: &HashMap<String, String>, raw: &'a str) -> Cow<'a, str> {
    mappings
        .iter()
        .find(|(_, presented)| presented.as_str() == raw)
        .map(|(raw, _)| Cow::Owned(raw.clone()))
        .unwrap_or(Cow::Borrowed(raw))
}
