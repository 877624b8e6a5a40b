//! Typed values exchanged between the runtime and protocol drivers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Declared type of a device resource.
///
/// The string form follows the profile notation: `Int32`, `Float64`,
/// `Binary`, `Object`, and `<Scalar>Array` for arrays (e.g. `Uint16Array`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    Bool,
    String,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Binary,
    Object,
    /// Homogeneous array of a scalar element type
    Array(Box<ValueType>),
}

impl ValueType {
    /// Array of the given element type.
    pub fn array_of(element: ValueType) -> Self {
        Self::Array(Box::new(element))
    }

    /// Scalar types may appear as array elements.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Binary | Self::Object | Self::Array(_))
    }

    /// Integer types support bit masks.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "Bool"),
            Self::String => write!(f, "String"),
            Self::Uint8 => write!(f, "Uint8"),
            Self::Uint16 => write!(f, "Uint16"),
            Self::Uint32 => write!(f, "Uint32"),
            Self::Uint64 => write!(f, "Uint64"),
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float32 => write!(f, "Float32"),
            Self::Float64 => write!(f, "Float64"),
            Self::Binary => write!(f, "Binary"),
            Self::Object => write!(f, "Object"),
            Self::Array(element) => write!(f, "{}Array", element),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(element) = s.strip_suffix("Array") {
            let element: ValueType = element.parse()?;
            if !element.is_scalar() {
                return Err(format!("Unsupported array element type: {}", element));
            }
            return Ok(Self::array_of(element));
        }
        match s {
            "Bool" => Ok(Self::Bool),
            "String" => Ok(Self::String),
            "Uint8" => Ok(Self::Uint8),
            "Uint16" => Ok(Self::Uint16),
            "Uint32" => Ok(Self::Uint32),
            "Uint64" => Ok(Self::Uint64),
            "Int8" => Ok(Self::Int8),
            "Int16" => Ok(Self::Int16),
            "Int32" => Ok(Self::Int32),
            "Int64" => Ok(Self::Int64),
            "Float32" => Ok(Self::Float32),
            "Float64" => Ok(Self::Float64),
            "Binary" => Ok(Self::Binary),
            "Object" => Ok(Self::Object),
            other => Err(format!("Unknown value type: {}", other)),
        }
    }
}

impl TryFrom<String> for ValueType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ValueType> for String {
    fn from(t: ValueType) -> Self {
        t.to_string()
    }
}

/// A typed value read from or written to a device resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    String(String),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Binary(Vec<u8>),
    Object(serde_json::Map<String, serde_json::Value>),
    /// Element type plus items
    Array(ValueType, Vec<Value>),
}

impl Value {
    /// Type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::String(_) => ValueType::String,
            Self::Uint8(_) => ValueType::Uint8,
            Self::Uint16(_) => ValueType::Uint16,
            Self::Uint32(_) => ValueType::Uint32,
            Self::Uint64(_) => ValueType::Uint64,
            Self::Int8(_) => ValueType::Int8,
            Self::Int16(_) => ValueType::Int16,
            Self::Int32(_) => ValueType::Int32,
            Self::Int64(_) => ValueType::Int64,
            Self::Float32(_) => ValueType::Float32,
            Self::Float64(_) => ValueType::Float64,
            Self::Binary(_) => ValueType::Binary,
            Self::Object(_) => ValueType::Object,
            Self::Array(element, _) => ValueType::array_of(element.clone()),
        }
    }

    /// Numeric view of scalar numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Uint8(v) => Some(*v as f64),
            Self::Uint16(v) => Some(*v as f64),
            Self::Uint32(v) => Some(*v as f64),
            Self::Uint64(v) => Some(*v as f64),
            Self::Int8(v) => Some(*v as f64),
            Self::Int16(v) => Some(*v as f64),
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Float32(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw bit pattern of an integer value (signed values sign-extended).
    pub fn to_bits(&self) -> Option<u64> {
        match self {
            Self::Uint8(v) => Some(*v as u64),
            Self::Uint16(v) => Some(*v as u64),
            Self::Uint32(v) => Some(*v as u64),
            Self::Uint64(v) => Some(*v),
            Self::Int8(v) => Some(*v as i64 as u64),
            Self::Int16(v) => Some(*v as i64 as u64),
            Self::Int32(v) => Some(*v as i64 as u64),
            Self::Int64(v) => Some(*v as u64),
            _ => None,
        }
    }

    /// Rebuild an integer value of type `ty` from a bit pattern, truncating
    /// to the type's width.
    pub fn from_bits(ty: &ValueType, bits: u64) -> Option<Self> {
        Some(match ty {
            ValueType::Uint8 => Self::Uint8(bits as u8),
            ValueType::Uint16 => Self::Uint16(bits as u16),
            ValueType::Uint32 => Self::Uint32(bits as u32),
            ValueType::Uint64 => Self::Uint64(bits),
            ValueType::Int8 => Self::Int8(bits as i8),
            ValueType::Int16 => Self::Int16(bits as i16),
            ValueType::Int32 => Self::Int32(bits as i32),
            ValueType::Int64 => Self::Int64(bits as i64),
            _ => return None,
        })
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// One value returned by a driver for one resource request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub value: Value,
    /// Origin timestamp in nanoseconds; the runtime stamps it when absent
    pub origin: Option<i64>,
    /// Driver-supplied tags attached to the reading
    pub tags: HashMap<String, String>,
}

impl CommandResult {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            origin: None,
            tags: HashMap::new(),
        }
    }

    pub fn with_origin(mut self, origin: i64) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Order-sensitive typed comparison of two result sets, ignoring origins
/// and tags.
pub fn same_values(a: &[CommandResult], b: &[CommandResult]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.value == y.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_parse_and_display() {
        assert_eq!("Int32".parse::<ValueType>().unwrap(), ValueType::Int32);
        assert_eq!(
            "Uint16Array".parse::<ValueType>().unwrap(),
            ValueType::array_of(ValueType::Uint16)
        );
        assert_eq!(ValueType::array_of(ValueType::Float32).to_string(), "Float32Array");
        assert!("BinaryArray".parse::<ValueType>().is_err());
        assert!("Int128".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_type_serde() {
        let t: ValueType = serde_json::from_str("\"BoolArray\"").unwrap();
        assert_eq!(t, ValueType::array_of(ValueType::Bool));
        assert_eq!(serde_json::to_string(&ValueType::Int8).unwrap(), "\"Int8\"");
    }

    #[test]
    fn test_bits_round_trip() {
        let v = Value::Int16(-2);
        let bits = v.to_bits().unwrap();
        assert_eq!(Value::from_bits(&ValueType::Int16, bits), Some(Value::Int16(-2)));
        assert_eq!(
            Value::from_bits(&ValueType::Uint8, 0x1ff),
            Some(Value::Uint8(0xff))
        );
        assert_eq!(Value::Float32(1.0).to_bits(), None);
    }

    #[test]
    fn test_same_values_ignores_origin() {
        let a = vec![CommandResult::new(72).with_origin(1)];
        let b = vec![CommandResult::new(72).with_origin(2)];
        let c = vec![CommandResult::new(Value::Int64(72))];
        assert!(same_values(&a, &b));
        assert!(!same_values(&a, &c));
        assert!(!same_values(&a, &[]));
    }
}
