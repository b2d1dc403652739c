use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::FingerprintError;
use crate::hash::{Fingerprint, FingerprintHasher};

mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INTEGER: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STRING: u8 = 4;
    pub const BYTES: u8 = 5;
    pub const LIST: u8 = 6;
    pub const SET: u8 = 7;
    pub const MAP: u8 = 8;
    pub const FINGERPRINT: u8 = 9;
    pub const OPAQUE: u8 = 10;
}

/// A structured input value the engine knows how to fingerprint.
///
/// Collections come in two flavours: [`Value::List`] is order-sensitive,
/// [`Value::Set`] and [`Value::Map`] are not. Nesting is arbitrary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A value which was already fingerprinted elsewhere.
    Fingerprint(Fingerprint),
    /// A value the engine cannot look into. It still gets a fingerprint, derived
    /// from the type name, but that fingerprint is not trusted: a unit with an
    /// opaque input is never up-to-date and never cached.
    Opaque { type_name: String },
}

/// Fingerprint of a single [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueFingerprint {
    pub hash: Fingerprint,
    pub deterministic: bool,
}

impl Value {
    /// Converts any serializable value through its JSON data model.
    pub fn serialized<T>(value: &T) -> Result<Self, FingerprintError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value)
            .map(Value::from)
            .map_err(|e| FingerprintError::UnsupportedValue(e.to_string()))
    }

    pub fn opaque<T: ?Sized>() -> Self {
        Value::Opaque {
            type_name: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn fingerprint(&self) -> Result<ValueFingerprint, FingerprintError> {
        let mut hasher = FingerprintHasher::new();
        let deterministic = self.write(&mut hasher)?;

        Ok(ValueFingerprint {
            hash: hasher.finish(),
            deterministic,
        })
    }

    /// Feeds the canonical encoding of this value into `hasher`, returning
    /// whether the encoding is deterministic.
    fn write(&self, hasher: &mut FingerprintHasher) -> Result<bool, FingerprintError> {
        match self {
            Value::Null => {
                hasher.put_tag(tag::NULL);
            }
            Value::Bool(value) => {
                hasher.put_tag(tag::BOOL).put_tag(*value as u8);
            }
            Value::Integer(value) => {
                hasher.put_tag(tag::INTEGER).put_u64(*value as u64);
            }
            Value::Float(value) => {
                if value.is_nan() {
                    return Err(FingerprintError::UnsupportedValue(
                        "NaN has no canonical representation".into(),
                    ));
                }
                // -0.0 and 0.0 compare equal, so they must fingerprint equal
                let value = if *value == 0.0 { 0.0 } else { *value };
                hasher.put_tag(tag::FLOAT).put_u64(value.to_bits());
            }
            Value::String(value) => {
                hasher.put_tag(tag::STRING).put_str(value);
            }
            Value::Bytes(value) => {
                hasher.put_tag(tag::BYTES).put_bytes(value);
            }
            Value::List(items) => {
                hasher.put_tag(tag::LIST).put_u64(items.len() as u64);
                let mut deterministic = true;
                for item in items {
                    deterministic &= item.write(hasher)?;
                }
                return Ok(deterministic);
            }
            Value::Set(items) => {
                // Each element is reduced to its own fingerprint first, the
                // sorted fingerprints then stand in for the unordered set.
                let mut deterministic = true;
                let mut hashes = Vec::with_capacity(items.len());
                for item in items {
                    let item = item.fingerprint()?;
                    deterministic &= item.deterministic;
                    hashes.push(item.hash);
                }
                hashes.sort_unstable();
                hashes.dedup();

                hasher.put_tag(tag::SET).put_u64(hashes.len() as u64);
                for hash in &hashes {
                    hasher.put_fingerprint(hash);
                }
                return Ok(deterministic);
            }
            Value::Map(entries) => {
                hasher.put_tag(tag::MAP).put_u64(entries.len() as u64);
                let mut deterministic = true;
                for (key, value) in entries {
                    hasher.put_str(key);
                    deterministic &= value.write(hasher)?;
                }
                return Ok(deterministic);
            }
            Value::Fingerprint(value) => {
                hasher.put_tag(tag::FINGERPRINT).put_fingerprint(value);
            }
            Value::Opaque { type_name } => {
                hasher.put_tag(tag::OPAQUE).put_str(type_name);
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Integer(value),
                // u64 above i64::MAX keeps its exact decimal form
                None if number.is_u64() => Value::String(number.to_string()),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(value) => Value::String(value),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Fingerprint> for Value {
    fn from(value: Fingerprint) -> Self {
        Value::Fingerprint(value)
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(value: Value) -> Fingerprint {
        value.fingerprint().unwrap().hash
    }

    #[test]
    fn test_list_is_order_sensitive() {
        assert_ne!(
            hash(Value::from(vec!["a", "b"])),
            hash(Value::from(vec!["b", "a"]))
        );
    }

    #[test]
    fn test_set_is_order_insensitive() {
        let a = Value::Set(vec!["a".into(), Value::Integer(1), Value::Null]);
        let b = Value::Set(vec![Value::Null, Value::Integer(1), "a".into()]);
        assert_eq!(hash(a), hash(b));
    }

    #[test]
    fn test_nested_map_insertion_order_irrelevant() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"x": {"b": [1, 2], "a": true}, "y": null}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"y": null, "x": {"a": true, "b": [1, 2]}}"#).unwrap();
        assert_eq!(hash(Value::from(a)), hash(Value::from(b)));
    }

    #[test]
    fn test_types_do_not_collide() {
        assert_ne!(hash(Value::from("1")), hash(Value::Integer(1)));
        assert_ne!(hash(Value::Bytes(b"a".to_vec())), hash(Value::from("a")));
        assert_ne!(
            hash(Value::List(vec![])),
            hash(Value::Set(vec![]))
        );
    }

    #[test]
    fn test_signed_zero_is_normalized() {
        assert_eq!(hash(Value::Float(0.0)), hash(Value::Float(-0.0)));
    }

    #[test]
    fn test_nan_is_unsupported() {
        let err = Value::Float(f64::NAN).fingerprint().unwrap_err();
        assert!(matches!(err, FingerprintError::UnsupportedValue(_)));
    }

    #[test]
    fn test_opaque_is_not_deterministic() {
        let value = Value::List(vec![Value::Integer(1), Value::opaque::<std::fs::File>()]);
        let fp = value.fingerprint().unwrap();
        assert!(!fp.deterministic);

        let plain = Value::List(vec![Value::Integer(1)]).fingerprint().unwrap();
        assert!(plain.deterministic);
    }

    #[test]
    fn test_serialized_struct() {
        #[derive(Serialize)]
        struct Options {
            level: u8,
            flags: Vec<&'static str>,
        }

        let a = Value::serialized(&Options { level: 2, flags: vec!["x"] }).unwrap();
        let b = Value::serialized(&Options { level: 2, flags: vec!["x"] }).unwrap();
        let c = Value::serialized(&Options { level: 3, flags: vec!["x"] }).unwrap();
        assert_eq!(hash(a.clone()), hash(b));
        assert_ne!(hash(a), hash(c));
    }
}
