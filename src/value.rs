//! Decoded payload tree used by the sanitizer.
//!
//! Request bodies, response bodies, and header sets are decoded into a
//! [`StructuredValue`] before redaction and re-encoded to JSON for the
//! exchange record.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::ser::{Serialize, Serializer};
use serde_json::{Number, Value};

/// A leaf of the payload tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// A decoded structured payload.
///
/// Key order inside a mapping carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Mapping(BTreeMap<String, StructuredValue>),
    Sequence(Vec<StructuredValue>),
    Scalar(Scalar),
}

impl StructuredValue {
    /// Decode a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input. Callers in the
    /// logging path treat this as "nothing to log", never as a client error.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Value>(bytes).map(Self::from)
    }

    /// Decode a header set into `name -> [values...]`.
    ///
    /// Values that are not valid UTF-8 are skipped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut map = BTreeMap::new();
        for name in headers.keys() {
            let values = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(StructuredValue::string)
                .collect();
            map.insert(name.as_str().to_string(), StructuredValue::Sequence(values));
        }
        StructuredValue::Mapping(map)
    }

    /// Shorthand for a string scalar.
    pub fn string(s: impl Into<String>) -> Self {
        StructuredValue::Scalar(Scalar::String(s.into()))
    }

    /// Top-level string field of a mapping, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self {
            StructuredValue::Mapping(map) => match map.get(key) {
                Some(StructuredValue::Scalar(Scalar::String(s))) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, StructuredValue>> {
        match self {
            StructuredValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl From<Value> for StructuredValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StructuredValue::Scalar(Scalar::Null),
            Value::Bool(b) => StructuredValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => StructuredValue::Scalar(Scalar::Number(n)),
            Value::String(s) => StructuredValue::Scalar(Scalar::String(s)),
            Value::Array(items) => {
                StructuredValue::Sequence(items.into_iter().map(StructuredValue::from).collect())
            }
            Value::Object(map) => StructuredValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, StructuredValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<StructuredValue> for Value {
    fn from(value: StructuredValue) -> Self {
        match value {
            StructuredValue::Scalar(Scalar::Null) => Value::Null,
            StructuredValue::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            StructuredValue::Scalar(Scalar::Number(n)) => Value::Number(n),
            StructuredValue::Scalar(Scalar::String(s)) => Value::String(s),
            StructuredValue::Sequence(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            StructuredValue::Mapping(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for StructuredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StructuredValue::Mapping(map) => serializer.collect_map(map),
            StructuredValue::Sequence(items) => serializer.collect_seq(items),
            StructuredValue::Scalar(scalar) => scalar.serialize(serializer),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Number(n) => n.serialize(serializer),
            Scalar::String(s) => serializer.serialize_str(s),
        }
    }
}
