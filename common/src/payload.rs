use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schemaless packet payload tree.
///
/// Payloads arrive from the protocol layer as arbitrary nested values. Byte
/// blobs are first-class and must survive a container round-trip unchanged.
/// Map iteration order is not semantically significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Payload>),
    Map(HashMap<String, Payload>),
}

impl Payload {
    /// Build a map payload from `(key, value)` entries.
    pub fn map<K, I>(entries: I) -> Payload
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Map(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Payload::List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Int(value)
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Payload::Int(value as i64)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Str(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Str(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}
