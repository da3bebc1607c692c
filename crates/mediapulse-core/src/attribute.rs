//! Typed event attributes
//!
//! Attribute values are a closed union over the wire-serializable kinds.
//! Callers pick the constructor matching the intended wire type; there is
//! no implicit coercion between kinds.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// A single attribute value as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Raw byte payload (serialized as a number array)
    Bytes(Vec<u8>),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        AttributeValue::Bytes(v)
    }
}

/// An attribute bound to an action filter
struct FilteredAttribute {
    key: String,
    value: AttributeValue,
    filter: Regex,
}

/// Tracker-level attribute store
///
/// Holds attributes that apply to every event plus attributes scoped to
/// actions matching a filter pattern. `generate` merges them for one action,
/// with per-call values winning ties over filtered values, and filtered
/// values winning over general ones.
#[derive(Default)]
pub struct EventAttributes {
    general: HashMap<String, AttributeValue>,
    filtered: Vec<FilteredAttribute>,
}

impl EventAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, optionally scoped to actions matching `filter`.
    ///
    /// An invalid filter pattern drops the attribute (logged), it never
    /// propagates to the caller.
    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue, filter: Option<&str>) {
        let key = key.into();
        match filter {
            None => {
                self.general.insert(key, value);
            }
            Some(pattern) => match Regex::new(pattern) {
                Ok(filter) => {
                    // Last set wins for the same key + pattern
                    self.filtered
                        .retain(|f| !(f.key == key && f.filter.as_str() == pattern));
                    self.filtered.push(FilteredAttribute { key, value, filter });
                }
                Err(e) => {
                    warn!(key = %key, pattern = %pattern, error = %e, "Invalid attribute filter, dropped");
                }
            },
        }
    }

    /// Set the user identifier attribute for all events
    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.general
            .insert("userId".to_string(), AttributeValue::String(user_id.into()));
    }

    /// Build the attribute map for `action`, appending per-call attributes
    pub fn generate(
        &self,
        action: &str,
        append: Option<&HashMap<String, AttributeValue>>,
    ) -> HashMap<String, AttributeValue> {
        let mut out = self.general.clone();
        for f in &self.filtered {
            if f.filter.is_match(action) {
                out.insert(f.key.clone(), f.value.clone());
            }
        }
        if let Some(extra) = append {
            for (k, v) in extra {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}
