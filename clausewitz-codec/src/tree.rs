//! The decoded object graph.
//!
//! While a node is being filled it is a plain vector of entries, some of
//! them named by an assignment, the rest positional. Closing the node runs
//! the fixups (duplicate-key collation, empty-child removal) and commits it
//! to one of two shapes: an insertion-ordered object when at least one entry
//! is named, a positional array otherwise.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A finalized value: a scalar, an ordered object or a positional list.
/// Dates are carried as their `"Y.M.D"` rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// First child under `key`, for object values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Scalar rendering used when this value becomes the key of an
    /// assignment. Containers cannot name anything.
    pub fn to_key(&self) -> Option<String> {
        match self {
            Value::String(v) => Some(v.clone()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Bool(v) => Some(v.to_string()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Array(items) => items.is_empty(),
            Value::Object(entries) => entries.is_empty(),
            _ => false,
        }
    }
}

/// A node in the middle of assembly.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    entries: Vec<(Option<String>, Value)>,
    seen: HashMap<String, usize>,
    duplicates: Vec<String>,
    name: Option<String>,
    dropped: bool,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose finalized value will be assigned under `name` in the
    /// parent once closed.
    pub fn named(name: String) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    /// Marks the node as filtered out; it will be discarded instead of
    /// attached when it closes.
    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a positional entry.
    pub fn append(&mut self, value: Value) {
        self.entries.push((None, value));
    }

    /// Appends a named entry, recording key collisions for the close-time
    /// collation.
    pub fn append_named(&mut self, name: String, value: Value) {
        let count = self.seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            self.duplicates.push(name.clone());
        }

        self.entries.push((Some(name), value));
    }

    /// The most recently appended value, named or positional.
    pub fn last(&self) -> Option<&Value> {
        self.entries.last().map(|(_, value)| value)
    }

    pub fn pop_entry(&mut self) -> Option<(Option<String>, Value)> {
        self.entries.pop()
    }

    /// Runs the close fixups and commits the node to its final shape.
    ///
    /// Keys assigned more than once collapse into a synthetic plural child
    /// (`advisor` → `advisors`, growing a further `s` while the plural
    /// collides with a sibling) holding every occurrence in source order; a
    /// key left with a single occurrence keeps its plain name. Children that
    /// closed empty are removed.
    pub fn finalize(mut self) -> Value {
        for key in std::mem::take(&mut self.duplicates) {
            let occurrences = self
                .entries
                .iter()
                .filter(|(name, _)| name.as_deref() == Some(key.as_str()))
                .count();
            if occurrences < 2 {
                continue;
            }

            let entries = std::mem::take(&mut self.entries);
            let mut members = Vec::with_capacity(occurrences);
            let mut kept = Vec::with_capacity(entries.len() - occurrences + 1);
            for (name, value) in entries {
                if name.as_deref() == Some(key.as_str()) {
                    members.push(value);
                } else {
                    kept.push((name, value));
                }
            }
            self.entries = kept;

            let mut group_key = format!("{key}s");
            while self
                .entries
                .iter()
                .any(|(name, _)| name.as_deref() == Some(group_key.as_str()))
            {
                group_key.push('s');
            }

            self.entries.push((Some(group_key), Value::Array(members)));
        }

        self.entries
            .retain(|(_, value)| !value.is_empty_container());

        let contains_kw = self.entries.iter().any(|(name, _)| name.is_some());
        if contains_kw {
            Value::Object(
                self.entries
                    .into_iter()
                    .filter_map(|(name, value)| Some((name?, value)))
                    .collect(),
            )
        } else {
            Value::Array(self.entries.into_iter().map(|(_, value)| value).collect())
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decoded save-game value")
    }

    fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v)
            .map(Value::Int)
            .unwrap_or(Value::Float(v as f64)))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = Vec::new();
        while let Some(entry) = map.next_entry()? {
            entries.push(entry);
        }
        Ok(Value::Object(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
