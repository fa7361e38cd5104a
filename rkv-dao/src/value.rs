//! # Record Values and Operation Options
//!
//! Purpose: Give writes a closed `Scalar | Document` value type, decided once
//! at the API boundary, and give every operation one options object carrying
//! its read/write/delete modifiers.
//!
//! ## Wire Forms
//!
//! ```text
//! Value::Scalar  ──marshal──▶ Wire::Plain(string)   SET / SETNX / HSET / HSETNX
//! Value::Document ─(flat)───▶ Wire::Fields(pairs)   HMSET id f1 v1 f2 v2 ...
//! Value::Document ─(grouped)▶ Wire::Plain(json)     HSET / HSETNX group id json
//! any value ──Marshal::Json─▶ Wire::Plain(json)
//! ```

use std::collections::HashMap;

use serde_json::{Map, Value as Json};

use crate::error::{DaoError, DaoResult, DecodeError};

/// Value written by `update` and `update_batch`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string, number, boolean, null or array.
    Scalar(Json),
    /// A map of named fields.
    Document(Map<String, Json>),
}

impl Value {
    /// Tags a JSON value by shape: objects become documents, everything else
    /// is a scalar.
    pub fn from_json(value: Json) -> Self {
        match value {
            Json::Object(map) => Value::Document(map),
            other => Value::Scalar(other),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Scalar(value) => value.clone(),
            Value::Document(map) => Json::Object(map.clone()),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }
}

impl From<Json> for Value {
    fn from(value: Json) -> Self {
        Value::from_json(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(Json::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Scalar(Json::String(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(Json::from(value))
    }
}

impl From<Map<String, Json>> for Value {
    fn from(value: Map<String, Json>) -> Self {
        Value::Document(value)
    }
}

/// How a write turns its value into wire strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Marshal {
    /// Encode to a string only when the value is not one already.
    Lazy,
    /// Write strings, numbers and booleans as-is; refuse anything else where
    /// a single string is required.
    #[default]
    Native,
    /// JSON-encode the whole value, whatever its shape.
    Json,
}

impl Marshal {
    /// Maps the integer convention: negative is lazy, zero native,
    /// positive JSON.
    pub fn from_mode(mode: i32) -> Self {
        match mode {
            m if m < 0 => Marshal::Lazy,
            0 => Marshal::Native,
            _ => Marshal::Json,
        }
    }
}

/// How a read interprets what it fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unmarshal {
    /// Native shape: all hash fields for flat ids, the field text for
    /// grouped ids.
    #[default]
    Raw,
    /// The plain string stored under the id or field.
    Text,
    /// The stored string decoded as a JSON object.
    Json,
}

/// Modifiers shared by read, write and delete operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub unmarshal: Unmarshal,
    pub marshal: Marshal,
    /// Overwrite existing keys/fields; `false` uses the set-if-absent
    /// primitives.
    pub override_existing: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            unmarshal: Unmarshal::Raw,
            marshal: Marshal::Native,
            override_existing: true,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unmarshal(mut self, unmarshal: Unmarshal) -> Self {
        self.unmarshal = unmarshal;
        self
    }

    pub fn marshal(mut self, marshal: Marshal) -> Self {
        self.marshal = marshal;
        self
    }

    pub fn override_existing(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

/// Value returned by `get` and `gets`.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Text(String),
    Fields(HashMap<String, String>),
    Document(Map<String, Json>),
}

impl Record {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Record::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Map<String, Json>> {
        match self {
            Record::Document(map) => Some(map),
            _ => None,
        }
    }
}

/// Marshalled form of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Wire {
    Plain(String),
    Fields(Vec<(String, String)>),
}

/// Marshals `value` for a flat (`grouped == false`) or grouped write.
pub(crate) fn to_wire(value: &Value, marshal: Marshal, grouped: bool) -> DaoResult<Wire> {
    if marshal == Marshal::Json {
        let encoded = serde_json::to_string(&value.to_json()).map_err(DecodeError::from)?;
        return Ok(Wire::Plain(encoded));
    }
    match value {
        Value::Scalar(scalar) => scalar_string(scalar, marshal).map(Wire::Plain),
        Value::Document(map) if grouped => match marshal {
            Marshal::Lazy => Ok(Wire::Plain(Json::Object(map.clone()).to_string())),
            _ => Err(DaoError::Precondition(
                "grouped document writes need a lazy or json marshal mode".into(),
            )),
        },
        Value::Document(map) => {
            if map.is_empty() {
                return Err(DaoError::Precondition(
                    "cannot flatten an empty document".into(),
                ));
            }
            Ok(Wire::Fields(
                map.iter()
                    .map(|(field, value)| (field.clone(), lazy_string(value)))
                    .collect(),
            ))
        }
    }
}

fn scalar_string(value: &Json, marshal: Marshal) -> DaoResult<String> {
    match value {
        Json::Array(_) | Json::Object(_) if marshal == Marshal::Native => Err(
            DaoError::Precondition("structured scalar needs a lazy or json marshal mode".into()),
        ),
        other => Ok(lazy_string(other)),
    }
}

/// Wire string of one value: strings untouched, null empty, everything
/// else in its JSON text form.
pub(crate) fn lazy_string(value: &Json) -> String {
    match value {
        Json::String(text) => text.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

/// Interprets a fetched string under `unmarshal`.
pub(crate) fn text_record(text: String, unmarshal: Unmarshal) -> DaoResult<Record> {
    match unmarshal {
        Unmarshal::Json => {
            let map: Map<String, Json> = serde_json::from_str(&text).map_err(DecodeError::from)?;
            Ok(Record::Document(map))
        }
        _ => Ok(Record::Text(text)),
    }
}
