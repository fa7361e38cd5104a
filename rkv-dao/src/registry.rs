//! # Reply Decoder Registry
//!
//! Purpose: Turn untyped RESP replies into typed `Reply` values. The wire
//! reply carries no type, so the rule is chosen by the name of the command
//! that produced it.
//!
//! ## Design Principles
//! 1. **Table Dispatch**: One `HashMap` from upper-cased command name to a
//!    plain `fn` rule; the lookup is the only dynamically typed seam.
//! 2. **Build Once**: `ReplyRegistry::shared` initializes the standard table
//!    under a `OnceLock`; the table is never mutated afterwards.
//! 3. **Injectable**: The access layer holds an `Arc<ReplyRegistry>`, so tests
//!    can hand it a custom table.
//! 4. **Nil Is Absence**: A nil reply is reported as `DecodeError::NotFound`
//!    for every command before any rule runs.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use rkv_client::{ClientResult, RespValue};

use crate::error::{DaoResult, DecodeError};

/// Typed result of decoding one wire reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Strings(Vec<String>),
    Map(HashMap<String, String>),
    /// One page of a cursor-based scan.
    Scan { cursor: u64, items: Vec<String> },
}

impl Reply {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(value) => Some(*value),
            Reply::Bool(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(value) => Some(*value),
            Reply::Int(value) => Some(*value != 0),
            _ => None,
        }
    }
}

/// Decode rule: converts a non-nil reply or names the shape it expected.
pub type DecodeRule = fn(RespValue) -> Result<Reply, &'static str>;

/// Command name → decode rule table.
#[derive(Debug, Clone)]
pub struct ReplyRegistry {
    rules: HashMap<&'static str, DecodeRule>,
}

const STANDARD_RULES: &[(&str, DecodeRule)] = &[
    // keys
    ("DEL", decode_int),
    ("DUMP", decode_bytes),
    ("RESTORE", decode_string),
    ("EXISTS", decode_int),
    ("EXPIRE", decode_bool),
    ("EXPIREAT", decode_bool),
    ("PEXPIRE", decode_bool),
    ("PEXPIREAT", decode_bool),
    ("PERSIST", decode_bool),
    ("TTL", decode_int),
    ("PTTL", decode_int),
    ("KEYS", decode_strings),
    ("RENAME", decode_string),
    ("SORT", decode_strings),
    // strings
    ("GET", decode_string),
    ("SET", decode_string),
    ("SETNX", decode_bool),
    ("STRLEN", decode_int),
    ("INCR", decode_int),
    ("INCRBY", decode_int),
    ("INCRBYFLOAT", decode_float),
    // hashes
    ("HDEL", decode_int),
    ("HSET", decode_int),
    ("HSETNX", decode_bool),
    ("HGET", decode_string),
    ("HKEYS", decode_strings),
    ("HVALS", decode_strings),
    ("HMSET", decode_string),
    ("HMGET", decode_strings),
    ("HEXISTS", decode_bool),
    ("HGETALL", decode_string_map),
    ("HLEN", decode_int),
    // lists
    ("LPUSH", decode_int),
    ("LPOP", decode_string),
    ("LLEN", decode_int),
    ("LSET", decode_string),
    ("LRANGE", decode_strings),
    // sets and sorted sets
    ("SADD", decode_int),
    ("SREM", decode_int),
    ("ZADD", decode_int),
    ("ZREM", decode_int),
    ("ZRANGE", decode_strings),
    // cursors
    ("SCAN", decode_scan),
    ("HSCAN", decode_scan),
    ("SSCAN", decode_scan),
    ("ZSCAN", decode_scan),
    // connection and scripting
    ("SELECT", decode_string),
    ("PING", decode_string),
    ("AUTH", decode_string),
    ("EVAL", decode_script),
    ("EVALSHA", decode_script),
];

impl ReplyRegistry {
    /// Process-wide standard table, built on first use.
    pub fn shared() -> Arc<ReplyRegistry> {
        static REGISTRY: OnceLock<Arc<ReplyRegistry>> = OnceLock::new();
        REGISTRY
            .get_or_init(|| Arc::new(ReplyRegistry::standard()))
            .clone()
    }

    /// Builds the standard table.
    pub fn standard() -> Self {
        let mut registry = ReplyRegistry::empty();
        for (name, rule) in STANDARD_RULES {
            registry.rules.insert(*name, *rule);
        }
        registry
    }

    /// Builds a table with no rules.
    pub fn empty() -> Self {
        ReplyRegistry {
            rules: HashMap::new(),
        }
    }

    /// Adds or replaces a rule. `name` must be upper-case.
    pub fn with_rule(mut self, name: &'static str, rule: DecodeRule) -> Self {
        self.rules.insert(name, rule);
        self
    }

    /// Returns true when `command` has a rule.
    pub fn supports(&self, command: &str) -> bool {
        self.rule(command).is_some()
    }

    /// Decodes the reply `command` produced.
    ///
    /// A transport error from the round trip is returned unchanged and no
    /// rule runs.
    pub fn decode(&self, command: &str, raw: ClientResult<RespValue>) -> DaoResult<Reply> {
        let raw = raw?;
        let rule = self
            .rule(command)
            .ok_or_else(|| DecodeError::UnsupportedCommand(command.to_ascii_uppercase()))?;
        if raw.is_nil() {
            return Err(DecodeError::NotFound.into());
        }
        rule(raw).map_err(|expected| {
            DecodeError::UnexpectedReply {
                command: command.to_ascii_uppercase(),
                expected,
            }
            .into()
        })
    }

    fn rule(&self, command: &str) -> Option<DecodeRule> {
        match self.rules.get(command) {
            Some(rule) => Some(*rule),
            None => self.rules.get(command.to_ascii_uppercase().as_str()).copied(),
        }
    }
}

impl Default for ReplyRegistry {
    fn default() -> Self {
        ReplyRegistry::standard()
    }
}

fn bulk_text(value: RespValue) -> Option<String> {
    match value {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => {
            Some(String::from_utf8_lossy(&data).into_owned())
        }
        _ => None,
    }
}

fn decode_string(value: RespValue) -> Result<Reply, &'static str> {
    bulk_text(value).map(Reply::Str).ok_or("string")
}

/// Script results: text as-is, integers in decimal form.
fn decode_script(value: RespValue) -> Result<Reply, &'static str> {
    match value {
        RespValue::Integer(n) => Ok(Reply::Str(n.to_string())),
        other => bulk_text(other).map(Reply::Str).ok_or("string or integer"),
    }
}

fn decode_bytes(value: RespValue) -> Result<Reply, &'static str> {
    match value {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => Ok(Reply::Bytes(data)),
        _ => Err("bytes"),
    }
}

fn decode_int(value: RespValue) -> Result<Reply, &'static str> {
    match value {
        RespValue::Integer(n) => Ok(Reply::Int(n)),
        other => bulk_text(other)
            .and_then(|text| text.parse().ok())
            .map(Reply::Int)
            .ok_or("integer"),
    }
}

fn decode_float(value: RespValue) -> Result<Reply, &'static str> {
    match value {
        RespValue::Integer(n) => Ok(Reply::Float(n as f64)),
        other => bulk_text(other)
            .and_then(|text| text.parse().ok())
            .map(Reply::Float)
            .ok_or("float"),
    }
}

fn decode_bool(value: RespValue) -> Result<Reply, &'static str> {
    match value {
        RespValue::Integer(n) => Ok(Reply::Bool(n != 0)),
        other => match bulk_text(other).as_deref() {
            Some("1" | "t" | "T" | "true" | "TRUE" | "True") => Ok(Reply::Bool(true)),
            Some("0" | "f" | "F" | "false" | "FALSE" | "False") => Ok(Reply::Bool(false)),
            _ => Err("boolean"),
        },
    }
}

fn string_items(value: RespValue) -> Option<Vec<String>> {
    match value {
        RespValue::Array(Some(items)) => items
            .into_iter()
            .map(|item| match item {
                // Nil elements (HMGET on a missing field) decode as "".
                RespValue::Bulk(None) => Some(String::new()),
                other => bulk_text(other),
            })
            .collect(),
        _ => None,
    }
}

fn decode_strings(value: RespValue) -> Result<Reply, &'static str> {
    string_items(value).map(Reply::Strings).ok_or("list of strings")
}

fn decode_string_map(value: RespValue) -> Result<Reply, &'static str> {
    const EXPECTED: &str = "field/value pairs";
    let items = string_items(value).ok_or(EXPECTED)?;
    if items.len() % 2 != 0 {
        return Err(EXPECTED);
    }
    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        map.insert(field, value);
    }
    Ok(Reply::Map(map))
}

fn decode_scan(value: RespValue) -> Result<Reply, &'static str> {
    const EXPECTED: &str = "cursor and page";
    let mut parts = match value {
        RespValue::Array(Some(parts)) if parts.len() == 2 => parts.into_iter(),
        _ => return Err(EXPECTED),
    };
    let cursor = match parts.next() {
        Some(RespValue::Integer(n)) if n >= 0 => n as u64,
        Some(other) => bulk_text(other)
            .and_then(|text| text.parse().ok())
            .ok_or(EXPECTED)?,
        None => return Err(EXPECTED),
    };
    let items = parts.next().and_then(string_items).ok_or(EXPECTED)?;
    Ok(Reply::Scan { cursor, items })
}
