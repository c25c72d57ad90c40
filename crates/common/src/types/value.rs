// pyreplay - Python Execution Replay
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Snapshot values captured from the interpreter.
//!
//! The instrumented interpreter hands us a JSON dictionary per trace event. Its values
//! follow interpreter-specific serialization quirks: scalars arrive as native JSON
//! values, while containers and objects usually arrive as their Python `repr()` text.
//! [`VarValue`] settles the kind of each value exactly once, when the snapshot crosses
//! into this crate, so the recorder and the replay engine only ever work with a closed
//! set of kinds.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered `name -> value` snapshot of the variables visible at a trace event.
pub type Variables = IndexMap<String, VarValue>;

/// A single snapshotted variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VarValue {
    /// Python `int` that fits into 64 bits
    Int(i64),
    /// Python `float`
    Float(f64),
    /// Python `bool`
    Bool(bool),
    /// Python `str`, stored unquoted
    Str(String),
    /// Python `None`
    None,
    /// Any other value, kept as its serialized Python repr
    Repr(String),
}

/// Kind tag of a [`VarValue`], used for same-type comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// See [`VarValue::Int`]
    Int,
    /// See [`VarValue::Float`]
    Float,
    /// See [`VarValue::Bool`]
    Bool,
    /// See [`VarValue::Str`]
    Str,
    /// See [`VarValue::None`]
    None,
    /// See [`VarValue::Repr`]
    Repr,
}

impl VarValue {
    /// Convert one JSON value from the interpreter bridge into a snapshot value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Repr(n.to_string())
                }
            }
            serde_json::Value::String(s) => {
                if is_serialized_repr(s) {
                    Self::Repr(s.clone())
                } else {
                    Self::Str(s.clone())
                }
            }
            other => Self::Repr(json_to_python_repr(other)),
        }
    }

    /// Convert a whole JSON snapshot (an object) into [`Variables`].
    ///
    /// Anything other than a JSON object yields an empty snapshot.
    pub fn variables_from_json(value: &serde_json::Value) -> Variables {
        match value {
            serde_json::Value::Object(map) => {
                map.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect()
            }
            _ => Variables::new(),
        }
    }

    /// Kind tag of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Bool(_) => ValueKind::Bool,
            Self::Str(_) => ValueKind::Str,
            Self::None => ValueKind::None,
            Self::Repr(_) => ValueKind::Repr,
        }
    }

    /// Numeric view of the value, used by condition evaluation
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Whether this value is the repr of a function, method, class or module object
    pub fn looks_like_callable(&self) -> bool {
        match self {
            Self::Repr(r) | Self::Str(r) => {
                let r = r.trim_start();
                ["<function", "<bound method", "<class", "<module", "<built-in", "<closure"]
                    .iter()
                    .any(|prefix| r.starts_with(prefix))
            }
            _ => false,
        }
    }

    /// Raw display text: strings are shown without quotes.
    pub fn display(&self) -> String {
        match self {
            Self::Str(s) | Self::Repr(s) => s.clone(),
            other => other.python_repr(),
        }
    }

    /// Python literal text of this value (strings are quoted).
    pub fn python_repr(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Str(s) => quote_python_str(s),
            Self::None => "None".to_string(),
            Self::Repr(r) => r.clone(),
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Whether a string from the bridge is the serialized repr of a container or object
pub fn is_serialized_repr(s: &str) -> bool {
    let s = s.trim();
    if s.len() < 2 {
        return false;
    }
    matches!(
        (s.chars().next(), s.chars().last()),
        (Some('['), Some(']'))
            | (Some('('), Some(')'))
            | (Some('{'), Some('}'))
            | (Some('<'), Some('>'))
    )
}

/// Format a float the way Python's `repr` does for the common cases
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

/// Quote a string the way Python's `repr` does
pub fn quote_python_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Render a JSON container as the equivalent Python repr
fn json_to_python_repr(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => format_float(f),
            _ => n.to_string(),
        },
        serde_json::Value::String(s) => quote_python_str(s),
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(json_to_python_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        serde_json::Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote_python_str(k), json_to_python_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}
