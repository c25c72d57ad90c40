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

//! Trace steps: the atomic unit produced by the instrumented interpreter.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{VarValue, Variables};

/// Default file that module-level code and non-Python resources are attributed to
pub const MAIN_FILE: &str = "/main.py";

static LOCAL_SLOT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^local_(\d+)$").expect("valid local slot regex"));

/// Index of a positional local pseudo-name such as `local_3`
pub fn local_slot_index(name: &str) -> Option<usize> {
    LOCAL_SLOT_REGEX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether a name is interpreter bookkeeping rather than a user variable.
///
/// Covers positional local pseudo-names, dunder names and CPython-style hidden
/// comprehension iterators (`.0`).
pub fn is_internal_name(name: &str) -> bool {
    local_slot_index(name).is_some() || name.starts_with("__") || name.starts_with('.')
}

/// Filename-qualified line identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    /// Absolute-style path of the source file
    pub filename: String,
    /// 1-based line number
    pub line: usize,
}

impl LineKey {
    /// Create a new line key
    pub fn new(filename: impl Into<String>, line: usize) -> Self {
        Self { filename: filename.into(), line }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

/// Scope a trace event was emitted from
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Module-level code
    #[default]
    Global,
    /// Body of the named function
    Function(String),
}

impl Scope {
    /// Scope for a line, given its enclosing function (if any)
    pub fn for_function(function: Option<&str>) -> Self {
        match function {
            Some(name) => Self::Function(name.to_string()),
            None => Self::Global,
        }
    }

    /// Name of the enclosing function, if any
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Function(name) => Some(name),
        }
    }

    /// Whether this is module-level scope
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Function(name) => write!(f, "function:{name}"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            other => other
                .strip_prefix("function:")
                .map(|name| Self::Function(name.to_string()))
                .ok_or_else(|| format!("invalid scope: {other}")),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of trace event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    /// Emitted before a line executes
    #[default]
    Line,
    /// Emitted once when a code object returns
    Return,
}

impl FromStr for ExecutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(Self::Line),
            "return" => Ok(Self::Return),
            other => Err(format!("invalid execution type: {other}")),
        }
    }
}

/// One step of an execution trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    /// 1-based line number
    pub line_number: usize,
    /// File the line belongs to
    pub filename: String,
    /// Snapshot of visible variables
    pub variables: Variables,
    /// Scope the event was emitted from
    pub scope: Scope,
    /// Event kind
    pub execution_type: ExecutionType,
    /// Milliseconds since recording started
    pub timestamp: f64,
    /// Number of comprehension iterations folded into this step
    #[serde(default)]
    pub collapsed_iterations: usize,
}

impl TraceStep {
    /// Create a line step in the main file with default metadata
    pub fn new(line_number: usize, variables: Variables) -> Self {
        Self {
            line_number,
            filename: MAIN_FILE.to_string(),
            variables,
            scope: Scope::Global,
            execution_type: ExecutionType::Line,
            timestamp: 0.0,
            collapsed_iterations: 0,
        }
    }

    /// Set the filename
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set the scope
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the execution type
    pub fn with_execution_type(mut self, execution_type: ExecutionType) -> Self {
        self.execution_type = execution_type;
        self
    }

    /// Filename-qualified line key of this step
    pub fn key(&self) -> LineKey {
        LineKey::new(self.filename.clone(), self.line_number)
    }

    /// Whether this step is a return meta-event
    pub fn is_return(&self) -> bool {
        self.execution_type == ExecutionType::Return
    }

    /// Whether this step stands for a collapsed comprehension
    pub fn is_collapsed(&self) -> bool {
        self.collapsed_iterations > 0
    }

    /// Whether two steps sit on the same filename-qualified line
    pub fn same_line(&self, other: &Self) -> bool {
        self.line_number == other.line_number && self.filename == other.filename
    }

    /// Look up a variable by name
    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.variables.get(name)
    }
}

/// Raw event as handed over by the interpreter's trace callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTraceEvent {
    /// 1-based line number
    pub line: usize,
    /// JSON dictionary of variable snapshots
    #[serde(default)]
    pub variables: serde_json::Value,
    /// File the line belongs to
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Event kind, `"line"` or `"return"`
    #[serde(default = "default_event")]
    pub event: String,
}

fn default_filename() -> String {
    MAIN_FILE.to_string()
}

fn default_event() -> String {
    "line".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_slot_index() {
        assert_eq!(local_slot_index("local_0"), Some(0));
        assert_eq!(local_slot_index("local_12"), Some(12));
        assert_eq!(local_slot_index("local_"), None);
        assert_eq!(local_slot_index("my_local_1"), None);
    }

    #[test]
    fn test_internal_names() {
        assert!(is_internal_name("local_3"));
        assert!(is_internal_name("__name__"));
        assert!(is_internal_name(".0"));
        assert!(!is_internal_name("total"));
        assert!(!is_internal_name("_private"));
    }

    #[test]
    fn test_scope_round_trip_through_text() {
        assert_eq!("global".parse::<Scope>().unwrap(), Scope::Global);
        assert_eq!("function:add".parse::<Scope>().unwrap(), Scope::Function("add".into()));
        assert!("module".parse::<Scope>().is_err());
        assert_eq!(Scope::Function("f".into()).to_string(), "function:f");
    }

    #[test]
    fn test_raw_event_defaults() {
        let event: RawTraceEvent =
            serde_json::from_str(r#"{"line": 3, "variables": {"x": 1}}"#).unwrap();
        assert_eq!(event.filename, MAIN_FILE);
        assert_eq!(event.event, "line");
        assert_eq!(event.line, 3);
    }
}
