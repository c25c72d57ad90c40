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

//! Per-line static facts about Python source files.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::Condition;

/// Key of a subscript expression such as `beats[1]` or `counts[word]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptKey {
    /// Integer literal key
    Int(i64),
    /// String literal key
    Str(String),
    /// Key taken from another variable
    Name(String),
}

/// A `container[key]` expression worth displaying on its own
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptTarget {
    /// Name of the container variable
    pub object: String,
    /// Key expression
    pub key: SubscriptKey,
    /// Whether the subscript is an assignment target
    pub store: bool,
}

impl SubscriptTarget {
    /// Source-like label, e.g. `beats[1]`, `names['bob']`, `counts[word]`
    pub fn label(&self) -> String {
        match &self.key {
            SubscriptKey::Int(i) => format!("{}[{i}]", self.object),
            SubscriptKey::Str(s) => {
                format!("{}[{}]", self.object, pyreplay_common::types::quote_python_str(s))
            }
            SubscriptKey::Name(n) => format!("{}[{n}]", self.object),
        }
    }
}

/// Names touched by one source line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    /// Names bound by the line, in source order
    pub assigned: IndexSet<String>,
    /// Names read by the line, in source order
    pub referenced: IndexSet<String>,
    /// Names of called functions
    pub function_calls: IndexSet<String>,
    /// Simple subscript expressions
    pub subscripts: Vec<SubscriptTarget>,
}

impl LineInfo {
    /// Whether the line reads or binds nothing and calls nothing
    pub fn is_inert(&self) -> bool {
        self.assigned.is_empty() && self.referenced.is_empty() && self.function_calls.is_empty()
    }
}

/// Comprehension facts for one line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensionInfo {
    /// Names assigned by the statement that holds the comprehension
    pub assigned_names: IndexSet<String>,
    /// Names read by the statement, excluding iteration targets
    pub referenced_names: IndexSet<String>,
    /// Iteration target names of every generator on the line
    pub comp_targets: IndexSet<String>,
}

impl ComprehensionInfo {
    /// Whether a variable from a buffered iteration should stay visible
    pub fn is_visible(&self, name: &str) -> bool {
        !self.comp_targets.contains(name)
            && !pyreplay_common::types::is_internal_name(name)
            && (self.assigned_names.contains(name) || self.referenced_names.contains(name))
    }
}

/// Syntactic kind of the statement starting on a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `return`
    Return,
    /// `raise`
    Raise,
    /// `if` header
    If,
    /// `elif` header
    Elif,
    /// `while` header
    While,
    /// `for` header
    For,
    /// `def` / `class` header
    Def,
    /// Anything else
    #[default]
    Other,
}

impl StatementKind {
    /// Statements after which the rest of the enclosing block cannot run
    pub fn exits_block(&self) -> bool {
        matches!(self, Self::Break | Self::Continue | Self::Return | Self::Raise)
    }
}

/// Control-flow metadata of a line, as used by phantom-trace detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineControl {
    /// Statement kind
    pub kind: StatementKind,
    /// Column of the first character of the statement
    pub indent: usize,
    /// Header line of the `if`/`elif`/`while` whose body starts with this line
    pub guard: Option<usize>,
    /// Simple condition of an `if`/`elif`/`while` header
    pub condition: Option<Condition>,
    /// Lines made unreachable by this statement (inclusive), for block exits
    pub dead_range: Option<(usize, usize)>,
}

/// Everything the analyzer knows about one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// File the analysis belongs to
    pub filename: String,
    /// Per-line names
    pub lines: BTreeMap<usize, LineInfo>,
    /// Lines that hold a comprehension
    pub comprehensions: BTreeMap<usize, ComprehensionInfo>,
    /// Function name -> local names ordered by slot index
    pub function_locals: IndexMap<String, Vec<String>>,
    /// Line -> enclosing function name
    pub line_functions: BTreeMap<usize, String>,
    /// Per-line control-flow metadata
    pub control: BTreeMap<usize, LineControl>,
    /// Names defined by `def` statements in the file
    pub defined_functions: BTreeSet<String>,
    /// Raw source lines
    pub source_lines: Vec<String>,
}

/// Static analyzer consumed by the recorder and the replay engine
pub trait LineAnalyzer: Send + Sync {
    /// Analyze one file
    fn analyze(&self, filename: &str, source: &str) -> Result<FileAnalysis, AnalysisError>;
}

/// Errors that can occur during source analysis
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The source could not be parsed
    #[error("failed to parse {filename}: {message}")]
    Parse {
        /// File that failed to parse
        filename: String,
        /// Parser message
        message: String,
    },

    /// Other analysis-related errors
    #[error("other error: {0}")]
    Other(eyre::Report),
}
