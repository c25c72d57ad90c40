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

//! Detection of tracer events for lines that did not run with the shown state.

use std::collections::HashSet;

use pyreplay_common::types::{is_internal_name, LineKey, TraceStep, Variables};
use serde::{Deserialize, Serialize};

use crate::analysis::{is_builtin, AnalysisMaps, LineClassifier, LineInfo};

/// Why an event was dropped as a phantom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhantomKind {
    /// Nothing of interest on the line and an empty snapshot
    InertLine,
    /// The line follows an already traced `break`/`continue`/`return`/`raise`
    DeadCode,
    /// First body line of a header whose condition is false for the snapshot
    FalseCondition,
    /// None of the names the line reads exist yet, as when a loop body is traced
    /// before its loop variable is bound
    MissingReferences,
}

/// Inputs of a phantom check for one incoming event
pub(crate) struct PhantomCheck<'a> {
    pub maps: &'a AnalysisMaps,
    pub traced_exits: &'a HashSet<LineKey>,
    pub previous: Option<&'a TraceStep>,
}

impl PhantomCheck<'_> {
    pub fn detect(&self, key: &LineKey, variables: &Variables) -> Option<PhantomKind> {
        let info = self.maps.line_info(key);

        if let Some(info) = info {
            if self.is_inert(key, info, variables) {
                return Some(PhantomKind::InertLine);
            }
        }

        if self.traced_exits.iter().any(|exit| self.maps.is_dead_after(exit, key)) {
            return Some(PhantomKind::DeadCode);
        }

        if self.maps.guarding_condition(key).is_some_and(|cond| cond.is_false_for(variables)) {
            return Some(PhantomKind::FalseCondition);
        }

        if let Some(info) = info {
            if self.misses_references(key, info, variables) {
                return Some(PhantomKind::MissingReferences);
            }
        }

        None
    }

    fn is_inert(&self, key: &LineKey, info: &LineInfo, variables: &Variables) -> bool {
        let exits = self.maps.classify(key).is_some_and(|control| control.kind.exits_block());
        let interesting = info
            .assigned
            .iter()
            .chain(&info.referenced)
            .any(|name| !is_builtin(name) && !is_internal_name(name));
        let moved = self.previous.is_some_and(|prev| prev.key() != *key);

        !exits && !interesting && info.function_calls.is_empty() && variables.is_empty() && moved
    }

    /// Functions defined in the file are skipped, since snapshots may leave them out.
    fn misses_references(&self, key: &LineKey, info: &LineInfo, variables: &Variables) -> bool {
        let mut free = info
            .referenced
            .iter()
            .filter(|name| !info.assigned.contains(*name))
            .filter(|name| !is_builtin(name) && !is_internal_name(name))
            .filter(|name| !self.maps.is_defined_function(&key.filename, name))
            .peekable();

        free.peek().is_some() && free.all(|name| !variables.contains_key(name.as_str()))
    }
}
