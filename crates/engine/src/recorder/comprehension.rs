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

//! Folding of per-iteration comprehension events into a single step.

use std::collections::HashSet;

use pyreplay_common::types::{LineKey, Scope, TraceStep, Variables};

use crate::analysis::ComprehensionInfo;

/// Pending iterations of one comprehension line
#[derive(Debug, Clone)]
pub(crate) struct ComprehensionBuffer {
    pub key: LineKey,
    pub scope: Scope,
    pub iterations: usize,
    pub variables: Variables,
    pub timestamp: f64,
    seen: HashSet<String>,
}

impl ComprehensionBuffer {
    pub fn new(key: LineKey, scope: Scope, timestamp: f64) -> Self {
        Self {
            key,
            scope,
            iterations: 0,
            variables: Variables::new(),
            timestamp,
            seen: HashSet::new(),
        }
    }

    /// Take one iteration into the buffer.
    ///
    /// Returns `true` when the iteration made a comprehension-assigned name visible
    /// for the first time, in which case the buffer has to be flushed right away.
    pub fn absorb(&mut self, info: &ComprehensionInfo, variables: &Variables) -> bool {
        self.iterations += 1;
        let filtered: Variables = variables
            .iter()
            .filter(|(name, _)| info.is_visible(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let newly_assigned = self.iterations > 1
            && filtered
                .keys()
                .any(|name| info.assigned_names.contains(name) && !self.seen.contains(name));

        self.seen.extend(filtered.keys().cloned());
        self.variables = filtered;
        newly_assigned
    }

    /// Turn the buffer into a collapsed step
    pub fn into_step(self) -> TraceStep {
        let mut step = TraceStep::new(self.key.line, self.variables)
            .with_filename(self.key.filename)
            .with_scope(self.scope);
        step.timestamp = self.timestamp;
        step.collapsed_iterations = self.iterations;
        step
    }
}

/// Fill referenced names missing from a flushed step.
///
/// Sources are tried in order: the incoming snapshot, the previous step, then any
/// earlier step (nearest first). Only steps of the same scope are consulted.
pub(crate) fn backfill_referenced(
    step: &mut TraceStep,
    info: &ComprehensionInfo,
    incoming: Option<&Variables>,
    history: &[TraceStep],
) {
    for name in &info.referenced_names {
        if step.variables.contains_key(name) || !info.is_visible(name) {
            continue;
        }
        let value = incoming
            .and_then(|vars| vars.get(name))
            .or_else(|| {
                history
                    .iter()
                    .rev()
                    .filter(|prev| prev.scope == step.scope)
                    .find_map(|prev| prev.get(name))
            })
            .cloned();
        if let Some(value) = value {
            step.variables.insert(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyreplay_common::types::VarValue;

    fn info() -> ComprehensionInfo {
        ComprehensionInfo {
            assigned_names: ["squares".to_string()].into_iter().collect(),
            referenced_names: ["limit".to_string()].into_iter().collect(),
            comp_targets: ["x".to_string()].into_iter().collect(),
        }
    }

    fn vars(pairs: &[(&str, i64)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), VarValue::Int(*v))).collect()
    }

    #[test]
    fn test_buffer_filters_and_counts() {
        let info = info();
        let mut buffer = ComprehensionBuffer::new(LineKey::new("/main.py", 2), Scope::Global, 1.0);
        assert!(!buffer.absorb(&info, &vars(&[("limit", 3)])));
        assert!(!buffer.absorb(&info, &vars(&[("x", 0), ("local_0", 0)])));
        assert!(!buffer.absorb(&info, &vars(&[("x", 1)])));
        assert!(buffer.variables.is_empty());

        let step = buffer.into_step();
        assert_eq!(step.collapsed_iterations, 3);
        assert_eq!(step.line_number, 2);
        assert_eq!(step.timestamp, 1.0);
    }

    #[test]
    fn test_new_assignment_requests_flush() {
        let info = info();
        let mut buffer = ComprehensionBuffer::new(LineKey::new("/main.py", 2), Scope::Global, 0.0);
        assert!(!buffer.absorb(&info, &vars(&[("limit", 3)])));
        assert!(buffer.absorb(&info, &vars(&[("limit", 3), ("squares", 9)])));
    }

    #[test]
    fn test_backfill_prefers_incoming_snapshot() {
        let info = info();
        let mut step = TraceStep::new(2, Variables::new());
        let history = vec![TraceStep::new(1, vars(&[("limit", 1)]))];
        backfill_referenced(&mut step, &info, Some(&vars(&[("limit", 3)])), &history);
        assert_eq!(step.get("limit"), Some(&VarValue::Int(3)));

        let mut step = TraceStep::new(2, Variables::new());
        backfill_referenced(&mut step, &info, None, &history);
        assert_eq!(step.get("limit"), Some(&VarValue::Int(1)));
    }
}
