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

//! Resolution of the variables displayed for one navigation step.
//!
//! A step's snapshot is taken *before* its line runs, so the values a line assigns
//! have to be read from later snapshots of the same frame.

use pyreplay_common::types::{is_internal_name, ExecutionType, TraceStep, VarValue, Variables};

use crate::{
    analysis::{is_builtin, AnalysisMaps, LineInfo},
    decorator::{evaluate_subscript, has_local_slots, translate_local_slots},
};

/// Borrowed view of the replay state around one step
pub(crate) struct Resolver<'a> {
    pub steps: &'a [TraceStep],
    pub index: usize,
    pub oracle: Option<&'a [TraceStep]>,
    pub oracle_index: Option<usize>,
    pub maps: &'a AnalysisMaps,
}

impl<'a> Resolver<'a> {
    fn step(&self) -> &'a TraceStep {
        &self.steps[self.index]
    }

    fn locals(&self) -> Option<&'a [String]> {
        let step = self.step();
        self.maps.function_locals(&step.filename, step.scope.function_name()?)
    }

    /// Snapshot of the current step with local slots renamed
    pub fn own_variables(&self) -> Variables {
        let step = self.step();
        match self.locals() {
            Some(locals) => translate_local_slots(&step.variables, locals),
            None => step.variables.clone(),
        }
    }

    /// Variables shown next to the current line
    pub fn display_variables(&self) -> Variables {
        let own = self.own_variables();
        let key = self.step().key();
        let Some(info) = self.maps.line_info(&key) else {
            return own.into_iter().filter(|(name, _)| !is_internal_name(name)).collect();
        };

        let mut shown = Variables::new();
        for name in &info.assigned {
            if let Some(value) = self.resolve_assigned(name, &own) {
                shown.insert(name.clone(), value);
            }
        }
        for name in &info.referenced {
            if shown.contains_key(name) {
                continue;
            }
            if let Some(value) = self.resolve_referenced(name, &own) {
                shown.insert(name.clone(), value);
            }
        }

        let subscripts = self.resolve_subscripts(info, &own, &shown);
        shown.extend(subscripts);

        shown.retain(|name, value| {
            !is_internal_name(name)
                && (info.assigned.contains(name)
                    || !(is_builtin(name) || value.looks_like_callable()))
        });
        shown
    }

    /// First value of `name` in later snapshots of the same frame
    fn next_in_frame(&self, name: &str) -> Option<VarValue> {
        let current = self.step();
        for step in &self.steps[self.index + 1..] {
            if !current.scope.is_global() && step.scope.is_global() {
                return None;
            }
            if same_frame(step, current) {
                return step.variables.get(name).cloned();
            }
        }
        None
    }

    fn next_step(&self, name: &str) -> Option<VarValue> {
        let next = self.steps.get(self.index + 1)?;
        (next.scope == self.step().scope).then(|| next.variables.get(name).cloned()).flatten()
    }

    /// Return events of the unfiltered trace carry the final state of a frame
    fn from_return_events(&self, name: &str) -> Option<VarValue> {
        let oracle = self.oracle?;
        let scope = &self.step().scope;
        let matches = |step: &&TraceStep| {
            step.execution_type == ExecutionType::Return && &step.scope == scope
        };
        let forward = self.oracle_index.map_or(0, |i| i + 1);
        oracle
            .get(forward..)
            .into_iter()
            .flatten()
            .filter(matches)
            .find_map(|step| step.variables.get(name))
            .or_else(|| oracle.iter().filter(matches).find_map(|step| step.variables.get(name)))
            .cloned()
    }

    /// Raw `local_<N>` of the step following this one in the same frame
    fn from_lookahead_slot(&self, name: &str) -> Option<VarValue> {
        let slot = self.locals()?.iter().position(|local| local == name)?;
        let current = self.step();
        let next = self.steps[self.index + 1..]
            .iter()
            .filter(|step| same_frame(step, current))
            .find(|step| has_local_slots(&step.variables))?;
        next.variables.get(&format!("local_{slot}")).cloned()
    }

    fn chain(&self, name: &str) -> Option<VarValue> {
        self.next_in_frame(name)
            .or_else(|| self.next_step(name))
            .or_else(|| self.from_return_events(name))
    }

    /// Post-state of a name the line assigns
    pub fn resolve_assigned(&self, name: &str, own: &Variables) -> Option<VarValue> {
        self.chain(name)
            .or_else(|| own.get(name).cloned())
            .or_else(|| self.from_lookahead_slot(name))
    }

    /// Value of a name the line only reads
    pub fn resolve_referenced(&self, name: &str, own: &Variables) -> Option<VarValue> {
        if let Some(value) = own.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.chain(name) {
            return Some(value);
        }

        let current = self.step();
        let is_local = self.locals().is_some_and(|locals| locals.iter().any(|l| l == name));
        self.steps[self.index + 1..]
            .iter()
            .filter(|step| !is_local || same_frame(step, current))
            .find_map(|step| step.variables.get(name).cloned())
    }

    fn resolve_subscripts(&self, info: &LineInfo, own: &Variables, shown: &Variables) -> Variables {
        let mut out = Variables::new();
        for target in &info.subscripts {
            let container = if target.store {
                self.resolve_assigned(&target.object, own)
            } else {
                shown
                    .get(&target.object)
                    .cloned()
                    .or_else(|| self.resolve_referenced(&target.object, own))
            };
            let Some(container) = container else {
                continue;
            };
            let lookup = |name: &str| shown.get(name).or_else(|| own.get(name));
            if let Some(value) = evaluate_subscript(&container, &target.key, lookup) {
                out.insert(target.label(), value);
            }
        }
        out
    }
}

/// Whether two steps belong to the same frame of the same file
fn same_frame(a: &TraceStep, b: &TraceStep) -> bool {
    a.filename == b.filename && a.scope == b.scope
}
