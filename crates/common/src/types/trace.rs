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

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionType, TraceStep};

/// Default ceiling on the number of recorded steps
pub const DEFAULT_MAX_STEPS: usize = 1000;

/// Limits applied while recording a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingLimits {
    /// Recording stops once this many steps have been appended
    pub max_steps: usize,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self { max_steps: DEFAULT_MAX_STEPS }
    }
}

/// Metadata describing one recorded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    /// When recording started
    pub start_time: DateTime<Utc>,
    /// When the trace was sealed, `None` while still recording
    pub end_time: Option<DateTime<Utc>>,
    /// Source of the main file at recording time
    pub source_code: String,
    /// Limits the trace was recorded with
    pub recording_limits: RecordingLimits,
}

/// Repaired, ordered sequence of steps for one program run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    steps: Vec<TraceStep>,
    /// Run metadata
    pub metadata: TraceMetadata,
}

impl Deref for ExecutionTrace {
    type Target = Vec<TraceStep>;

    fn deref(&self) -> &Self::Target {
        &self.steps
    }
}

impl DerefMut for ExecutionTrace {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.steps
    }
}

impl ExecutionTrace {
    /// Create an empty trace for the given source
    pub fn new(source_code: impl Into<String>, recording_limits: RecordingLimits) -> Self {
        Self {
            steps: Vec::new(),
            metadata: TraceMetadata {
                start_time: Utc::now(),
                end_time: None,
                source_code: source_code.into(),
                recording_limits,
            },
        }
    }

    /// Build a sealed trace from already repaired steps
    pub fn from_steps(source_code: impl Into<String>, steps: Vec<TraceStep>) -> Self {
        let mut trace = Self::new(source_code, RecordingLimits::default());
        trace.steps = steps;
        trace.seal();
        trace
    }

    /// Convert trace to serde_json::Value
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Mark the trace as complete
    pub fn seal(&mut self) {
        if self.metadata.end_time.is_none() {
            self.metadata.end_time = Some(Utc::now());
        }
    }

    /// Whether the trace has been sealed
    pub fn is_sealed(&self) -> bool {
        self.metadata.end_time.is_some()
    }

    /// Steps of the trace
    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// Navigation view: every step except return meta-events
    pub fn without_return_events(&self) -> Vec<TraceStep> {
        self.steps.iter().filter(|step| !step.is_return()).cloned().collect()
    }

    /// Indices (into this trace) of the steps kept by [`Self::without_return_events`]
    pub fn line_event_indices(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.execution_type == ExecutionType::Line)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Index of the last line event, if any
    pub fn last_line_index(&self) -> Option<usize> {
        self.steps.iter().rposition(|step| !step.is_return())
    }

    /// Print a compact, colored listing of the trace
    pub fn print_trace(&self) {
        println!();
        println!("\x1b[36m══════════════════════ EXECUTION TRACE ══════════════════════\x1b[0m");
        if self.steps.is_empty() {
            println!("  \x1b[90mNo trace steps recorded\x1b[0m");
            return;
        }

        for (idx, step) in self.steps.iter().enumerate() {
            let marker = if step.is_return() { "\x1b[35m↩\x1b[0m" } else { " " };
            let collapsed = if step.is_collapsed() {
                format!(" \x1b[93m[×{}]\x1b[0m", step.collapsed_iterations)
            } else {
                String::new()
            };
            let vars: Vec<String> =
                step.variables.iter().map(|(k, v)| format!("{k}={}", v.python_repr())).collect();
            println!(
                "{marker}{idx:>4} \x1b[37m{}:{}\x1b[0m \x1b[90m({})\x1b[0m{collapsed} {}",
                step.filename,
                step.line_number,
                step.scope,
                vars.join(", ")
            );
        }

        let returns = self.steps.iter().filter(|s| s.is_return()).count();
        let collapsed = self.steps.iter().filter(|s| s.is_collapsed()).count();
        println!("\x1b[36m═════════════════════════════════════════════════════════════\x1b[0m");
        println!(
            "  Total: {} | Lines: {} | \x1b[35mReturns: {returns}\x1b[0m | \x1b[93mCollapsed: {collapsed}\x1b[0m",
            self.steps.len(),
            self.steps.len() - returns,
        );
    }
}

impl IntoIterator for ExecutionTrace {
    type Item = TraceStep;
    type IntoIter = std::vec::IntoIter<TraceStep>;
    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

impl<'a> IntoIterator for &'a ExecutionTrace {
    type Item = &'a TraceStep;
    type IntoIter = std::slice::Iter<'a, TraceStep>;
    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variables;

    #[test]
    fn test_filtered_view_drops_returns() {
        let steps = vec![
            TraceStep::new(1, Variables::new()),
            TraceStep::new(2, Variables::new()).with_execution_type(ExecutionType::Return),
            TraceStep::new(3, Variables::new()),
        ];
        let trace = ExecutionTrace::from_steps("", steps);
        let filtered = trace.without_return_events();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|s| !s.is_return()));
        assert_eq!(trace.line_event_indices(), vec![0, 2]);
        assert_eq!(trace.last_line_index(), Some(2));
        assert!(trace.is_sealed());
    }
}
