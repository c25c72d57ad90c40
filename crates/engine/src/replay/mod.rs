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

//! Step-by-step replay of a recorded trace.
//!
//! Navigation works on the trace with return events removed; the unfiltered trace is
//! kept as an oracle for the final state of each frame.

mod resolve;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use indexmap::IndexMap;
use pyreplay_common::types::{ExecutionTrace, LineKey, Scope, TraceStep, Variables};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    analysis::{AnalysisMaps, LineAnalyzer},
    config::ReplayConfig,
    decorator::{Decoration, LineDecorator},
    workspace::FileManager,
};

use resolve::Resolver;

/// Everything the editor shows for the current step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    /// Index into the navigation trace
    pub step_index: usize,
    /// Length of the navigation trace
    pub step_count: usize,
    /// File shown in the editor
    pub filename: String,
    /// Highlighted line
    pub line_number: usize,
    /// Scope of the step
    pub scope: Scope,
    /// Resolved display variables
    pub variables: Variables,
    /// Rendered decoration
    pub decoration: Decoration,
}

struct ReplayState {
    source: Arc<ExecutionTrace>,
    steps: Vec<TraceStep>,
    /// Position of each navigation step in the unfiltered trace
    filtered_to_oracle: Vec<usize>,
    oracle: Option<Arc<ExecutionTrace>>,
    maps: Arc<AnalysisMaps>,
    cursor: usize,
}

/// Drives replay navigation over a recorded trace
pub struct ReplayEngine {
    config: ReplayConfig,
    analyzer: Arc<dyn LineAnalyzer>,
    files: Arc<dyn FileManager>,
    replaying: Arc<AtomicBool>,
    decorator: LineDecorator,
    state: Option<ReplayState>,
    view: Option<StepView>,
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("replaying", &self.is_replaying())
            .field("cursor", &self.cursor())
            .field("step_count", &self.step_count())
            .finish()
    }
}

impl ReplayEngine {
    /// Create an idle engine; `replaying` is shared with the owner of the session
    pub fn new(
        config: ReplayConfig,
        analyzer: Arc<dyn LineAnalyzer>,
        files: Arc<dyn FileManager>,
        replaying: Arc<AtomicBool>,
    ) -> Self {
        let decorator = LineDecorator::new(config.clone());
        Self { config, analyzer, files, replaying, decorator, state: None, view: None }
    }

    /// Whether a replay is active
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Enter replay mode for `trace`.
    ///
    /// Starting again with the same trace rewinds to the first step without rebuilding
    /// the analysis. Returns `false` when the trace has no line events.
    pub fn start_replay(&mut self, trace: Arc<ExecutionTrace>) -> bool {
        if self.is_replaying() {
            if let Some(state) = self.state.as_mut().filter(|s| Arc::ptr_eq(&s.source, &trace)) {
                state.cursor = 0;
                debug!("rewinding replay");
                return self.render();
            }
        }

        let steps = trace.without_return_events();
        if steps.is_empty() {
            debug!("trace has no line events, nothing to replay");
            return false;
        }
        let filtered_to_oracle = trace.line_event_indices();

        let mut sources: IndexMap<String, String> =
            self.files.python_sources().into_iter().collect();
        sources.insert(self.config.main_file.clone(), trace.metadata.source_code.clone());
        let maps = Arc::new(AnalysisMaps::build(self.analyzer.as_ref(), sources));

        self.replaying.store(true, Ordering::SeqCst);
        self.view = None;
        self.state = Some(ReplayState {
            source: trace.clone(),
            steps,
            filtered_to_oracle,
            oracle: None,
            maps,
            cursor: 0,
        });
        self.sync_file(0);
        if let Some(state) = self.state.as_mut() {
            state.oracle = Some(trace);
        }

        info!(steps = self.step_count(), "started replay");
        self.render()
    }

    /// Leave replay mode and clear the decorations
    pub fn stop_replay(&mut self) {
        if self.state.is_some() {
            info!("stopped replay");
        }
        self.replaying.store(false, Ordering::SeqCst);
        self.state = None;
        self.view = None;
    }

    /// React to an edit of the workspace.
    ///
    /// Ignored while replaying, since the replay itself switches files. Returns whether
    /// the change was taken into account.
    pub fn notify_code_changed(&mut self) -> bool {
        if self.is_replaying() {
            debug!("ignoring code change during replay");
            return false;
        }
        self.state = None;
        self.view = None;
        true
    }

    /// Advance one step
    pub fn step_forward(&mut self) -> bool {
        match self.cursor() {
            Some(cursor) => self.jump_to_step(cursor + 1),
            None => false,
        }
    }

    /// Go back one step
    pub fn step_backward(&mut self) -> bool {
        match self.cursor() {
            Some(cursor) if cursor > 0 => self.jump_to_step(cursor - 1),
            _ => false,
        }
    }

    /// Move to step `index` of the navigation trace
    pub fn jump_to_step(&mut self, index: usize) -> bool {
        if !self.is_replaying() {
            return false;
        }
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        if index >= state.steps.len() {
            return false;
        }
        state.cursor = index;
        self.render()
    }

    /// Move to the step at `percentage` (clamped to `[0, 100]`) of the trace
    pub fn jump_to_percentage(&mut self, percentage: f64) -> bool {
        let Some(count) = self.step_count() else {
            return false;
        };
        let percentage = if percentage.is_nan() { 0.0 } else { percentage.clamp(0.0, 100.0) };
        let index = (percentage / 100.0 * (count - 1) as f64).round() as usize;
        self.jump_to_step(index)
    }

    /// Current step index
    pub fn cursor(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.cursor)
    }

    /// Number of navigable steps
    pub fn step_count(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.steps.len())
    }

    /// The navigation trace (return events removed)
    pub fn steps(&self) -> Option<&[TraceStep]> {
        self.state.as_ref().map(|state| state.steps.as_slice())
    }

    /// Analysis maps in use
    pub fn maps(&self) -> Option<Arc<AnalysisMaps>> {
        self.state.as_ref().map(|state| state.maps.clone())
    }

    /// What is currently displayed
    pub fn current_view(&self) -> Option<&StepView> {
        self.view.as_ref()
    }

    /// File shown for a step; traces of non-Python files display against the main file
    fn display_file(&self, step: &TraceStep) -> String {
        if step.filename.ends_with(".py") {
            step.filename.clone()
        } else {
            self.config.main_file.clone()
        }
    }

    /// Bring the file of step `index` into the editor
    fn sync_file(&self, index: usize) -> Option<String> {
        let step = self.state.as_ref()?.steps.get(index)?;
        let target = self.display_file(step);
        if self.files.active_file().as_deref() == Some(target.as_str()) {
            return Some(target);
        }
        if let Err(e) = self.files.save_active_edits() {
            debug!("failed to save edits before switching files: {e}");
        }
        if let Err(e) = self.files.open_file(&target) {
            debug!("failed to open {target}: {e}");
        }
        Some(target)
    }

    fn render(&mut self) -> bool {
        self.view = None;
        let Some(cursor) = self.cursor() else {
            return false;
        };
        let Some(filename) = self.sync_file(cursor) else {
            return false;
        };
        let Some(state) = self.state.as_ref() else {
            return false;
        };

        let step = &state.steps[cursor];
        let resolver = Resolver {
            steps: &state.steps,
            index: cursor,
            oracle: state.oracle.as_deref().map(|trace| trace.steps()),
            oracle_index: state.filtered_to_oracle.get(cursor).copied(),
            maps: &state.maps,
        };
        let variables = resolver.display_variables();

        let line_key = LineKey::new(filename.clone(), step.line_number);
        let line_text = state.maps.source_line(&line_key).unwrap_or("");
        let decoration = self.decorator.decorate(step.line_number, line_text, &variables);

        self.view = Some(StepView {
            step_index: cursor,
            step_count: state.steps.len(),
            filename,
            line_number: step.line_number,
            scope: step.scope.clone(),
            variables,
            decoration,
        });
        true
    }
}
