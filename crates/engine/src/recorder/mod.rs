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

//! Execution trace recorder.
//!
//! The recorder sits behind the interpreter's trace sink and turns the raw event
//! stream into a repaired [`ExecutionTrace`]:
//!
//! - comprehension iterations are folded into one collapsed step,
//! - phantom events (see [`PhantomKind`]) and duplicates are dropped,
//! - values a line assigns are copied back onto that line's step once a later
//!   snapshot exposes them.
//!
//! Static analysis is built when recording starts, by default on a background thread.
//! Until it is published every event passes through unfiltered.

mod backfill;
mod comprehension;
mod phantom;

pub use backfill::parse_literal_assignment;
pub use phantom::PhantomKind;

use std::{
    collections::HashSet,
    sync::Arc,
    thread::JoinHandle,
    time::Instant,
};

use eyre::{ensure, eyre, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use pyreplay_common::types::{
    ExecutionTrace, ExecutionType, LineKey, RawTraceEvent, RecordingLimits, Scope, TraceStep,
    VarValue, Variables, MAIN_FILE,
};
use tracing::{debug, info, warn};

use crate::{
    analysis::{AnalysisMaps, LineAnalyzer, LineClassifier},
    config::RecorderConfig,
    decorator::translate_local_slots,
    workspace::FileManager,
};

use comprehension::{backfill_referenced, ComprehensionBuffer};
use phantom::PhantomCheck;

/// What happened to one incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Appended as a new step
    Recorded,
    /// Held back in a comprehension buffer
    Buffered,
    /// Completed a comprehension buffer, which was appended as a collapsed step
    Flushed,
    /// Dropped as a tracer artifact
    Phantom(PhantomKind),
    /// Dropped as a repeat of a recent step
    Duplicate,
    /// The step ceiling was hit; recording stopped
    LimitReached,
    /// Not recording, or the event could not be processed
    Ignored,
}

/// Shared slot the analysis builder publishes into
type SharedAnalysis = Arc<RwLock<Option<Arc<AnalysisMaps>>>>;

/// Ingests trace events and produces a repaired [`ExecutionTrace`]
pub struct ExecutionRecorder {
    config: RecorderConfig,
    analyzer: Arc<dyn LineAnalyzer>,
    files: Arc<dyn FileManager>,
    analysis: SharedAnalysis,
    builder: Option<JoinHandle<()>>,
    trace: Option<ExecutionTrace>,
    buffers: IndexMap<LineKey, ComprehensionBuffer>,
    traced_exits: HashSet<LineKey>,
    recording: bool,
    started: Instant,
}

impl std::fmt::Debug for ExecutionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRecorder")
            .field("recording", &self.recording)
            .field("steps", &self.trace.as_ref().map(|t| t.len()))
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

impl ExecutionRecorder {
    /// Create an idle recorder
    pub fn new(
        config: RecorderConfig,
        analyzer: Arc<dyn LineAnalyzer>,
        files: Arc<dyn FileManager>,
    ) -> Self {
        Self {
            config,
            analyzer,
            files,
            analysis: Arc::new(RwLock::new(None)),
            builder: None,
            trace: None,
            buffers: IndexMap::new(),
            traced_exits: HashSet::new(),
            recording: false,
            started: Instant::now(),
        }
    }

    /// Whether events are currently accepted
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Recorder settings
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Analysis maps, once published
    pub fn analysis(&self) -> Option<Arc<AnalysisMaps>> {
        self.analysis.read().clone()
    }

    /// Begin a new recording of `source_code`, the content of the main file.
    ///
    /// Returns `false` when already recording or when recording is disabled.
    pub fn start_recording(&mut self, source_code: &str, limits: RecordingLimits) -> bool {
        if self.recording || !self.config.enabled {
            debug!(
                recording = self.recording,
                enabled = self.config.enabled,
                "recording rejected"
            );
            return false;
        }

        self.wait_for_analysis();
        self.buffers.clear();
        self.traced_exits.clear();
        self.trace = Some(ExecutionTrace::new(source_code, limits));
        self.started = Instant::now();
        self.recording = true;
        *self.analysis.write() = None;

        let mut sources: IndexMap<String, String> =
            self.files.python_sources().into_iter().collect();
        sources.insert(MAIN_FILE.to_string(), source_code.to_string());
        self.spawn_analysis(sources);

        info!(max_steps = limits.max_steps, "started recording");
        true
    }

    fn spawn_analysis(&mut self, sources: IndexMap<String, String>) {
        let analyzer = self.analyzer.clone();
        let slot = self.analysis.clone();
        let build = move || {
            let maps = AnalysisMaps::build(analyzer.as_ref(), sources);
            *slot.write() = Some(Arc::new(maps));
        };

        if !self.config.background_analysis {
            build();
            return;
        }

        // Building on the calling thread is the fallback when no thread can be spawned
        let fallback = Arc::new(parking_lot::Mutex::new(Some(build)));
        let spawned = {
            let job = fallback.clone();
            std::thread::Builder::new().name("pyreplay-analysis".into()).spawn(move || {
                if let Some(build) = job.lock().take() {
                    build();
                }
            })
        };
        match spawned {
            Ok(handle) => self.builder = Some(handle),
            Err(e) => {
                warn!("failed to spawn analysis thread, building inline: {e}");
                if let Some(build) = fallback.lock().take() {
                    build();
                }
            }
        }
    }

    /// Block until the analysis builder has finished
    pub fn wait_for_analysis(&mut self) {
        if let Some(handle) = self.builder.take() {
            if handle.join().is_err() {
                warn!("analysis builder panicked; continuing without analysis");
            }
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Entry point of the interpreter's trace sink
    pub fn on_trace_event(&mut self, event: &RawTraceEvent) -> StepOutcome {
        let execution_type = match event.event.parse::<ExecutionType>() {
            Ok(kind) => kind,
            Err(e) => {
                debug!("ignoring trace event: {e}");
                return StepOutcome::Ignored;
            }
        };
        let variables = VarValue::variables_from_json(&event.variables);
        let key = LineKey::new(event.filename.clone(), event.line);
        let scope =
            Scope::for_function(self.analysis().as_deref().and_then(|m| m.function_at(&key)));
        self.record_step(event.line, variables, scope, execution_type, &event.filename)
    }

    /// Ingest one trace event
    pub fn record_step(
        &mut self,
        line_number: usize,
        variables: Variables,
        scope: Scope,
        execution_type: ExecutionType,
        filename: &str,
    ) -> StepOutcome {
        if !self.recording {
            return StepOutcome::Ignored;
        }
        match self.process_step(line_number, variables, scope, execution_type, filename) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("failed to record step at {filename}:{line_number}: {e}");
                StepOutcome::Ignored
            }
        }
    }

    fn process_step(
        &mut self,
        line_number: usize,
        mut variables: Variables,
        scope: Scope,
        execution_type: ExecutionType,
        filename: &str,
    ) -> Result<StepOutcome> {
        ensure!(line_number > 0, "line numbers start at 1");
        ensure!(!filename.is_empty(), "missing filename");

        let key = LineKey::new(filename, line_number);

        // Pending comprehension buffers become steps when flushed
        let pending = self.buffers.keys().filter(|buffered| **buffered != key).count();
        let max_steps = self.trace_ref()?.metadata.recording_limits.max_steps;
        if self.trace_ref()?.len() + pending >= max_steps {
            info!(max_steps, pending, "step limit reached, recording stopped");
            self.recording = false;
            return Ok(StepOutcome::LimitReached);
        }

        let maps = self.analysis();

        if let (Some(maps), Some(function)) = (maps.as_deref(), scope.function_name()) {
            if let Some(locals) = maps.function_locals(filename, function) {
                variables = translate_local_slots(&variables, locals);
            }
        }

        if let Some(info) = maps.as_deref().and_then(|m| m.comprehension(&key)) {
            if execution_type == ExecutionType::Return {
                if self.buffers.contains_key(&key) {
                    return Ok(StepOutcome::Buffered);
                }
            } else {
                self.flush_buffers(Some(&key), Some(&variables), maps.as_deref())?;
                let timestamp = self.elapsed_ms();
                let buffer = self.buffers.entry(key.clone()).or_insert_with(|| {
                    ComprehensionBuffer::new(key.clone(), scope.clone(), timestamp)
                });
                if !buffer.absorb(info, &variables) {
                    return Ok(StepOutcome::Buffered);
                }
                if let Some(buffer) = self.buffers.shift_remove(&key) {
                    let step = buffer.into_step();
                    self.push_step(step, maps.as_deref())?;
                }
                return Ok(StepOutcome::Flushed);
            }
        }

        self.flush_buffers(None, Some(&variables), maps.as_deref())?;

        let trace = self.trace_ref()?;
        if let (Some(maps), ExecutionType::Line) = (maps.as_deref(), execution_type) {
            let check =
                PhantomCheck { maps, traced_exits: &self.traced_exits, previous: trace.last() };
            if let Some(kind) = check.detect(&key, &variables) {
                debug!(%key, ?kind, "dropping phantom step");
                return Ok(StepOutcome::Phantom(kind));
            }
        }

        let is_duplicate = trace.iter().rev().take(self.config.duplicate_lookback).any(|prev| {
            prev.line_number == key.line
                && prev.filename == key.filename
                && prev.execution_type == execution_type
                && prev.variables.iter().eq(variables.iter())
        });
        if is_duplicate {
            debug!(%key, "dropping duplicate step");
            return Ok(StepOutcome::Duplicate);
        }

        let mut step = TraceStep::new(line_number, variables)
            .with_filename(filename)
            .with_scope(scope)
            .with_execution_type(execution_type);
        step.timestamp = self.elapsed_ms();
        self.push_step(step, maps.as_deref())?;
        Ok(StepOutcome::Recorded)
    }

    fn trace_ref(&self) -> Result<&ExecutionTrace> {
        self.trace.as_ref().ok_or_else(|| eyre!("no active trace"))
    }

    fn trace_mut(&mut self) -> Result<&mut ExecutionTrace> {
        self.trace.as_mut().ok_or_else(|| eyre!("no active trace"))
    }

    /// Append a step and run the retroactive backfills
    fn push_step(&mut self, step: TraceStep, maps: Option<&AnalysisMaps>) -> Result<()> {
        let key = step.key();
        let is_line = !step.is_return();
        let lookback = self.config.backfill_lookback;

        let trace = self.trace_mut()?;
        trace.push(step);
        if let Some(maps) = maps {
            backfill::retro_assigned(trace, maps, lookback);
        }
        backfill::retro_collapsed(trace, maps);

        let exits =
            maps.and_then(|m| m.classify(&key)).is_some_and(|c| c.kind.exits_block());
        if is_line && exits {
            self.traced_exits.insert(key);
        }
        Ok(())
    }

    /// Flush pending comprehension buffers other than `keep`
    fn flush_buffers(
        &mut self,
        keep: Option<&LineKey>,
        incoming: Option<&Variables>,
        maps: Option<&AnalysisMaps>,
    ) -> Result<()> {
        let pending: Vec<LineKey> =
            self.buffers.keys().filter(|key| Some(*key) != keep).cloned().collect();
        for key in pending {
            let Some(buffer) = self.buffers.shift_remove(&key) else {
                continue;
            };
            let mut step = buffer.into_step();
            if let Some(info) = maps.and_then(|m| m.comprehension(&key)) {
                backfill_referenced(&mut step, info, incoming, self.trace_ref()?);
            }
            debug!(%key, iterations = step.collapsed_iterations, "flushed comprehension");
            self.push_step(step, maps)?;
        }
        Ok(())
    }

    /// Alias of [`Self::finalize_recording`]
    pub fn stop_recording(&mut self) {
        self.finalize_recording();
    }

    /// Flush buffers, run the post-recording passes and seal the trace.
    ///
    /// Safe to call repeatedly and when nothing was recorded.
    pub fn finalize_recording(&mut self) {
        self.recording = false;
        if self.trace.as_ref().map_or(true, ExecutionTrace::is_sealed) {
            return;
        }

        self.wait_for_analysis();
        let maps = self.analysis();
        let maps = maps.as_deref();

        if let Err(e) = self.flush_buffers(None, None, maps) {
            debug!("failed to flush comprehension buffers: {e}");
        }

        let window = self.config.forward_lookahead;
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        let source = trace.metadata.source_code.clone();

        if let Some(maps) = maps {
            backfill::assign_scopes(trace, maps);
            backfill::translate_remaining_slots(trace, maps);
        }
        backfill::fill_collapsed(trace, maps);
        if let Some(maps) = maps {
            backfill::fill_from_lookahead(trace, maps, window);
            backfill::fill_from_later_steps(trace, maps);
        }
        if let Err(e) = backfill::fill_final_literal(trace, maps, &source) {
            debug!("skipped final literal injection: {e}");
        }
        if let Some(maps) = maps {
            let unresolved = backfill::unresolved_assigned(trace, maps);
            if !unresolved.is_empty() {
                debug!(count = unresolved.len(), "lines with unresolved assignments");
            }
        }

        trace.seal();
        info!(steps = trace.len(), "finalized recording");
    }

    /// The current (possibly unfinished) trace
    pub fn trace(&self) -> Option<&ExecutionTrace> {
        self.trace.as_ref()
    }

    /// Take the finalized trace out of the recorder
    pub fn take_trace(&mut self) -> Option<ExecutionTrace> {
        self.finalize_recording();
        self.trace.take()
    }

    /// Drop all recording state
    pub fn dispose(&mut self) {
        self.recording = false;
        self.wait_for_analysis();
        self.trace = None;
        self.buffers.clear();
        self.traced_exits.clear();
        *self.analysis.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::PythonAnalyzer, workspace::MemoryFileManager};

    fn recorder(files: MemoryFileManager) -> ExecutionRecorder {
        ExecutionRecorder::new(
            RecorderConfig::default().with_background_analysis(false),
            Arc::new(PythonAnalyzer::new()),
            Arc::new(files),
        )
    }

    fn vars(pairs: &[(&str, i64)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), VarValue::Int(*v))).collect()
    }

    #[test]
    fn test_start_is_rejected_twice_and_when_disabled() {
        let mut rec = recorder(MemoryFileManager::new());
        assert!(rec.start_recording("x = 1\n", RecordingLimits::default()));
        assert!(!rec.start_recording("x = 1\n", RecordingLimits::default()));

        let mut disabled = ExecutionRecorder::new(
            RecorderConfig::default().with_enabled(false),
            Arc::new(PythonAnalyzer::new()),
            Arc::new(MemoryFileManager::new()),
        );
        assert!(!disabled.start_recording("x = 1\n", RecordingLimits::default()));
    }

    #[test]
    fn test_limit_stops_recording() {
        let mut rec = recorder(MemoryFileManager::new());
        rec.start_recording("a = 1\nb = 2\nc = 3\n", RecordingLimits { max_steps: 2 });
        let line = |rec: &mut ExecutionRecorder, n: usize, v: Variables| {
            rec.record_step(n, v, Scope::Global, ExecutionType::Line, MAIN_FILE)
        };
        assert_eq!(line(&mut rec, 1, vars(&[])), StepOutcome::Recorded);
        assert_eq!(line(&mut rec, 2, vars(&[("a", 1)])), StepOutcome::Recorded);
        assert_eq!(line(&mut rec, 3, vars(&[("a", 1), ("b", 2)])), StepOutcome::LimitReached);
        assert!(!rec.is_recording());
        assert_eq!(line(&mut rec, 3, vars(&[])), StepOutcome::Ignored);
        assert_eq!(rec.take_trace().map(|t| t.len()), Some(2));
    }

    #[test]
    fn test_limit_counts_pending_comprehensions() {
        let source = "a = 1\nsq = [x for x in range(3)]\nb = 2\n";
        let mut rec = recorder(MemoryFileManager::new());
        rec.start_recording(source, RecordingLimits { max_steps: 2 });
        let line = |rec: &mut ExecutionRecorder, n: usize, v: Variables| {
            rec.record_step(n, v, Scope::Global, ExecutionType::Line, MAIN_FILE)
        };
        assert_eq!(line(&mut rec, 1, vars(&[])), StepOutcome::Recorded);
        assert_eq!(line(&mut rec, 2, vars(&[("a", 1)])), StepOutcome::Buffered);
        assert_eq!(line(&mut rec, 2, vars(&[("a", 1), ("x", 0)])), StepOutcome::Buffered);
        assert_eq!(line(&mut rec, 3, vars(&[("a", 1)])), StepOutcome::LimitReached);

        let trace = rec.take_trace().unwrap();
        let lines: Vec<usize> = trace.iter().map(|step| step.line_number).collect();
        assert_eq!(lines, vec![1, 2]);
    }

    #[test]
    fn test_unknown_event_kind_is_ignored() {
        let mut rec = recorder(MemoryFileManager::new());
        rec.start_recording("x = 1\n", RecordingLimits::default());
        let event = RawTraceEvent {
            line: 1,
            variables: serde_json::json!({}),
            filename: MAIN_FILE.into(),
            event: "call".into(),
        };
        assert_eq!(rec.on_trace_event(&event), StepOutcome::Ignored);
        let zero = RawTraceEvent { line: 0, event: "line".into(), ..event };
        assert_eq!(rec.on_trace_event(&zero), StepOutcome::Ignored);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut rec = recorder(MemoryFileManager::new());
        rec.finalize_recording();
        assert!(rec.trace().is_none());

        rec.start_recording("x = 1\n", RecordingLimits::default());
        rec.record_step(1, vars(&[]), Scope::Global, ExecutionType::Line, MAIN_FILE);
        rec.stop_recording();
        let end = rec.trace().and_then(|t| t.metadata.end_time);
        assert!(end.is_some());
        rec.finalize_recording();
        assert_eq!(rec.trace().and_then(|t| t.metadata.end_time), end);

        rec.dispose();
        assert!(rec.trace().is_none());
        assert!(rec.analysis().is_none());
    }
}
