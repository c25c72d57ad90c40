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

//! A debugging session: record a run, then replay it.

use std::sync::{atomic::AtomicBool, Arc};

use eyre::{bail, Result};
use parking_lot::Mutex;
use pyreplay_common::types::{ExecutionTrace, RawTraceEvent};
use tracing::{debug, info, warn};

use crate::{
    analysis::LineAnalyzer,
    config::EngineConfig,
    interpreter::{InterpreterAdapter, TraceSink},
    recorder::ExecutionRecorder,
    replay::ReplayEngine,
    workspace::FileManager,
};

/// Owns the recorder and the replay engine of one editor
pub struct DebugSession {
    config: EngineConfig,
    adapter: Arc<dyn InterpreterAdapter>,
    recorder: Arc<Mutex<ExecutionRecorder>>,
    replay: ReplayEngine,
    replaying: Arc<AtomicBool>,
    last_trace: Option<Arc<ExecutionTrace>>,
    last_output: Option<String>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("replay", &self.replay)
            .field("has_trace", &self.last_trace.is_some())
            .finish()
    }
}

impl DebugSession {
    /// Wire the recorder into the interpreter's trace sink
    pub fn new(
        config: EngineConfig,
        analyzer: Arc<dyn LineAnalyzer>,
        files: Arc<dyn FileManager>,
        adapter: Arc<dyn InterpreterAdapter>,
    ) -> Self {
        let recorder = Arc::new(Mutex::new(ExecutionRecorder::new(
            config.recorder.clone(),
            analyzer.clone(),
            files.clone(),
        )));

        let sink_recorder = recorder.clone();
        let sink: TraceSink = Arc::new(move |event: &RawTraceEvent| {
            sink_recorder.lock().on_trace_event(event);
        });
        adapter.register_trace_sink(sink);

        let replaying = Arc::new(AtomicBool::new(false));
        let replay = ReplayEngine::new(config.replay.clone(), analyzer, files, replaying.clone());

        Self { config, adapter, recorder, replay, replaying, last_trace: None, last_output: None }
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `code` under the recorder and keep the finalized trace.
    ///
    /// A failing run still yields the trace recorded up to the failure.
    pub async fn run_and_record(&mut self, code: &str) -> Result<Arc<ExecutionTrace>> {
        if self.replay.is_replaying() {
            self.replay.stop_replay();
        }

        let limits = self.config.recorder.limits();
        if !self.recorder.lock().start_recording(code, limits) {
            bail!("recording is disabled or already in progress");
        }

        match self.adapter.run(code).await {
            Ok(output) => {
                debug!(bytes = output.len(), "run finished");
                self.last_output = Some(output);
            }
            Err(e) => {
                warn!("run failed: {e}");
                self.last_output = None;
            }
        }

        let trace = self.recorder.lock().take_trace();
        let Some(trace) = trace else {
            bail!("no trace was recorded");
        };
        info!(steps = trace.len(), "recorded run");
        let trace = Arc::new(trace);
        self.last_trace = Some(trace.clone());
        Ok(trace)
    }

    /// Stop the running program
    pub fn interrupt(&self) {
        self.adapter.interrupt();
    }

    /// Output printed by the last run
    pub fn last_output(&self) -> Option<&str> {
        self.last_output.as_deref()
    }

    /// The last recorded trace
    pub fn last_trace(&self) -> Option<Arc<ExecutionTrace>> {
        self.last_trace.clone()
    }

    /// Replay the last recorded trace; rewinds if it is already being replayed
    pub fn start_replay(&mut self) -> bool {
        match self.last_trace.clone() {
            Some(trace) => self.replay.start_replay(trace),
            None => false,
        }
    }

    /// Replay engine
    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    /// Mutable replay engine, for navigation
    pub fn replay_mut(&mut self) -> &mut ReplayEngine {
        &mut self.replay
    }

    /// Whether a replay is active
    pub fn is_replaying(&self) -> bool {
        self.replay.is_replaying()
    }

    /// Flag shared with the replay engine; set while replaying
    pub fn replaying_flag(&self) -> Arc<AtomicBool> {
        self.replaying.clone()
    }

    /// Invalidate the last trace after an edit; ignored while replaying
    pub fn notify_code_changed(&mut self) -> bool {
        if !self.replay.notify_code_changed() {
            return false;
        }
        self.last_trace = None;
        true
    }

    /// Leave replay mode
    pub fn stop_replay(&mut self) {
        self.replay.stop_replay();
    }

    /// Drop all recorded and replay state
    pub fn dispose(&mut self) {
        self.replay.stop_replay();
        self.recorder.lock().dispose();
        self.last_trace = None;
        self.last_output = None;
    }
}
