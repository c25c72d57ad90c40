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

//! Interpreter seam: running code and receiving trace events.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use eyre::{Result, WrapErr};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use pyreplay_common::types::RawTraceEvent;
use tracing::{debug, info};

/// Host callback invoked synchronously by instrumented code for every trace event
pub type TraceSink = Arc<dyn Fn(&RawTraceEvent) + Send + Sync>;

/// Runtime that executes Python code and reports trace events
pub trait InterpreterAdapter: Send + Sync {
    /// Run code and return its printed output
    fn run<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Run code with top-level `await` support and return its printed output
    fn run_python_async<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Install the trace sink; replaces any previous sink
    fn register_trace_sink(&self, sink: TraceSink);

    /// Ask a running program to stop
    fn interrupt(&self);
}

/// Interpreter stand-in that feeds a previously captured event log to the sink.
///
/// The log is a JSON-lines document with one [`RawTraceEvent`] per line.
pub struct RecordedInterpreter {
    events: Vec<RawTraceEvent>,
    output: String,
    sink: RwLock<Option<TraceSink>>,
    interrupted: AtomicBool,
}

impl std::fmt::Debug for RecordedInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedInterpreter").field("events", &self.events.len()).finish()
    }
}

impl RecordedInterpreter {
    /// Create an interpreter replaying the given events
    pub fn new(events: Vec<RawTraceEvent>) -> Self {
        Self {
            events,
            output: String::new(),
            sink: RwLock::new(None),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Parse a JSON-lines event log; blank lines are skipped
    pub fn from_jsonl(log: &str) -> Result<Self> {
        let events = log
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<RawTraceEvent>(line)
                    .wrap_err_with(|| format!("invalid trace event on line {}", idx + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(events))
    }

    /// Set the output returned by `run`
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Recorded events
    pub fn events(&self) -> &[RawTraceEvent] {
        &self.events
    }

    fn emit_all(&self) -> Result<String> {
        self.interrupted.store(false, Ordering::SeqCst);
        let sink = self.sink.read().clone();
        let Some(sink) = sink else {
            debug!("no trace sink registered, events are dropped");
            return Ok(self.output.clone());
        };

        let mut emitted = 0;
        for event in &self.events {
            if self.interrupted.load(Ordering::SeqCst) {
                info!(emitted, "interrupted while emitting trace events");
                break;
            }
            sink(event);
            emitted += 1;
        }
        debug!(emitted, "emitted recorded trace events");
        Ok(self.output.clone())
    }
}

impl InterpreterAdapter for RecordedInterpreter {
    fn run<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, Result<String>> {
        async move { self.emit_all() }.boxed()
    }

    fn run_python_async<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>> {
        self.run(code)
    }

    fn register_trace_sink(&self, sink: TraceSink) {
        *self.sink.write() = Some(sink);
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_jsonl_parsing() {
        let log = r#"{"line": 1, "variables": {}}

{"line": 2, "variables": {"n": 4}, "filename": "/main.py", "event": "line"}
"#;
        let interpreter = RecordedInterpreter::from_jsonl(log).unwrap();
        assert_eq!(interpreter.events().len(), 2);
        assert_eq!(interpreter.events()[0].filename, "/main.py");
        assert_eq!(interpreter.events()[0].event, "line");

        let err = RecordedInterpreter::from_jsonl("{\"line\": 1}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_events_reach_sink() {
        let interpreter =
            RecordedInterpreter::from_jsonl("{\"line\": 1}\n{\"line\": 2}\n")
                .unwrap()
                .with_output("ok");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        interpreter.register_trace_sink(Arc::new(move |event: &RawTraceEvent| {
            sink_seen.lock().push(event.line)
        }));

        let output = futures::executor::block_on(interpreter.run("ignored")).unwrap();
        assert_eq!(output, "ok");
        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
