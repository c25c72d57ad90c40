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

//! Replay command - record an event log against a workspace and walk the trace

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use eyre::{bail, eyre, Result, WrapErr};
use pyreplay_common::types::{LineKey, MAIN_FILE};
use pyreplay_engine::{
    DebugSession, EngineConfig, FileManager, MemoryFileManager, PythonAnalyzer,
    RecordedInterpreter, ReplayEngine, StepView,
};
use tracing::{debug, info};

/// Inputs of the replay command
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// JSON-lines trace event log
    pub events: PathBuf,
    /// Directory holding the Python sources
    pub workspace: PathBuf,
    /// Entry script, relative to the workspace
    pub main: String,
    /// Single step to show
    pub step: Option<usize>,
    /// Where to write the repaired trace
    pub output: Option<PathBuf>,
    /// Recording step limit override
    pub max_steps: Option<usize>,
}

/// Record the event log, then print every step (or the requested one)
pub async fn replay_events(mut config: EngineConfig, options: ReplayOptions) -> Result<()> {
    if let Some(max_steps) = options.max_steps {
        config.recorder = config.recorder.with_max_steps(max_steps);
    }

    let files = load_workspace(&options.workspace, &options.main)?;
    let source = files
        .read_file(MAIN_FILE)
        .ok_or_else(|| {
            eyre!("entry script {} not found in {}", options.main, options.workspace.display())
        })?;

    let log = fs::read_to_string(&options.events)
        .wrap_err_with(|| format!("failed to read {}", options.events.display()))?;
    let interpreter = RecordedInterpreter::from_jsonl(&log)?;
    info!(events = interpreter.events().len(), "loaded trace event log");

    let mut session = DebugSession::new(
        config,
        Arc::new(PythonAnalyzer::new()),
        Arc::new(files),
        Arc::new(interpreter),
    );
    let trace = session.run_and_record(&source).await?;

    if let Some(output) = &options.output {
        let json = serde_json::to_string_pretty(&trace.to_json_value()?)?;
        fs::write(output, json).wrap_err_with(|| format!("failed to write {}", output.display()))?;
        info!("Wrote repaired trace to {}", output.display());
    }

    if !session.start_replay() {
        println!("Trace has no line events");
        return Ok(());
    }

    let replay = session.replay_mut();
    match options.step {
        Some(step) => {
            if !replay.jump_to_step(step) {
                let count = replay.step_count().unwrap_or_default();
                bail!("step {step} is out of range, the trace has {count} steps");
            }
            print_current(replay);
        }
        None => loop {
            print_current(replay);
            if !replay.step_forward() {
                break;
            }
        },
    }

    session.stop_replay();
    Ok(())
}

/// Load every `.py` file under `root`; the entry script becomes the main file
pub fn load_workspace(root: &Path, main: &str) -> Result<MemoryFileManager> {
    let files = MemoryFileManager::new();
    let main_path = root.join(main);
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).wrap_err_with(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("py") {
                continue;
            }
            let content = fs::read_to_string(&path)
                .wrap_err_with(|| format!("failed to read {}", path.display()))?;
            let key =
                if path == main_path { MAIN_FILE.to_string() } else { workspace_key(root, &path) };
            debug!("loaded {} as {key}", path.display());
            files.write_file(key, content);
        }
    }
    Ok(files)
}

/// Absolute, `/`-separated workspace path of a file
fn workspace_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    format!("/{}", parts.join("/"))
}

fn print_current(replay: &ReplayEngine) {
    if let Some(view) = replay.current_view() {
        let line_text = replay
            .maps()
            .and_then(|maps| {
                let key = LineKey::new(view.filename.clone(), view.line_number);
                maps.source_line(&key).map(str::to_string)
            })
            .unwrap_or_default();
        print!("{}", format_view(view, &line_text));
    }
}

/// One step as printed by the CLI
pub fn format_view(view: &StepView, line_text: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}/{}] {}:{} ({})  {}",
        view.step_index + 1,
        view.step_count,
        view.filename,
        view.line_number,
        view.scope,
        line_text.trim()
    );
    for row in &view.decoration.rows {
        let _ = writeln!(out, "    {row}");
    }
    if let Some(overflow) = &view.decoration.overflow {
        let _ = writeln!(out, "    {overflow}");
    }
    out
}
