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

//! pyreplay - Python Execution Replay
//!
//! Records an instrumented Python run from a trace event log and steps through it.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;

mod cmd;

/// Command-line interface for pyreplay
#[derive(Debug, Parser)]
#[command(name = "pyreplay")]
#[command(about = "Python Execution Replay - record an instrumented Python run and step through it")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, env = "PYREPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to a daily-rotated file under the temp directory
    #[arg(long)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the static analysis of a Python file
    Analyze {
        /// Python source file
        file: PathBuf,
    },
    /// Record a trace event log against a workspace and replay it
    Replay {
        /// JSON-lines trace event log
        #[arg(long)]
        events: PathBuf,

        /// Directory holding the Python sources of the run
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Entry script, relative to the workspace
        #[arg(long, default_value = "main.py")]
        main: String,

        /// Only show this step of the navigation trace
        #[arg(long)]
        step: Option<usize>,

        /// Write the repaired trace as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the recording step limit
        #[arg(long)]
        max_steps: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    pyreplay_common::logging::init_logging("pyreplay", cli.log_file)?;

    let config = match &cli.config {
        Some(path) => pyreplay_engine::EngineConfig::load(path)?,
        None => pyreplay_engine::EngineConfig::default(),
    };

    match &cli.command {
        Commands::Analyze { file } => {
            tracing::info!("Analyzing {}", file.display());
            cmd::analyze_file(file)?;
        }
        Commands::Replay { events, workspace, main, step, output, max_steps } => {
            tracing::info!("Replaying {} against {}", events.display(), workspace.display());
            let options = cmd::ReplayOptions {
                events: events.clone(),
                workspace: workspace.clone(),
                main: main.clone(),
                step: *step,
                output: output.clone(),
                max_steps: *max_steps,
            };
            cmd::replay_events(config, options).await?;
        }
    }

    Ok(())
}
