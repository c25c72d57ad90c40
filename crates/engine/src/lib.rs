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

//! pyreplay engine - trace recording, static analysis and replay
//!
//! The [`DebugSession`] ties the pieces together: an [`ExecutionRecorder`] behind the
//! interpreter's trace sink, and a [`ReplayEngine`] that walks the repaired trace.

pub mod analysis;
pub use analysis::*;

pub mod config;
pub use config::*;

pub mod decorator;
pub use decorator::*;

pub mod interpreter;
pub use interpreter::*;

pub mod recorder;
pub use recorder::*;

pub mod replay;
pub use replay::*;

pub mod session;
pub use session::*;

pub mod workspace;
pub use workspace::*;
