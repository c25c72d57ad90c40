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

//! pyreplay common - data model and shared utilities
//!
//! This crate holds the types exchanged between the trace recorder, the replay
//! engine and the command-line front end, plus the logging setup they share.

/// Trace data model: snapshot values, trace steps and execution traces
pub mod types;

/// Logging setup and utilities for consistent logging across pyreplay components
pub mod logging;

pub use logging::*;
