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

//! Analyze command - print what the static analyzer knows about a file

use std::{fmt::Write as _, fs, path::Path};

use eyre::{Result, WrapErr};
use itertools::Itertools;
use pyreplay_engine::{FileAnalysis, LineAnalyzer, PythonAnalyzer, StatementKind};

/// Analyze one Python file and print the result
pub fn analyze_file(path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let filename = path.display().to_string();
    let analysis = PythonAnalyzer::new().analyze(&filename, &source)?;
    print!("{}", render_analysis(&analysis));
    Ok(())
}

fn names<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    let joined = names.into_iter().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

/// Human-readable report of a file analysis
pub fn render_analysis(analysis: &FileAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", analysis.filename);

    for (line, info) in &analysis.lines {
        let text = analysis.source_lines.get(line - 1).map(|l| l.trim()).unwrap_or_default();
        let _ = writeln!(out, "  L{line:<4} {text}");
        let _ = writeln!(
            out,
            "        assigned: {} | referenced: {} | calls: {}",
            names(&info.assigned),
            names(&info.referenced),
            names(&info.function_calls)
        );
        if !info.subscripts.is_empty() {
            let labels = info.subscripts.iter().map(|s| s.label()).join(", ");
            let _ = writeln!(out, "        subscripts: {labels}");
        }
        if let Some(comp) = analysis.comprehensions.get(line) {
            let _ = writeln!(out, "        comprehension targets: {}", names(&comp.comp_targets));
        }
        let control = analysis.control.get(line).filter(|c| c.kind != StatementKind::Other);
        if let Some(control) = control {
            let _ = write!(out, "        control: {:?}", control.kind);
            if let Some(guard) = control.guard {
                let _ = write!(out, " (guarded by L{guard})");
            }
            if let Some((first, last)) = control.dead_range {
                let _ = write!(out, " (unreachable after: L{first}-L{last})");
            }
            let _ = writeln!(out);
        }
    }

    for (function, locals) in &analysis.function_locals {
        let _ = writeln!(out, "  def {function}: locals [{}]", locals.iter().join(", "));
    }
    out
}
