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

//! Rendering of resolved variables next to the highlighted line.

mod repr;
pub use repr::*;

mod slots;
pub use slots::*;

mod subscript;
pub use subscript::*;

use pyreplay_common::types::{VarValue, Variables};
use serde::{Deserialize, Serialize};

use crate::config::ReplayConfig;

/// Ellipsis used when a value does not fit
const ELLIPSIS: char = '…';

/// Rendered variable rows for one line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    /// Line the decoration is attached to
    pub line_number: usize,
    /// `name = value` rows
    pub rows: Vec<String>,
    /// Summary of the rows that did not fit, e.g. `… 3 more`
    pub overflow: Option<String>,
}

impl Decoration {
    /// Whether nothing is shown
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.overflow.is_none()
    }
}

/// Width-aware renderer of display variables
#[derive(Debug, Clone, Default)]
pub struct LineDecorator {
    config: ReplayConfig,
}

impl LineDecorator {
    /// Create a decorator with the given layout settings
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Characters available to a decoration placed after `line_text`
    pub fn available_chars(&self, line_text: &str) -> usize {
        let cfg = &self.config;
        if cfg.char_width_px <= 0.0 {
            return cfg.min_chars;
        }
        let used = (line_text.chars().count() + cfg.padding_chars) as f64 * cfg.char_width_px;
        let free = (cfg.editor_width_px - cfg.gutter_px - used) / cfg.char_width_px;
        if free.is_finite() && free > cfg.min_chars as f64 {
            free.floor() as usize
        } else {
            cfg.min_chars
        }
    }

    /// Render up to `max_rows` rows for the given variables
    pub fn decorate(
        &self,
        line_number: usize,
        line_text: &str,
        variables: &Variables,
    ) -> Decoration {
        let available = self.available_chars(line_text);
        let rows = variables
            .iter()
            .take(self.config.max_rows)
            .map(|(name, value)| render_row(name, value, available))
            .collect();
        let hidden = variables.len().saturating_sub(self.config.max_rows);
        let overflow = (hidden > 0).then(|| format!("{ELLIPSIS} {hidden} more"));
        Decoration { line_number, rows, overflow }
    }
}

fn render_row(name: &str, value: &VarValue, available: usize) -> String {
    let prefix = format!("{name} = ");
    let budget = available.saturating_sub(prefix.chars().count()).max(1);
    format!("{prefix}{}", truncate_value(&value.display(), budget))
}

/// Shorten a rendered value to at most `budget` characters.
///
/// Composite values keep their outer brackets so that the kind stays recognizable.
pub fn truncate_value(text: &str, budget: usize) -> String {
    let len = text.chars().count();
    if len <= budget {
        return text.to_string();
    }

    let first = text.chars().next();
    let last = text.chars().last();
    let wrapped = matches!(
        (first, last),
        (Some('['), Some(']')) | (Some('('), Some(')')) | (Some('{'), Some('}'))
    );
    if wrapped && budget >= 3 {
        let inner: String = text.chars().skip(1).take(budget - 3).collect();
        let (open, close) = (first.unwrap_or_default(), last.unwrap_or_default());
        return format!("{open}{inner}{ELLIPSIS}{close}");
    }

    let mut out: String = text.chars().take(budget.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}
