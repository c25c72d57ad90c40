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

//! Workspace-wide analysis maps keyed by [`LineKey`].

use std::collections::HashMap;

use pyreplay_common::types::{LineKey, MAIN_FILE};
use tracing::debug;

use crate::analysis::{
    ComprehensionInfo, Condition, FileAnalysis, LineAnalyzer, LineControl, LineInfo,
};

/// Classifies source lines for phantom-trace detection
pub trait LineClassifier {
    /// Control-flow metadata of a line
    fn classify(&self, key: &LineKey) -> Option<&LineControl>;

    /// Condition of the `if`/`elif`/`while` header whose body starts at `key`
    fn guarding_condition(&self, key: &LineKey) -> Option<&Condition> {
        let guard = self.classify(key)?.guard?;
        self.classify(&LineKey::new(key.filename.clone(), guard))?.condition.as_ref()
    }

    /// Whether `key` is unreachable once the block exit at `exit` has run
    fn is_dead_after(&self, exit: &LineKey, key: &LineKey) -> bool {
        if exit.filename != key.filename {
            return false;
        }
        self.classify(exit)
            .filter(|control| control.kind.exits_block())
            .and_then(|control| control.dead_range)
            .is_some_and(|(first, last)| (first..=last).contains(&key.line))
    }
}

/// Analysis results of every file of a workspace
#[derive(Debug, Clone, Default)]
pub struct AnalysisMaps {
    files: HashMap<String, FileAnalysis>,
}

impl AnalysisMaps {
    /// Analyze every `.py` file; files that fail to parse are left out.
    pub fn build<I>(analyzer: &dyn LineAnalyzer, files: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut maps = Self::default();
        for (filename, source) in files {
            if !filename.ends_with(".py") {
                continue;
            }
            match analyzer.analyze(&filename, &source) {
                Ok(analysis) => {
                    maps.files.insert(filename, analysis);
                }
                Err(e) => debug!("skipping {filename}: {e}"),
            }
        }
        debug!(files = maps.files.len(), "built analysis maps");
        maps
    }

    /// Insert or replace the analysis of one file
    pub fn insert(&mut self, analysis: FileAnalysis) {
        self.files.insert(analysis.filename.clone(), analysis);
    }

    /// Analysis of a single file
    pub fn file(&self, filename: &str) -> Option<&FileAnalysis> {
        self.files.get(filename)
    }

    /// Whether no file could be analyzed
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Names touched by a line
    pub fn line_info(&self, key: &LineKey) -> Option<&LineInfo> {
        self.file(&key.filename)?.lines.get(&key.line)
    }

    /// Comprehension facts of a line
    pub fn comprehension(&self, key: &LineKey) -> Option<&ComprehensionInfo> {
        self.file(&key.filename)?.comprehensions.get(&key.line)
    }

    /// Enclosing function of a line; `None` at module level
    pub fn function_at(&self, key: &LineKey) -> Option<&str> {
        self.file(&key.filename)?.line_functions.get(&key.line).map(String::as_str)
    }

    /// Ordered local names of a function, preferring the given file
    pub fn function_locals(&self, filename: &str, function: &str) -> Option<&[String]> {
        self.file(filename)
            .and_then(|analysis| analysis.function_locals.get(function))
            .or_else(|| self.files.values().find_map(|a| a.function_locals.get(function)))
            .map(Vec::as_slice)
    }

    /// Whether `name` is a function defined with `def` in the file
    pub fn is_defined_function(&self, filename: &str, name: &str) -> bool {
        self.file(filename).is_some_and(|analysis| analysis.defined_functions.contains(name))
    }

    /// Source text of a line
    pub fn source_line(&self, key: &LineKey) -> Option<&str> {
        self.file(&key.filename)?.source_lines.get(key.line.checked_sub(1)?).map(String::as_str)
    }

    /// Analysis of the main file
    pub fn main_file(&self) -> Option<&FileAnalysis> {
        self.file(MAIN_FILE)
    }
}

impl LineClassifier for AnalysisMaps {
    fn classify(&self, key: &LineKey) -> Option<&LineControl> {
        self.file(&key.filename)?.control.get(&key.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PythonAnalyzer;

    fn build(files: &[(&str, &str)]) -> AnalysisMaps {
        AnalysisMaps::build(
            &PythonAnalyzer::new(),
            files.iter().map(|(name, src)| (name.to_string(), src.to_string())),
        )
    }

    #[test]
    fn test_build_skips_broken_and_foreign_files() {
        let maps = build(&[
            ("/main.py", "x = 1\n"),
            ("/broken.py", "def (:\n"),
            ("/notes.txt", "x = 1\n"),
        ]);
        assert!(maps.file("/main.py").is_some());
        assert!(maps.file("/broken.py").is_none());
        assert!(maps.file("/notes.txt").is_none());
        assert_eq!(maps.source_line(&LineKey::new("/main.py", 1)), Some("x = 1"));
        assert_eq!(maps.source_line(&LineKey::new("/main.py", 0)), None);
    }

    #[test]
    fn test_classifier_queries() {
        let maps = build(&[(
            "/main.py",
            "x = 5\nif x > 10:\n    y = 1\nwhile True:\n    break\n    z = 2\n",
        )]);
        let guarded = LineKey::new("/main.py", 3);
        assert!(maps.guarding_condition(&guarded).is_some());

        let exit = LineKey::new("/main.py", 5);
        assert!(maps.is_dead_after(&exit, &LineKey::new("/main.py", 6)));
        assert!(!maps.is_dead_after(&exit, &LineKey::new("/main.py", 3)));
        assert!(!maps.is_dead_after(&exit, &LineKey::new("/other.py", 6)));
    }

    #[test]
    fn test_function_locals_lookup_falls_back_to_other_files() {
        let maps = build(&[
            ("/main.py", "import helpers\n"),
            ("/helpers.py", "def double(v):\n    out = v * 2\n    return out\n"),
        ]);
        let locals = ["v".to_string(), "out".to_string()];
        assert_eq!(maps.function_locals("/main.py", "double"), Some(&locals[..]));
        assert_eq!(maps.function_at(&LineKey::new("/helpers.py", 2)), Some("double"));
        assert_eq!(maps.function_at(&LineKey::new("/main.py", 1)), None);
    }
}
