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

//! Copying of post-assignment values onto the steps that produced them.
//!
//! The tracer reports a line before it runs, so the value a line assigns only shows
//! up in a later snapshot. The retroactive helpers run while recording; the `fill_*`
//! passes run once when the recording is finalized, in the order they are listed.

use eyre::{eyre, Result};
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use pyreplay_common::types::{
    is_internal_name, local_slot_index, LineKey, Scope, TraceStep, VarValue, MAIN_FILE,
};
use regex::Regex;

use crate::{analysis::AnalysisMaps, decorator::translate_local_slots};

static LITERAL_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=([^=].*)$").expect("valid regex")
});
static INT_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?\d+$").expect("valid regex"));
static FLOAT_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-+]?(\d+\.\d*|\.\d+|\d+)([eE][-+]?\d+)?$").expect("valid regex")
});

fn is_comprehension_target(maps: &AnalysisMaps, key: &LineKey, name: &str) -> bool {
    maps.comprehension(key).is_some_and(|info| info.comp_targets.contains(name))
}

/// Whether a name may be copied between steps
fn is_copyable(maps: Option<&AnalysisMaps>, key: &LineKey, name: &str) -> bool {
    !is_internal_name(name)
        && local_slot_index(name).is_none()
        && !maps.is_some_and(|maps| is_comprehension_target(maps, key, name))
}

/// Statically assigned names that a line step does not carry yet
fn missing_assigned(step: &TraceStep, maps: &AnalysisMaps) -> Vec<String> {
    if step.is_return() {
        return Vec::new();
    }
    let key = step.key();
    maps.line_info(&key)
        .map(|info| {
            info.assigned
                .iter()
                .filter(|name| !step.variables.contains_key(name.as_str()))
                .filter(|name| is_copyable(Some(maps), &key, name))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn same_frame(a: &TraceStep, b: &TraceStep) -> bool {
    a.filename == b.filename && a.scope == b.scope
}

/// Copy values of the last step onto the nearest earlier step that assigns them.
///
/// Looks back at most `lookback` steps, only at line events of the same file and
/// scope, and never past an earlier occurrence of the last step's line.
pub(crate) fn retro_assigned(steps: &mut [TraceStep], maps: &AnalysisMaps, lookback: usize) {
    let Some((last, earlier)) = steps.split_last_mut() else {
        return;
    };
    let last_key = last.key();

    for (name, value) in &last.variables {
        if !is_copyable(Some(maps), &last_key, name) {
            continue;
        }
        for prev in earlier.iter_mut().rev().take(lookback) {
            if prev.same_line(last) {
                break;
            }
            if prev.is_return() || !same_frame(prev, last) {
                continue;
            }
            let assigns =
                maps.line_info(&prev.key()).is_some_and(|info| info.assigned.contains(name));
            if assigns {
                prev.variables.insert(name.clone(), value.clone());
                break;
            }
        }
    }
}

/// Copy names first seen in the last step onto a directly preceding collapsed step
pub(crate) fn retro_collapsed(steps: &mut [TraceStep], maps: Option<&AnalysisMaps>) {
    if let [.., prev, last] = steps {
        copy_into_collapsed(prev, last, maps);
    }
}

fn copy_into_collapsed(prev: &mut TraceStep, next: &TraceStep, maps: Option<&AnalysisMaps>) {
    if !prev.is_collapsed() {
        return;
    }
    let key = prev.key();
    for (name, value) in &next.variables {
        if !prev.variables.contains_key(name) && is_copyable(maps, &key, name) {
            prev.variables.insert(name.clone(), value.clone());
        }
    }
}

/// Derive every step's scope from the line-function map.
///
/// Steps that arrived before analysis was published were recorded as global. Files
/// without analysis keep the scope they were recorded with.
pub(crate) fn assign_scopes(steps: &mut [TraceStep], maps: &AnalysisMaps) {
    for step in steps.iter_mut() {
        if maps.file(&step.filename).is_none() {
            continue;
        }
        let key = step.key();
        step.scope = Scope::for_function(maps.function_at(&key));
    }
}

/// Resolve leftover `local_<N>` keys once analysis is known
pub(crate) fn translate_remaining_slots(steps: &mut [TraceStep], maps: &AnalysisMaps) {
    for step in steps.iter_mut() {
        let Some(function) = step.scope.function_name() else {
            continue;
        };
        if let Some(locals) = maps.function_locals(&step.filename, function) {
            step.variables = translate_local_slots(&step.variables, locals);
        }
    }
}

/// Pass 1: missing names of every collapsed step from the step after it
pub(crate) fn fill_collapsed(steps: &mut [TraceStep], maps: Option<&AnalysisMaps>) {
    for i in 1..steps.len() {
        let (head, tail) = steps.split_at_mut(i);
        if let (Some(prev), Some(next)) = (head.last_mut(), tail.first()) {
            copy_into_collapsed(prev, next, maps);
        }
    }
}

/// Pass 2: missing assigned names from the next `window` steps of the same frame
pub(crate) fn fill_from_lookahead(steps: &mut [TraceStep], maps: &AnalysisMaps, window: usize) {
    for i in 0..steps.len() {
        for name in missing_assigned(&steps[i], maps) {
            let found = steps[i + 1..]
                .iter()
                .take(window)
                .filter(|next| same_frame(next, &steps[i]))
                .find_map(|next| next.get(&name))
                .cloned();
            if let Some(value) = found {
                steps[i].variables.insert(name, value);
            }
        }
    }
}

/// Pass 3: still-missing assigned names from anywhere later in the same frame.
///
/// The value is only taken when the nearest earlier value of the name has the same
/// kind, or when the name was never seen before.
pub(crate) fn fill_from_later_steps(steps: &mut [TraceStep], maps: &AnalysisMaps) {
    for i in 0..steps.len() {
        for name in missing_assigned(&steps[i], maps) {
            let step = &steps[i];
            let Some(candidate) = steps[i + 1..]
                .iter()
                .filter(|next| same_frame(next, step))
                .find_map(|next| next.get(&name))
            else {
                continue;
            };
            let placeholder = steps[..i]
                .iter()
                .rev()
                .filter(|prev| same_frame(prev, step))
                .find_map(|prev| prev.get(&name));
            if placeholder.map_or(true, |p| p.kind() == candidate.kind()) {
                let value = candidate.clone();
                steps[i].variables.insert(name, value);
            }
        }
    }
}

/// Pass 4: the assignment of the very last line is never observed by the tracer, so
/// a simple literal assignment is read from the source instead.
pub(crate) fn fill_final_literal(
    steps: &mut [TraceStep],
    maps: Option<&AnalysisMaps>,
    main_source: &str,
) -> Result<()> {
    let Some(idx) = steps.iter().rposition(|step| !step.is_return()) else {
        return Ok(());
    };
    let key = steps[idx].key();
    let line = maps
        .and_then(|maps| maps.source_line(&key))
        .or_else(|| {
            (key.filename == MAIN_FILE)
                .then(|| main_source.lines().nth(key.line.checked_sub(1)?))
                .flatten()
        })
        .ok_or_else(|| eyre!("no source text for {key}"))?;

    if let Some((name, value)) = parse_literal_assignment(line) {
        steps[idx].variables.insert(name, value);
    }
    Ok(())
}

/// Parse `name = <literal>` where the literal is an int, float, string, bool or None
pub fn parse_literal_assignment(line: &str) -> Option<(String, VarValue)> {
    let captures = LITERAL_ASSIGNMENT.captures(line)?;
    let name = captures.get(1)?.as_str().to_string();
    let value = parse_literal(captures.get(2)?.as_str().trim())?;
    Some((name, value))
}

fn parse_literal(text: &str) -> Option<VarValue> {
    match text {
        "None" => return Some(VarValue::None),
        "True" => return Some(VarValue::Bool(true)),
        "False" => return Some(VarValue::Bool(false)),
        _ => {}
    }
    if INT_LITERAL.is_match(text) {
        return text.parse().ok().map(VarValue::Int);
    }
    if FLOAT_LITERAL.is_match(text) {
        return text.parse().ok().map(VarValue::Float);
    }
    for quote in ['\'', '"'] {
        let inner = text.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote));
        if let Some(inner) = inner.filter(|inner| !inner.contains(quote) && !inner.contains('\\')) {
            return Some(VarValue::Str(inner.to_string()));
        }
    }
    None
}

/// Names a step should show after the passes, for diagnostics
pub(crate) fn unresolved_assigned(steps: &[TraceStep], maps: &AnalysisMaps) -> IndexSet<LineKey> {
    steps
        .iter()
        .filter(|step| !missing_assigned(step, maps).is_empty())
        .map(TraceStep::key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PythonAnalyzer;
    use pyreplay_common::types::{Scope, Variables};

    fn maps(source: &str) -> AnalysisMaps {
        AnalysisMaps::build(&PythonAnalyzer::new(), [("/main.py".to_string(), source.to_string())])
    }

    fn step(line: usize, pairs: &[(&str, VarValue)]) -> TraceStep {
        let vars: Variables = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        TraceStep::new(line, vars)
    }

    #[test]
    fn test_literal_assignments() {
        assert_eq!(parse_literal_assignment("x = 5"), Some(("x".into(), VarValue::Int(5))));
        assert_eq!(parse_literal_assignment("  y=-2.5"), Some(("y".into(), VarValue::Float(-2.5))));
        assert_eq!(
            parse_literal_assignment("s = 'hi'"),
            Some(("s".into(), VarValue::Str("hi".into())))
        );
        assert_eq!(
            parse_literal_assignment("flag = True"),
            Some(("flag".into(), VarValue::Bool(true)))
        );
        assert_eq!(parse_literal_assignment("n = None"), Some(("n".into(), VarValue::None)));
        assert_eq!(parse_literal_assignment("x == 5"), None);
        assert_eq!(parse_literal_assignment("x = y"), None);
        assert_eq!(parse_literal_assignment("x = [1]"), None);
        assert_eq!(parse_literal_assignment("s = 'a' + 'b'"), None);
    }

    #[test]
    fn test_retro_assigned_stops_at_same_line() {
        let maps = maps("for i in range(3):\n    s = i\n");
        let mut steps = vec![
            step(1, &[]),
            step(2, &[("i", VarValue::Int(0))]),
            step(1, &[("i", VarValue::Int(0)), ("s", VarValue::Int(0))]),
        ];
        retro_assigned(&mut steps[..2], &maps, 3);
        assert_eq!(steps[0].get("i"), Some(&VarValue::Int(0)));

        retro_assigned(&mut steps, &maps, 3);
        assert_eq!(steps[1].get("s"), Some(&VarValue::Int(0)));
        // line 1 is the same line as the new step: loop boundary
        assert_eq!(steps[0].get("s"), None);
    }

    #[test]
    fn test_retro_assigned_respects_scope() {
        let maps = maps("def f():\n    x = 1\n    return x\nx = 2\nprint(x)\n");
        let mut steps = vec![
            step(4, &[]),
            step(2, &[]).with_scope(Scope::Function("f".into())),
            step(5, &[("x", VarValue::Int(2))]),
        ];
        retro_assigned(&mut steps, &maps, 3);
        assert_eq!(steps[0].get("x"), Some(&VarValue::Int(2)));
        assert_eq!(steps[1].get("x"), None);
    }

    #[test]
    fn test_lookahead_and_kind_checked_fill() {
        let maps = maps("a = 1\nb = 2\nc = 3\nd = 4\n");
        let mut steps = vec![
            step(1, &[]),
            step(2, &[]),
            step(3, &[("a", VarValue::Int(1))]),
            step(4, &[("a", VarValue::Int(1)), ("b", VarValue::Int(2))]),
        ];
        fill_from_lookahead(&mut steps, &maps, 1);
        assert_eq!(steps[0].get("a"), None);
        assert_eq!(steps[1].get("b"), None);
        fill_from_lookahead(&mut steps, &maps, 5);
        assert_eq!(steps[0].get("a"), Some(&VarValue::Int(1)));
        assert_eq!(steps[1].get("b"), Some(&VarValue::Int(2)));
    }

    #[test]
    fn test_later_fill_requires_matching_kind() {
        let maps = maps("x = 0\nx = 1\ny = 2\nz = 3\nx = 'later'\nprint(x)\n");
        let mut steps = vec![
            step(1, &[]),
            step(2, &[("x", VarValue::Int(0))]),
            step(3, &[]),
            step(4, &[]),
            step(5, &[]),
            step(6, &[("x", VarValue::Str("later".into()))]),
        ];
        fill_from_later_steps(&mut steps, &maps);
        // nothing earlier: taken as is
        assert_eq!(steps[0].get("x"), Some(&VarValue::Int(0)));
        assert_eq!(steps[1].get("x"), Some(&VarValue::Int(0)));
        // earlier placeholder is an int, the only later value a string
        assert_eq!(steps[4].get("x"), None);

        let mut mismatched = vec![
            step(1, &[("x", VarValue::Int(0))]),
            step(2, &[]),
            step(6, &[("x", VarValue::Str("later".into()))]),
        ];
        fill_from_later_steps(&mut mismatched, &maps);
        assert_eq!(mismatched[1].get("x"), None);
    }

    #[test]
    fn test_final_literal_without_analysis() {
        let mut steps = vec![step(1, &[]), step(2, &[("x", VarValue::Int(1))])];
        fill_final_literal(&mut steps, None, "x = 1\nx = 7\n").unwrap();
        assert_eq!(steps[1].get("x"), Some(&VarValue::Int(7)));

        let mut foreign = vec![step(1, &[]).with_filename("/other.py")];
        assert!(fill_final_literal(&mut foreign, None, "x = 1\n").is_err());
    }
}
