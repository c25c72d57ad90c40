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

use std::collections::HashSet;

use pyreplay_common::types::{local_slot_index, Variables};

/// Rename `local_<N>` keys through a function's ordered local names.
///
/// Slots without a known name are stack temporaries and are dropped. A named slot
/// replaces an entry that already carries its name, since inside the function the
/// local shadows a module-level variable of the same name.
pub fn translate_local_slots(variables: &Variables, locals: &[String]) -> Variables {
    let shadowed: HashSet<&str> = variables
        .keys()
        .filter_map(|name| locals.get(local_slot_index(name)?))
        .map(String::as_str)
        .collect();

    let mut out = Variables::with_capacity(variables.len());
    for (name, value) in variables {
        match local_slot_index(name) {
            Some(slot) => {
                if let Some(real) = locals.get(slot) {
                    out.insert(real.clone(), value.clone());
                }
            }
            None if shadowed.contains(name.as_str()) => {}
            None => {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    out
}

/// Whether any key is still a positional local slot
pub fn has_local_slots(variables: &Variables) -> bool {
    variables.keys().any(|name| local_slot_index(name).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyreplay_common::types::VarValue;

    #[test]
    fn test_translate_and_drop_temporaries() {
        let vars: Variables = [
            ("local_0".to_string(), VarValue::Int(1)),
            ("local_1".to_string(), VarValue::Int(2)),
            ("local_7".to_string(), VarValue::Int(9)),
            ("g".to_string(), VarValue::Str("x".into())),
        ]
        .into_iter()
        .collect();
        let locals = vec!["a".to_string(), "total".to_string()];

        let translated = translate_local_slots(&vars, &locals);
        let keys: Vec<&str> = translated.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "total", "g"]);
        assert!(!has_local_slots(&translated));
        assert!(has_local_slots(&vars));
    }

    #[test]
    fn test_slot_shadows_global_of_same_name() {
        let vars: Variables = [
            ("x".to_string(), VarValue::Int(5)),
            ("g".to_string(), VarValue::Int(7)),
            ("local_0".to_string(), VarValue::Int(1)),
        ]
        .into_iter()
        .collect();
        let translated = translate_local_slots(&vars, &["x".to_string()]);
        assert_eq!(translated.len(), 2);
        assert_eq!(translated["x"], VarValue::Int(1));
        assert_eq!(translated["g"], VarValue::Int(7));

        // without a slot for it the global stays visible
        let global_only: Variables = [("x".to_string(), VarValue::Int(5))].into_iter().collect();
        assert_eq!(translate_local_slots(&global_only, &["x".to_string()])["x"], VarValue::Int(5));
    }
}
