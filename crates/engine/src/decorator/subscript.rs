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

//! Evaluation of `container[key]` display targets.

use pyreplay_common::types::VarValue;

use crate::{analysis::SubscriptKey, decorator::PyLiteral};

/// Evaluate `container[key]`; `lookup` resolves keys that are variable names.
///
/// Any failure (unparseable repr, missing key, index out of range) yields `None`.
pub fn evaluate_subscript<'a, F>(
    container: &VarValue,
    key: &SubscriptKey,
    lookup: F,
) -> Option<VarValue>
where
    F: Fn(&str) -> Option<&'a VarValue>,
{
    let container = match container {
        VarValue::Str(s) => PyLiteral::Str(s.clone()),
        VarValue::Repr(repr) => PyLiteral::parse(repr)?,
        _ => return None,
    };

    let found = match key {
        SubscriptKey::Int(i) => container.index(*i)?,
        SubscriptKey::Str(s) => container.lookup(&PyLiteral::Str(s.clone()))?,
        SubscriptKey::Name(name) => match lookup(name)? {
            VarValue::Int(i) => container.index(*i)?,
            VarValue::Str(s) => container.lookup(&PyLiteral::Str(s.clone()))?,
            VarValue::Bool(b) => container.lookup(&PyLiteral::Bool(*b))?,
            VarValue::Float(f) => container.lookup(&PyLiteral::Float(*f))?,
            VarValue::None => container.lookup(&PyLiteral::None)?,
            VarValue::Repr(repr) => container.lookup(&PyLiteral::parse(repr)?)?,
        },
    };
    Some(found.into_value())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<&'static VarValue> {
        None
    }

    #[test]
    fn test_dict_and_list_subscripts() {
        let beats = VarValue::Repr("{1: 'b'}".into());
        assert_eq!(
            evaluate_subscript(&beats, &SubscriptKey::Int(1), no_vars),
            Some(VarValue::Str("b".into()))
        );

        let matrix = VarValue::Repr("[[1, 2], [3, 4]]".into());
        assert_eq!(
            evaluate_subscript(&matrix, &SubscriptKey::Int(-1), no_vars),
            Some(VarValue::Repr("[3, 4]".into()))
        );
        assert_eq!(evaluate_subscript(&matrix, &SubscriptKey::Int(5), no_vars), None);
    }

    #[test]
    fn test_name_keys() {
        let counts = VarValue::Repr("{'the': 3, 'cat': 1}".into());
        let word = VarValue::Str("cat".into());
        let lookup = |name: &str| (name == "word").then_some(&word);
        assert_eq!(
            evaluate_subscript(&counts, &SubscriptKey::Name("word".into()), lookup),
            Some(VarValue::Int(1))
        );
        let missing = SubscriptKey::Name("missing".into());
        assert_eq!(evaluate_subscript(&counts, &missing, lookup), None);
    }

    #[test]
    fn test_plain_strings_and_scalars() {
        let text = VarValue::Str("abc".into());
        assert_eq!(
            evaluate_subscript(&text, &SubscriptKey::Int(0), no_vars),
            Some(VarValue::Str("a".into()))
        );
        assert_eq!(evaluate_subscript(&VarValue::Int(3), &SubscriptKey::Int(0), no_vars), None);
        let opaque = VarValue::Repr("<object at 0x1>".into());
        assert_eq!(evaluate_subscript(&opaque, &SubscriptKey::Int(0), no_vars), None);
    }
}
