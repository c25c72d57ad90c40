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

//! Parser for the Python reprs the interpreter serializes containers into.

use std::{fmt, iter::Peekable, str::Chars};

use pyreplay_common::types::{format_float, quote_python_str, VarValue};

/// A parsed Python literal
#[derive(Debug, Clone, PartialEq)]
pub enum PyLiteral {
    /// `int`
    Int(i64),
    /// `float`
    Float(f64),
    /// `str`
    Str(String),
    /// `bool`
    Bool(bool),
    /// `None`
    None,
    /// `list`
    List(Vec<PyLiteral>),
    /// `tuple`
    Tuple(Vec<PyLiteral>),
    /// `dict`, in insertion order
    Dict(Vec<(PyLiteral, PyLiteral)>),
}

impl PyLiteral {
    /// Parse a complete repr; trailing garbage is an error
    pub fn parse(text: &str) -> Option<Self> {
        let mut parser = Parser { chars: text.trim().chars().peekable() };
        let value = parser.value()?;
        parser.skip_ws();
        parser.chars.peek().is_none().then_some(value)
    }

    /// Index into a list, tuple or string; negative indices count from the end
    pub fn index(&self, index: i64) -> Option<Self> {
        let resolve = |len: usize| -> Option<usize> {
            let idx = if index < 0 { len as i64 + index } else { index };
            (0..len as i64).contains(&idx).then_some(idx as usize)
        };
        match self {
            Self::List(items) | Self::Tuple(items) => items.get(resolve(items.len())?).cloned(),
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                chars.get(resolve(chars.len())?).map(|c| Self::Str(c.to_string()))
            }
            Self::Dict(_) => self.lookup(&Self::Int(index)),
            _ => None,
        }
    }

    /// Look up a dict key
    pub fn lookup(&self, key: &Self) -> Option<Self> {
        let Self::Dict(entries) = self else {
            return None;
        };
        entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    /// Convert to the value model; composites become reprs
    pub fn into_value(self) -> VarValue {
        match self {
            Self::Int(i) => VarValue::Int(i),
            Self::Float(f) => VarValue::Float(f),
            Self::Str(s) => VarValue::Str(s),
            Self::Bool(b) => VarValue::Bool(b),
            Self::None => VarValue::None,
            other => VarValue::Repr(other.to_string()),
        }
    }
}

impl fmt::Display for PyLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(items: &[PyLiteral]) -> String {
            items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        }
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Str(s) => f.write_str(&quote_python_str(s)),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::None => f.write_str("None"),
            Self::List(items) => write!(f, "[{}]", join(items)),
            Self::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Self::Tuple(items) => write!(f, "({})", join(items)),
            Self::Dict(entries) => {
                let body: Vec<String> = entries.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", body.join(", "))
            }
        }
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<PyLiteral> {
        self.skip_ws();
        match *self.chars.peek()? {
            '[' => {
                self.chars.next();
                self.sequence(']').map(PyLiteral::List)
            }
            '(' => {
                self.chars.next();
                self.sequence(')').map(PyLiteral::Tuple)
            }
            '{' => {
                self.chars.next();
                self.dict()
            }
            quote @ ('\'' | '"') => {
                self.chars.next();
                self.string(quote).map(PyLiteral::Str)
            }
            c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() => self.word(),
            _ => None,
        }
    }

    fn sequence(&mut self, close: char) -> Option<Vec<PyLiteral>> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Some(items);
            }
            items.push(self.value()?);
            if !self.eat(',') {
                return self.eat(close).then_some(items);
            }
        }
    }

    fn dict(&mut self) -> Option<PyLiteral> {
        let mut entries = Vec::new();
        loop {
            if self.eat('}') {
                return Some(PyLiteral::Dict(entries));
            }
            let key = self.value()?;
            if !self.eat(':') {
                return None;
            }
            entries.push((key, self.value()?));
            if !self.eat(',') {
                return self.eat('}').then_some(PyLiteral::Dict(entries));
            }
        }
    }

    fn string(&mut self, quote: char) -> Option<String> {
        let mut out = String::new();
        loop {
            match self.chars.next()? {
                c if c == quote => return Some(out),
                '\\' => out.push(match self.chars.next()? {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                }),
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<PyLiteral> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            let exponent_sign = (c == '-' || c == '+') && text.ends_with(['e', 'E']);
            if c.is_ascii_alphanumeric() || c == '.' || exponent_sign || text.is_empty() {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match text.as_str() {
            "inf" | "+inf" => return Some(PyLiteral::Float(f64::INFINITY)),
            "-inf" => return Some(PyLiteral::Float(f64::NEG_INFINITY)),
            _ => {}
        }
        if let Ok(i) = text.parse::<i64>() {
            return Some(PyLiteral::Int(i));
        }
        text.parse::<f64>().ok().filter(|f| f.is_finite()).map(PyLiteral::Float)
    }

    fn word(&mut self) -> Option<PyLiteral> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match word.as_str() {
            "True" => Some(PyLiteral::Bool(true)),
            "False" => Some(PyLiteral::Bool(false)),
            "None" => Some(PyLiteral::None),
            "inf" => Some(PyLiteral::Float(f64::INFINITY)),
            "nan" => Some(PyLiteral::Float(f64::NAN)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_containers() {
        let parsed = PyLiteral::parse("{'a': [1, -2.5, None], 2: ('x',), \"q\": True}").unwrap();
        let PyLiteral::Dict(entries) = &parsed else { panic!("expected dict") };
        assert_eq!(entries.len(), 3);
        assert_eq!(
            parsed.lookup(&PyLiteral::Str("a".into())),
            Some(PyLiteral::List(vec![PyLiteral::Int(1), PyLiteral::Float(-2.5), PyLiteral::None]))
        );
        assert_eq!(parsed.to_string(), "{'a': [1, -2.5, None], 2: ('x',), 'q': True}");
    }

    #[test]
    fn test_indexing() {
        let list = PyLiteral::parse("[10, 20, 30]").unwrap();
        assert_eq!(list.index(0), Some(PyLiteral::Int(10)));
        assert_eq!(list.index(-1), Some(PyLiteral::Int(30)));
        assert_eq!(list.index(3), None);
        assert_eq!(list.index(-4), None);

        let text = PyLiteral::parse("'héllo'").unwrap();
        assert_eq!(text.index(1), Some(PyLiteral::Str("é".into())));

        let dict = PyLiteral::parse("{1: 'a'}").unwrap();
        assert_eq!(dict.index(1), Some(PyLiteral::Str("a".into())));
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(PyLiteral::parse("[1, 2"), None);
        assert_eq!(PyLiteral::parse("{1 2}"), None);
        assert_eq!(PyLiteral::parse("<function f at 0x1>"), None);
        assert_eq!(PyLiteral::parse("[1] extra"), None);
        assert_eq!(PyLiteral::parse("1e5"), Some(PyLiteral::Float(100000.0)));
    }
}
