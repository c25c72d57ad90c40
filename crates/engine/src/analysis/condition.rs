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

//! Simple numeric conditions of `if`/`elif`/`while` headers.
//!
//! Only `name OP number` comparisons (either operand order) and `and`/`or`
//! combinations of them are modeled. Anything else is not represented at all, and an
//! unrepresented or undecidable condition never marks a line as phantom.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use pyreplay_common::types::Variables;

/// Comparison operator of a simple condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
}

impl CompareOp {
    /// Operator with swapped operands (`3 < x` becomes `x > 3`)
    pub fn flipped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtE => Self::GtE,
            Self::Gt => Self::Lt,
            Self::GtE => Self::LtE,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::NotEq => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::LtE => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::GtE => lhs >= rhs,
        }
    }
}

/// A condition the recorder can evaluate against a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `name OP value`
    Compare {
        /// Variable on the left-hand side
        name: String,
        /// Operator
        op: CompareOp,
        /// Numeric literal on the right-hand side
        value: f64,
    },
    /// All sub-conditions hold
    And(Vec<Condition>),
    /// Any sub-condition holds
    Or(Vec<Condition>),
}

impl Condition {
    /// Evaluate against a snapshot; `None` when a name is missing or not numeric
    pub fn evaluate(&self, variables: &Variables) -> Option<bool> {
        match self {
            Self::Compare { name, op, value } => {
                let lhs = variables.get(name)?.as_f64()?;
                Some(op.apply(lhs, *value))
            }
            Self::And(parts) => {
                let mut result = true;
                for part in parts {
                    result &= part.evaluate(variables)?;
                }
                Some(result)
            }
            Self::Or(parts) => {
                let mut result = false;
                for part in parts {
                    result |= part.evaluate(variables)?;
                }
                Some(result)
            }
        }
    }

    /// Variable names the condition reads
    pub fn names(&self) -> HashSet<String> {
        match self {
            Self::Compare { name, .. } => HashSet::from([name.clone()]),
            Self::And(parts) | Self::Or(parts) => parts.iter().flat_map(Self::names).collect(),
        }
    }

    /// Whether the condition is known to be false for the snapshot
    pub fn is_false_for(&self, variables: &Variables) -> bool {
        self.evaluate(variables) == Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyreplay_common::types::VarValue;

    fn vars(pairs: &[(&str, VarValue)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_simple_comparison() {
        let cond = Condition::Compare { name: "x".into(), op: CompareOp::Gt, value: 3.0 };
        assert_eq!(cond.evaluate(&vars(&[("x", VarValue::Int(5))])), Some(true));
        assert!(cond.is_false_for(&vars(&[("x", VarValue::Int(1))])));
        assert_eq!(cond.evaluate(&vars(&[("x", VarValue::Str("5".into()))])), None);
        assert_eq!(cond.evaluate(&Variables::new()), None);
    }

    #[test]
    fn test_boolean_combinations() {
        let lo = Condition::Compare { name: "i".into(), op: CompareOp::GtE, value: 0.0 };
        let hi = Condition::Compare { name: "i".into(), op: CompareOp::Lt, value: 10.0 };
        let both = Condition::And(vec![lo.clone(), hi.clone()]);
        let either = Condition::Or(vec![lo, hi]);
        let snapshot = vars(&[("i", VarValue::Int(12))]);
        assert!(both.is_false_for(&snapshot));
        assert_eq!(either.evaluate(&snapshot), Some(true));
        assert_eq!(both.names(), HashSet::from(["i".to_string()]));
    }

    #[test]
    fn test_flipped_operators() {
        assert_eq!(CompareOp::Lt.flipped(), CompareOp::Gt);
        assert_eq!(CompareOp::GtE.flipped(), CompareOp::LtE);
        assert_eq!(CompareOp::Eq.flipped(), CompareOp::Eq);
    }
}
