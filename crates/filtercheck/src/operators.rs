//! Operators available in filter comparisons.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::FieldType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "content")]
pub enum Operator {
    Relational(RelationalOperator),
    String(StringOperator),
    Multi(MultiOperator),
}

impl Operator {
    /// Whether the operator can be applied to values of type `ty`.
    pub fn allowed_on(&self, ty: FieldType) -> bool {
        match (self, ty) {
            (Operator::Relational(_), FieldType::Int) => true,
            (Operator::Relational(op), FieldType::Bool | FieldType::Str) => op.is_equality(),
            (Operator::String(_) | Operator::Multi(_), FieldType::Str) => true,
            (Operator::String(_) | Operator::Multi(_), FieldType::Int | FieldType::Bool) => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operator::Relational(op) => write!(f, "{op}"),
            Operator::String(op) => write!(f, "{op}"),
            Operator::Multi(op) => write!(f, "{op}"),
        }
    }
}

/// Operators intended to be used on strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "content")]
pub enum StringOperator {
    StartsWith,
    EndsWith,
}

impl StringOperator {
    pub fn apply<T: AsRef<str>>(&self, first: T, second: T) -> bool {
        match self {
            StringOperator::StartsWith => first.as_ref().starts_with(second.as_ref()),
            StringOperator::EndsWith => first.as_ref().ends_with(second.as_ref()),
        }
    }
}

impl fmt::Display for StringOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StringOperator::StartsWith => write!(f, "startswith"),
            StringOperator::EndsWith => write!(f, "endswith"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "content")]
pub enum RelationalOperator {
    Equals,
    NotEquals,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
}

impl RelationalOperator {
    pub fn apply<T: PartialEq + PartialOrd>(&self, first: T, second: T) -> bool {
        match self {
            RelationalOperator::Equals => first == second,
            RelationalOperator::NotEquals => first != second,
            RelationalOperator::Greater => first > second,
            RelationalOperator::Less => first < second,
            RelationalOperator::GreaterEqual => first >= second,
            RelationalOperator::LessEqual => first <= second,
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            RelationalOperator::Equals | RelationalOperator::NotEquals
        )
    }
}

impl fmt::Display for RelationalOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = match self {
            RelationalOperator::Equals => "=",
            RelationalOperator::NotEquals => "!=",
            RelationalOperator::Greater => ">",
            RelationalOperator::Less => "<",
            RelationalOperator::GreaterEqual => ">=",
            RelationalOperator::LessEqual => "<=",
        };
        f.write_str(op)
    }
}

/// Operators checking for a part of a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "content")]
pub enum MultiOperator {
    Contains,
}

impl fmt::Display for MultiOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MultiOperator::Contains => write!(f, "contains"),
        }
    }
}
