//! filtercheck compiles filter expressions over named fields into closures.
//!
//! An expression is parsed into a [Condition] tree, validated against a [FieldCatalog]
//! (every field must exist, take the right kind of index and accept the operator and
//! the literal), and compiled once into a [Filter]. Evaluation then asks a
//! [FieldSource] for field values by [FieldId], so no name lookup happens per event.
//!
//! ```
//! use std::borrow::Cow;
//! use filtercheck::{Filter, FieldCatalog, FieldId, FieldInfo, FieldSource, FieldType, FieldValue, IndexKind};
//!
//! struct Catalog;
//!
//! const NAME: FieldInfo = FieldInfo::new("proc.name", FieldType::Str, IndexKind::None, "");
//!
//! impl FieldCatalog for Catalog {
//!     fn lookup(&self, name: &str) -> Option<(FieldId, &FieldInfo)> {
//!         (name == "proc.name").then_some((FieldId(0), &NAME))
//!     }
//! }
//!
//! struct Process(&'static str);
//!
//! impl FieldSource for Process {
//!     fn resolve(&self, _field: FieldId, _index: Option<u32>) -> Option<FieldValue<'_>> {
//!         Some(FieldValue::Str(Cow::Borrowed(self.0)))
//!     }
//! }
//!
//! let filter = Filter::compile(r#"proc.name in (sh, bash) and not proc.name = "zsh""#, &Catalog).unwrap();
//! assert!(filter.matches(&Process("bash")));
//! assert!(!filter.matches(&Process("python")));
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

mod compiler;
mod error;
mod operators;
mod ruleset;
mod value;

pub mod dsl;

pub use compiler::*;
pub use error::FilterError;
pub use operators::*;
pub use ruleset::*;
pub use value::*;

use crate::dsl::DslError;

/// A named condition with the fields to report when it matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub condition: Condition,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

/// Filter expression before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "content")]
pub enum Condition {
    And {
        l: Box<Condition>,
        r: Box<Condition>,
    },
    Or {
        l: Box<Condition>,
        r: Box<Condition>,
    },
    Not {
        inner: Box<Condition>,
    },
    /// `field op value`
    Base {
        field: FieldRef,
        op: Operator,
        value: String,
    },
    /// `field in (value, ...)`
    In { field: FieldRef, values: Vec<String> },
    /// `field exists`
    Exists { field: FieldRef },
}

/// Reference to a field: a dotted name with an optional index, like `proc.aname[2]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub name: String,
    pub index: Option<u32>,
}

impl FieldRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{index}]", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for FieldRef {
    type Err = DslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DslError::Field(s.to_string());
        let (name, index) = match s.split_once('[') {
            None => (s, None),
            Some((name, rest)) => {
                let index = rest
                    .strip_suffix(']')
                    .and_then(|index| index.parse::<u32>().ok())
                    .ok_or_else(invalid)?;
                (name, Some(index))
            }
        };
        let valid_segment = |segment: &str| {
            segment
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !name.split('.').all(valid_segment) {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            index,
        })
    }
}
