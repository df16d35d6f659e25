//! Field descriptions and the values fields resolve to.

use std::{borrow::Cow, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Bool,
    Str,
}

/// Whether a field accepts an index, as in `proc.aname[2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    None,
    /// Without an index the field is multi-valued.
    Optional,
    Required,
}

/// Opaque identifier of a field in a [FieldCatalog].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub ty: FieldType,
    pub index: IndexKind,
    pub description: &'static str,
}

impl FieldInfo {
    pub const fn new(
        name: &'static str,
        ty: FieldType,
        index: IndexKind,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            ty,
            index,
            description,
        }
    }
}

/// Value of a field for a given event. A multi-valued field resolves to a [FieldValue::List].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Int(i64),
    Bool(bool),
    Str(Cow<'a, str>),
    List(Vec<FieldValue<'a>>),
}

impl FieldValue<'_> {
    pub fn into_owned(self) -> FieldValue<'static> {
        match self {
            FieldValue::Int(value) => FieldValue::Int(value),
            FieldValue::Bool(value) => FieldValue::Bool(value),
            FieldValue::Str(value) => FieldValue::Str(Cow::Owned(value.into_owned())),
            FieldValue::List(values) => {
                FieldValue::List(values.into_iter().map(FieldValue::into_owned).collect())
            }
        }
    }
}

impl From<i64> for FieldValue<'_> {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue<'_> {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(value: &'a str) -> Self {
        FieldValue::Str(Cow::Borrowed(value))
    }
}

impl From<String> for FieldValue<'_> {
    fn from(value: String) -> Self {
        FieldValue::Str(Cow::Owned(value))
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Str(value) => f.write_str(value),
            FieldValue::List(values) => {
                f.write_str("(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Lookup of field names, used when compiling filters.
pub trait FieldCatalog {
    fn lookup(&self, name: &str) -> Option<(FieldId, &FieldInfo)>;
}

/// Resolution of field values, used when evaluating compiled filters.
///
/// `None` means the field has no value for this event: every comparison on it is false.
pub trait FieldSource {
    fn resolve(&self, field: FieldId, index: Option<u32>) -> Option<FieldValue<'_>>;
}
