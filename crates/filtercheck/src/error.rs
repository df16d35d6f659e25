use thiserror::Error;

use crate::{FieldType, Operator, dsl::DslError};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Dsl(#[from] DslError),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("field {0} does not take an index")]
    UnexpectedIndex(String),
    #[error("field {0} requires an index")]
    MissingIndex(String),
    #[error("operator {op} not allowed on {ty:?} field {field}")]
    OperatorNotAllowed {
        field: String,
        op: Operator,
        ty: FieldType,
    },
    #[error("'{value}' is not a valid {ty:?} value for field {field}")]
    InvalidValue {
        field: String,
        value: String,
        ty: FieldType,
    },
    #[error("rule {name}: {error}")]
    Rule {
        name: String,
        #[source]
        error: Box<FilterError>,
    },
}
