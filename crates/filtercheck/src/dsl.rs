use lalrpop_util::{ParseError, lalrpop_mod};
use thiserror::Error;

use crate::Condition;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DslError {
    #[error("Empty list is not allowed")]
    EmptyList,
    #[error("Invalid field: {0}")]
    Field(String),
    #[error("Invalid escape sequence: \\{0}")]
    Escape(char),
    #[error("{0}")]
    Syntax(String),
}

lalrpop_mod!(#[allow(clippy::all)] pub grammar); // syntesized by LALRPOP

/// Parse a filter expression.
pub fn parse_condition(input: &str) -> Result<Condition, DslError> {
    grammar::ConditionParser::new()
        .parse(input)
        .map_err(|err| match err {
            ParseError::User { error } => error,
            err => DslError::Syntax(err.to_string()),
        })
}

/// Strip the quotes of a string literal and resolve its escapes.
pub(crate) fn unquote(quoted: &str) -> Result<String, DslError> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(c @ ('\\' | '"' | '\'')) => out.push(c),
            Some(c) => return Err(DslError::Escape(c)),
            None => return Err(DslError::Escape(' ')),
        }
    }
    Ok(out)
}
