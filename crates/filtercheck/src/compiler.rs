use std::fmt;

use crate::{
    Condition, FieldCatalog, FieldId, FieldInfo, FieldRef, FieldSource, FieldType, FieldValue,
    FilterError, IndexKind, MultiOperator, Operator, RelationalOperator, dsl,
};

type Predicate = Box<dyn Fn(&dyn FieldSource) -> bool + Send + Sync>;

/// A literal parsed according to the type of the field it is compared with.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
}

/// A field reference checked against a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledField {
    field: FieldRef,
    id: FieldId,
    ty: FieldType,
}

impl CompiledField {
    /// Parse and validate a field reference like `proc.aexepath[2]`.
    pub fn compile<C: FieldCatalog + ?Sized>(name: &str, catalog: &C) -> Result<Self, FilterError> {
        let field = name.parse::<FieldRef>()?;
        Self::validate(field, catalog)
    }

    fn validate<C: FieldCatalog + ?Sized>(
        field: FieldRef,
        catalog: &C,
    ) -> Result<Self, FilterError> {
        let (id, info) = catalog
            .lookup(&field.name)
            .ok_or_else(|| FilterError::UnknownField(field.name.clone()))?;
        check_index(&field, info)?;
        Ok(Self {
            ty: info.ty,
            id,
            field,
        })
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn index(&self) -> Option<u32> {
        self.field.index
    }

    pub fn ty(&self) -> FieldType {
        self.ty
    }

    /// Resolve the value of the field on a source.
    pub fn resolve<'a>(&self, source: &'a dyn FieldSource) -> Option<FieldValue<'a>> {
        source.resolve(self.id, self.field.index)
    }
}

impl fmt::Display for CompiledField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field)
    }
}

fn check_index(field: &FieldRef, info: &FieldInfo) -> Result<(), FilterError> {
    match (info.index, field.index) {
        (IndexKind::None, Some(_)) => Err(FilterError::UnexpectedIndex(field.to_string())),
        (IndexKind::Required, None) => Err(FilterError::MissingIndex(field.name.clone())),
        _ => Ok(()),
    }
}

fn parse_literal(field: &CompiledField, value: &str) -> Result<Literal, FilterError> {
    let invalid = || FilterError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        ty: field.ty,
    };
    match field.ty {
        FieldType::Int => value.parse().map(Literal::Int).map_err(|_| invalid()),
        FieldType::Bool => match value {
            "true" => Ok(Literal::Bool(true)),
            "false" => Ok(Literal::Bool(false)),
            _ => Err(invalid()),
        },
        FieldType::Str => Ok(Literal::Str(value.to_string())),
    }
}

/// Representation of a condition whose fields, operators and literals have been
/// checked against a catalog.
pub enum ValidatedCondition {
    And {
        l: Box<ValidatedCondition>,
        r: Box<ValidatedCondition>,
    },
    Or {
        l: Box<ValidatedCondition>,
        r: Box<ValidatedCondition>,
    },
    Not {
        inner: Box<ValidatedCondition>,
    },
    Base {
        inner: Predicate,
    },
}

/// Entrypoint to validate a condition against a catalog.
pub fn validate_condition<C: FieldCatalog + ?Sized>(
    condition: Condition,
    catalog: &C,
) -> Result<ValidatedCondition, FilterError> {
    match condition {
        Condition::And { l, r } => {
            let l = validate_condition(*l, catalog)?;
            let r = validate_condition(*r, catalog)?;
            Ok(ValidatedCondition::And {
                l: Box::new(l),
                r: Box::new(r),
            })
        }
        Condition::Or { l, r } => {
            let l = validate_condition(*l, catalog)?;
            let r = validate_condition(*r, catalog)?;
            Ok(ValidatedCondition::Or {
                l: Box::new(l),
                r: Box::new(r),
            })
        }
        Condition::Not { inner } => {
            let inner = validate_condition(*inner, catalog)?;
            Ok(ValidatedCondition::Not {
                inner: Box::new(inner),
            })
        }
        Condition::Base { field, op, value } => {
            let field = CompiledField::validate(field, catalog)?;
            if !op.allowed_on(field.ty) {
                return Err(FilterError::OperatorNotAllowed {
                    field: field.to_string(),
                    op,
                    ty: field.ty,
                });
            }
            let literal = parse_literal(&field, &value)?;
            Ok(ValidatedCondition::Base {
                inner: compare(field, op, literal),
            })
        }
        Condition::In { field, values } => {
            let field = CompiledField::validate(field, catalog)?;
            let literals = values
                .iter()
                .map(|value| parse_literal(&field, value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ValidatedCondition::Base {
                inner: Box::new(move |source: &dyn FieldSource| {
                    field.resolve(source).is_some_and(|value| {
                        any_value(&value, &|v| literals.iter().any(|l| eq(v, l)))
                    })
                }),
            })
        }
        Condition::Exists { field } => {
            let field = CompiledField::validate(field, catalog)?;
            Ok(ValidatedCondition::Base {
                inner: Box::new(move |source: &dyn FieldSource| field.resolve(source).is_some()),
            })
        }
    }
}

/// Build the closure of a single comparison.
///
/// An absent value never matches. On multi-valued fields the comparison matches if any
/// element matches, except `!=` which matches if no element is equal.
fn compare(field: CompiledField, op: Operator, literal: Literal) -> Predicate {
    match op {
        Operator::Relational(RelationalOperator::NotEquals) => {
            Box::new(move |source: &dyn FieldSource| {
                field
                    .resolve(source)
                    .is_some_and(|value| !any_value(&value, &|v| eq(v, &literal)))
            })
        }
        op => Box::new(move |source: &dyn FieldSource| {
            field
                .resolve(source)
                .is_some_and(|value| any_value(&value, &|v| apply(op, v, &literal)))
        }),
    }
}

fn any_value<F: Fn(&FieldValue) -> bool>(value: &FieldValue, check: &F) -> bool {
    match value {
        FieldValue::List(values) => values.iter().any(|value| any_value(value, check)),
        value => check(value),
    }
}

fn eq(value: &FieldValue, literal: &Literal) -> bool {
    apply(
        Operator::Relational(RelationalOperator::Equals),
        value,
        literal,
    )
}

fn apply(op: Operator, value: &FieldValue, literal: &Literal) -> bool {
    match (op, value, literal) {
        (Operator::Relational(op), FieldValue::Int(value), Literal::Int(literal)) => {
            op.apply(value, literal)
        }
        (Operator::Relational(op), FieldValue::Bool(value), Literal::Bool(literal)) => {
            op.apply(value, literal)
        }
        (Operator::Relational(op), FieldValue::Str(value), Literal::Str(literal)) => {
            op.apply(value.as_ref(), literal.as_str())
        }
        (Operator::String(op), FieldValue::Str(value), Literal::Str(literal)) => {
            op.apply(value.as_ref(), literal.as_str())
        }
        (Operator::Multi(MultiOperator::Contains), FieldValue::Str(value), Literal::Str(literal)) => {
            value.contains(literal.as_str())
        }
        _ => false,
    }
}

/// It contains the logic of a condition: a function from a [FieldSource] to a [bool].
pub struct CompiledCondition(Predicate);

impl CompiledCondition {
    pub fn is_match(&self, source: &dyn FieldSource) -> bool {
        (self.0)(source)
    }
}

/// Compiler entrypoint.
///
/// It walks into the tree and recursively generates closures to its leaves returning a
/// single closure encapsulated in a [CompiledCondition].
pub fn compile_condition(c: ValidatedCondition) -> CompiledCondition {
    CompiledCondition(generate_closures(c))
}

fn generate_closures(c: ValidatedCondition) -> Predicate {
    match c {
        ValidatedCondition::And { l, r } => {
            let l = generate_closures(*l);
            let r = generate_closures(*r);
            Box::new(move |x: &dyn FieldSource| (l)(x) && (r)(x))
        }
        ValidatedCondition::Or { l, r } => {
            let l = generate_closures(*l);
            let r = generate_closures(*r);
            Box::new(move |x: &dyn FieldSource| (l)(x) || (r)(x))
        }
        ValidatedCondition::Not { inner } => {
            let c = generate_closures(*inner);
            Box::new(move |x: &dyn FieldSource| !(c)(x))
        }
        ValidatedCondition::Base { inner } => inner,
    }
}

/// A compiled filter expression.
pub struct Filter {
    expression: String,
    condition: CompiledCondition,
}

impl Filter {
    /// Parse, validate and compile an expression.
    pub fn compile<C: FieldCatalog + ?Sized>(expression: &str, catalog: &C) -> Result<Self, FilterError> {
        let condition = dsl::parse_condition(expression)?;
        let condition = compile_condition(validate_condition(condition, catalog)?);
        Ok(Self {
            expression: expression.to_string(),
            condition,
        })
    }

    pub fn matches(&self, source: &dyn FieldSource) -> bool {
        self.condition.is_match(source)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("expression", &self.expression)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, collections::HashMap};

    use super::*;

    const FIELDS: &[FieldInfo] = &[
        FieldInfo::new("proc.pid", FieldType::Int, IndexKind::None, ""),
        FieldInfo::new("proc.name", FieldType::Str, IndexKind::None, ""),
        FieldInfo::new("proc.aname", FieldType::Str, IndexKind::Optional, ""),
        FieldInfo::new("proc.is_leader", FieldType::Bool, IndexKind::None, ""),
        FieldInfo::new("evt.arg", FieldType::Str, IndexKind::Required, ""),
        FieldInfo::new("proc.tty", FieldType::Int, IndexKind::None, ""),
    ];

    struct Catalog;

    impl FieldCatalog for Catalog {
        fn lookup(&self, name: &str) -> Option<(FieldId, &FieldInfo)> {
            FIELDS
                .iter()
                .enumerate()
                .find(|(_, info)| info.name == name)
                .map(|(id, info)| (FieldId(id), info))
        }
    }

    /// Fields by position in FIELDS, with `aname` indexable.
    struct Source {
        values: HashMap<usize, FieldValue<'static>>,
    }

    impl Source {
        fn bash() -> Self {
            let ancestors = FieldValue::List(vec!["sudo".into(), "bash".into(), "init".into()]);
            Self {
                values: HashMap::from([
                    (0, FieldValue::Int(42)),
                    (1, "python3".into()),
                    (2, ancestors),
                    (3, FieldValue::Bool(false)),
                    (4, "-c".into()),
                ]),
            }
        }
    }

    impl FieldSource for Source {
        fn resolve(&self, field: FieldId, index: Option<u32>) -> Option<FieldValue<'_>> {
            let value = self.values.get(&field.0)?;
            match (value, index) {
                (FieldValue::List(values), Some(index)) => values.get(index as usize).cloned(),
                (value, _) => Some(value.clone()),
            }
        }
    }

    fn eval(expression: &str) -> bool {
        Filter::compile(expression, &Catalog)
            .unwrap_or_else(|err| panic!("{expression}: {err}"))
            .matches(&Source::bash())
    }

    #[test]
    fn comparisons() {
        assert!(eval("proc.pid = 42"));
        assert!(eval("proc.pid == 42"));
        assert!(eval("proc.pid != 41"));
        assert!(eval("proc.pid < 43"));
        assert!(eval("proc.pid <= 42"));
        assert!(!eval("proc.pid <= 41"));
        assert!(eval("proc.pid >= 42"));
        assert!(!eval("proc.pid > 42"));
        assert!(eval("proc.name contains yth"));
        assert!(eval("proc.name startswith py"));
        assert!(eval("proc.name endswith \"3\""));
        assert!(eval("proc.is_leader = false"));
        assert!(eval("evt.arg[0] = -c"));
    }

    #[test]
    fn connectives() {
        assert!(eval("proc.pid = 42 and proc.name = python3"));
        assert!(eval("proc.pid = 1 or proc.name = python3"));
        assert!(eval("not proc.pid = 1"));
        assert!(!eval("not (proc.pid = 1 or proc.pid = 42)"));
        // not binds tighter than and, which binds tighter than or
        assert!(eval("proc.pid = 1 and proc.pid = 2 or proc.pid = 42"));
        assert!(!eval("not proc.pid = 42 and proc.pid = 42"));
    }

    #[test]
    fn multi_valued() {
        assert!(eval("proc.aname = bash"));
        assert!(eval("proc.aname in (zsh, init)"));
        assert!(!eval("proc.aname in (zsh, fish)"));
        assert!(eval("proc.aname[0] = sudo"));
        assert!(!eval("proc.aname[1] = sudo"));
        assert!(eval("proc.aname != zsh"));
        assert!(!eval("proc.aname != bash"));
        assert!(eval("proc.aname contains ni"));
    }

    #[test]
    fn absent_values_never_match() {
        assert!(!eval("proc.tty = 1"));
        assert!(!eval("proc.tty != 1"));
        assert!(!eval("proc.tty in (1, 2)"));
        assert!(!eval("proc.tty exists"));
        assert!(eval("not proc.tty exists"));
        assert!(!eval("proc.aname[7] = init"));
        assert!(!eval("proc.aname[7] != init"));
        assert!(eval("proc.aname[2] exists"));
    }

    fn compile_err(expression: &str) -> FilterError {
        match Filter::compile(expression, &Catalog) {
            Ok(_) => panic!("{expression} should not compile"),
            Err(err) => err,
        }
    }

    #[test]
    fn compile_errors() {
        assert!(matches!(compile_err("proc.nope = 1"), FilterError::UnknownField(f) if f == "proc.nope"));
        assert!(matches!(compile_err("proc.pid[1] = 1"), FilterError::UnexpectedIndex(_)));
        assert!(matches!(compile_err("evt.arg = x"), FilterError::MissingIndex(_)));
        assert!(matches!(compile_err("proc.pid = abc"), FilterError::InvalidValue { .. }));
        assert!(matches!(compile_err("proc.is_leader = yes"), FilterError::InvalidValue { .. }));
        assert!(matches!(compile_err("proc.pid in (1, x)"), FilterError::InvalidValue { .. }));
        assert!(matches!(
            compile_err("proc.name < abc"),
            FilterError::OperatorNotAllowed { .. }
        ));
        assert!(matches!(
            compile_err("proc.pid contains 4"),
            FilterError::OperatorNotAllowed { .. }
        ));
        assert!(matches!(compile_err("proc.pid = "), FilterError::Dsl(_)));
        assert!(matches!(compile_err("proc.pid in ()"), FilterError::Dsl(_)));
    }

    #[test]
    fn compiled_field_resolution() {
        let field = CompiledField::compile("proc.aname[1]", &Catalog).unwrap();
        let source = Source::bash();
        assert_eq!(field.resolve(&source), Some(FieldValue::Str(Cow::Borrowed("bash"))));
        assert_eq!(field.to_string(), "proc.aname[1]");
        assert!(CompiledField::compile("evt.arg", &Catalog).is_err());
    }
}
