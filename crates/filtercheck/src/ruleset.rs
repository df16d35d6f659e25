use crate::{
    CompiledCondition, CompiledField, FieldCatalog, FieldSource, FilterError, FieldValue, Rule,
    compile_condition, validate_condition,
};

/// Final form of a rule: its condition and output fields checked against a catalog.
pub struct CompiledRule {
    pub name: String,
    pub description: Option<String>,
    pub condition: CompiledCondition,
    pub output: Vec<CompiledField>,
}

impl CompiledRule {
    pub fn compile<C: FieldCatalog + ?Sized>(rule: Rule, catalog: &C) -> Result<Self, FilterError> {
        let wrap = |error: FilterError| FilterError::Rule {
            name: rule.name.clone(),
            error: Box::new(error),
        };
        let condition = validate_condition(rule.condition, catalog).map_err(wrap)?;
        let output = rule
            .output
            .iter()
            .map(|field| CompiledField::compile(field, catalog))
            .collect::<Result<Vec<_>, _>>()
            .map_err(wrap)?;
        Ok(Self {
            name: rule.name,
            description: rule.description,
            condition: compile_condition(condition),
            output,
        })
    }

    pub fn is_match(&self, source: &dyn FieldSource) -> bool {
        self.condition.is_match(source)
    }

    /// Resolve the output fields of the rule, in order.
    pub fn output_values<'a>(
        &'a self,
        source: &'a dyn FieldSource,
    ) -> impl Iterator<Item = (&'a CompiledField, Option<FieldValue<'a>>)> + 'a {
        self.output
            .iter()
            .map(move |field| (field, field.resolve(source)))
    }
}

pub struct Ruleset {
    pub(crate) rules: Vec<CompiledRule>,
}

impl Ruleset {
    pub fn from_compiled(rules: Vec<CompiledRule>) -> Self {
        Self { rules }
    }

    pub fn from_rules<C: FieldCatalog + ?Sized>(
        rules: Vec<Rule>,
        catalog: &C,
    ) -> Result<Self, FilterError> {
        let compiled_rules = rules
            .into_iter()
            .map(|rule| CompiledRule::compile(rule, catalog))
            .collect::<Result<Vec<CompiledRule>, FilterError>>()?;

        log::debug!("Loaded {} rules", compiled_rules.len());

        Ok(Self {
            rules: compiled_rules,
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Rules matching the source.
    pub fn matches<'a>(
        &'a self,
        source: &'a dyn FieldSource,
    ) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.rules.iter().filter(move |rule| rule.is_match(source))
    }

    pub fn run<F: FnMut(&CompiledRule)>(&self, source: &dyn FieldSource, mut cb: F) {
        for rule in &self.rules {
            if rule.is_match(source) {
                cb(rule)
            }
        }
    }
}
