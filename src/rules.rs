//! Rules written by users, loaded from YAML files.
//!
//! ```yaml
//! - name: Shell spawned by a web server
//!   condition: proc.name in (sh, bash) and proc.pname in (nginx, httpd)
//!   description: interactive shell below a web server
//!   output: [proc.cmdline, proc.pname, user.uid]
//! ```

use std::{fs, path::Path};

use filtercheck::{
    FieldCatalog, FilterError, Rule, Ruleset,
    dsl::{DslError, parse_condition},
};
use glob::glob;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RULE_EXTENSION: &str = "yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRule {
    pub name: String,
    pub condition: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("Error listing rules: {0}")]
    RuleListing(#[from] glob::PatternError),
    #[error("Error reading rule: {name}")]
    RuleLoading {
        name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("Error parsing rule file: {filename}")]
    RuleParsing {
        filename: String,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("Error parsing condition of rule {name}: '{condition}'")]
    Dsl {
        name: String,
        condition: String,
        #[source]
        error: DslError,
    },
    #[error("Error compiling rules")]
    RuleCompile(#[from] FilterError),
}

/// Load every rule of a file, or of the `*.yaml` files below a directory.
pub fn load_user_rules(rules_path: &Path) -> Result<Vec<UserRule>, RulesError> {
    if rules_path.is_file() {
        return read_rule_file(rules_path);
    }
    let expr = format!("{}/**/*.{}", rules_path.display(), RULE_EXTENSION);
    let mut paths: Vec<_> = glob(&expr)?.flatten().collect();
    paths.sort();

    let mut rules = Vec::new();
    for path in paths {
        rules.extend(read_rule_file(&path)?);
    }
    Ok(rules)
}

fn read_rule_file(path: &Path) -> Result<Vec<UserRule>, RulesError> {
    log::debug!("loading rules from {}", path.display());
    let body = fs::read_to_string(path).map_err(|error| RulesError::RuleLoading {
        name: path.display().to_string(),
        error,
    })?;
    parse_user_rules(&body, &path.display().to_string())
}

pub fn parse_user_rules(body: &str, filename: &str) -> Result<Vec<UserRule>, RulesError> {
    serde_yaml::from_str::<Vec<UserRule>>(body).map_err(|error| RulesError::RuleParsing {
        filename: filename.to_string(),
        error,
    })
}

fn parse_rule(user_rule: UserRule) -> Result<Rule, RulesError> {
    let condition = parse_condition(&user_rule.condition).map_err(|error| RulesError::Dsl {
        name: user_rule.name.clone(),
        condition: user_rule.condition.clone(),
        error,
    })?;
    Ok(Rule {
        name: user_rule.name,
        condition,
        description: user_rule.description,
        output: user_rule.output,
    })
}

/// Parse the conditions and compile them against the fields of `catalog`.
pub fn compile_rules<C: FieldCatalog + ?Sized>(
    user_rules: Vec<UserRule>,
    catalog: &C,
) -> Result<Ruleset, RulesError> {
    let rules = user_rules
        .into_iter()
        .map(parse_rule)
        .collect::<Result<Vec<Rule>, RulesError>>()?;
    Ok(Ruleset::from_rules(rules, catalog)?)
}

#[cfg(test)]
mod tests {
    use syswatch_core::FieldTable;

    use super::*;

    const RULES: &str = r#"
- name: Shell below init
  condition: proc.name in (sh, bash) and proc.aname = init
  output: [proc.cmdline, proc.pid]
- name: Test binaries
  condition: proc.exepath exists and proc.exepath endswith "-exe"
  description: executables named like test fixtures
"#;

    #[test]
    fn parse_yaml_rules() {
        let rules = parse_user_rules(RULES, "test.yaml").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "Shell below init");
        assert_eq!(rules[0].output, vec!["proc.cmdline", "proc.pid"]);
        assert_eq!(rules[0].description, None);
        assert!(rules[1].output.is_empty());
    }

    #[test]
    fn compile_against_fields() {
        let user_rules = parse_user_rules(
            "- name: shells\n  condition: proc.name in (sh, bash)\n  output: [proc.aname[1]]\n",
            "test.yaml",
        )
        .unwrap();
        let ruleset = compile_rules(user_rules, &FieldTable::new()).unwrap();
        assert_eq!(ruleset.len(), 1);
        assert_eq!(ruleset.rules()[0].name, "shells");
    }

    #[test]
    fn errors_name_the_rule() {
        let bad_syntax = vec![UserRule {
            name: "broken".to_string(),
            condition: "proc.name in".to_string(),
            description: None,
            output: Vec::new(),
        }];
        assert!(matches!(
            compile_rules(bad_syntax, &FieldTable::new()),
            Err(RulesError::Dsl { name, .. }) if name == "broken"
        ));

        let unknown_field = vec![UserRule {
            name: "unknown".to_string(),
            condition: "proc.nope = 1".to_string(),
            description: None,
            output: Vec::new(),
        }];
        assert!(matches!(
            compile_rules(unknown_field, &FieldTable::new()),
            Err(RulesError::RuleCompile(FilterError::Rule { name, .. })) if name == "unknown"
        ));

        assert!(matches!(
            parse_user_rules("name: not a list", "bad.yaml"),
            Err(RulesError::RuleParsing { .. })
        ));
    }

    #[test]
    fn missing_rules_directory_is_empty() {
        let rules = load_user_rules(Path::new("/nonexistent/syswatch/rules")).unwrap();
        assert!(rules.is_empty());
    }
}
