//! Reporting of dispatched events and rule matches.

use std::fmt::Write;

use filtercheck::Ruleset;
use syswatch_core::{EventContext, EventSink};

/// A rule that matched an event, with its output fields resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule: String,
    pub event_num: u64,
    /// `field=value` pairs, `<NA>` for fields without a value.
    pub output: Vec<(String, String)>,
}

impl RuleMatch {
    fn describe(&self) -> String {
        let mut line = format!("rule '{}' matched event {}", self.rule, self.event_num);
        for (field, value) in &self.output {
            let _ = write!(line, " {field}={value}");
        }
        line
    }
}

/// Evaluates every rule on every event and logs the matches.
pub struct RuleSink {
    ruleset: Ruleset,
    print_events: bool,
    matches: u64,
    last_match: Option<RuleMatch>,
}

impl RuleSink {
    pub fn new(ruleset: Ruleset, print_events: bool) -> Self {
        Self {
            ruleset,
            print_events,
            matches: 0,
            last_match: None,
        }
    }

    pub fn matches(&self) -> u64 {
        self.matches
    }

    pub fn last_match(&self) -> Option<&RuleMatch> {
        self.last_match.as_ref()
    }
}

/// One line per event: number, time, cpu, direction, type, thread and parameters.
pub fn format_event(ctx: &EventContext<'_>) -> String {
    let event = ctx.event();
    let mut line = format!(
        "{} {} {} {} {} tid={}",
        ctx.num(),
        event.ts(),
        event.cpu(),
        event.event_type.direction().as_str(),
        event.event_type.name(),
        event.tid(),
    );
    if let Some(thread) = ctx.thread() {
        let _ = write!(line, " ({}:{})", thread.comm, thread.pid);
    }
    for index in 0..event.nparams() {
        if let Some(info) = event.param_info(index) {
            let _ = write!(line, " {}={}", info.name, event.param(index));
        }
    }
    line
}

impl EventSink for RuleSink {
    fn on_event(&mut self, ctx: &EventContext<'_>) {
        if self.print_events {
            log::info!("{}", format_event(ctx));
        }
        for rule in self.ruleset.matches(ctx) {
            let output = rule
                .output_values(ctx)
                .map(|(field, value)| {
                    let value = value.map_or_else(|| "<NA>".to_string(), |v| v.to_string());
                    (field.to_string(), value)
                })
                .collect();
            let rule_match = RuleMatch {
                rule: rule.name.clone(),
                event_num: ctx.num(),
                output,
            };
            log::warn!("{}", rule_match.describe());
            self.matches += 1;
            self.last_match = Some(rule_match);
        }
    }
}

#[cfg(test)]
mod tests {
    use event_wire::{CaptureReader, CaptureWriter, EventType, RecordBuilder};
    use syswatch_core::{Dispatcher, DispatcherConfig, FieldTable, ThreadInfo, ThreadRegistry};

    use super::*;
    use crate::rules::{compile_rules, parse_user_rules};

    const RULES: &str = r#"
- name: passwd read by a shell
  condition: evt.type = open and fd.name startswith /etc/ and proc.aname in (bash)
  output: [proc.name, fd.name, proc.aname[1], proc.pgid.name]
"#;

    fn registry() -> ThreadRegistry {
        let mut registry = ThreadRegistry::default();
        let mut shell = ThreadInfo::new(10, 10, 0);
        shell.comm = "bash".to_string();
        registry.insert(shell).unwrap();
        registry
    }

    fn capture() -> CaptureReader {
        let mut writer = CaptureWriter::new();
        let mut clone = RecordBuilder::new(EventType::CloneX, 100, 20, 1);
        clone
            .push_int(0)
            .and_then(|b| b.push_str("/usr/bin/cat"))
            .and_then(|b| b.push_str_array(&["/etc/passwd"]))
            .and_then(|b| b.push_int(20))
            .and_then(|b| b.push_int(20))
            .and_then(|b| b.push_int(10))
            .and_then(|b| b.push_str("/root"))
            .and_then(|b| b.push_str("cat"))
            .and_then(|b| b.push_uint(0))
            .and_then(|b| b.push_empty())
            .unwrap();
        writer.push(&clone.finish().unwrap());
        let mut open = RecordBuilder::new(EventType::OpenX, 200, 20, 1);
        open.push_int(3)
            .and_then(|b| b.push_str("/etc/passwd"))
            .and_then(|b| b.push_uint(0))
            .and_then(|b| b.push_uint(0))
            .unwrap();
        writer.push(&open.finish().unwrap());
        CaptureReader::new(writer.into_bytes())
    }

    #[test]
    fn matches_are_counted_with_their_output() {
        let ruleset =
            compile_rules(parse_user_rules(RULES, "test.yaml").unwrap(), &FieldTable::new())
                .unwrap();
        let mut sink = RuleSink::new(ruleset, true);
        let mut dispatcher = Dispatcher::new(registry(), DispatcherConfig::default());
        dispatcher.add_source(capture());
        assert_eq!(dispatcher.drain(&mut sink), 2);

        assert_eq!(sink.matches(), 1);
        let rule_match = sink.last_match().unwrap();
        assert_eq!(rule_match.rule, "passwd read by a shell");
        assert_eq!(rule_match.event_num, 2);
        assert_eq!(
            rule_match.output,
            vec![
                ("proc.name".to_string(), "cat".to_string()),
                ("fd.name".to_string(), "/etc/passwd".to_string()),
                ("proc.aname[1]".to_string(), "bash".to_string()),
                ("proc.pgid.name".to_string(), "<NA>".to_string()),
            ]
        );
        assert_eq!(
            rule_match.describe(),
            "rule 'passwd read by a shell' matched event 2 proc.name=cat fd.name=/etc/passwd proc.aname[1]=bash proc.pgid.name=<NA>"
        );
    }

    #[test]
    fn event_lines() {
        let mut lines = Vec::new();
        let mut dispatcher = Dispatcher::new(registry(), DispatcherConfig::default());
        dispatcher.add_source(capture());
        dispatcher.drain(&mut |ctx: &EventContext<'_>| lines.push(format_event(ctx)));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2 200 1 < open tid=20 (cat:20) fd=3 name=/etc/passwd"));
    }
}
