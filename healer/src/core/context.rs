//! Named values threaded between sequential tasks.
//!
//! Generated code reports a value by printing one line of the form
//! `RESULT: <name> = <value>` to stdout. Only that exact marker is recognised.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::core::types::ContextVariable;

/// Marker that prefixes a reported value on stdout.
pub const RESULT_MARKER: &str = "RESULT:";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should be valid")
});

/// Whether `name` is usable as a context variable name.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Parse one stdout line as a result marker, returning `(name, value)`.
pub fn parse_marker_line(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix(RESULT_MARKER)?;
    let (name, value) = rest.split_once('=')?;
    let name = name.trim();
    if !is_identifier(name) {
        return None;
    }
    Some((name.to_string(), strip_enclosing_quotes(value.trim()).to_string()))
}

fn strip_enclosing_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2
            && let Some(inner) = value
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Session-scoped store of values produced by successful tasks.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    values: BTreeMap<String, ContextVariable>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every marker line in `output` as produced by `task_index`.
    ///
    /// Returns the number of lines recognised. A later line for a name
    /// overwrites an earlier one.
    pub fn extract(&mut self, output: &str, task_index: usize) -> usize {
        let mut recognised = 0;
        for line in output.lines() {
            let Some((name, value)) = parse_marker_line(line) else {
                continue;
            };
            debug!(%name, task_index, "context variable recorded");
            self.values.insert(
                name.clone(),
                ContextVariable {
                    name,
                    value,
                    produced_by_task: task_index,
                },
            );
            recognised += 1;
        }
        recognised
    }

    /// Look up the named variables, in the order requested.
    ///
    /// Names that no earlier task produced are skipped with a warning.
    pub fn resolve(&self, names: &[String]) -> Vec<ContextVariable> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            match self.values.get(name) {
                Some(var) => resolved.push(var.clone()),
                None => warn!(%name, "dependency not present in context"),
            }
        }
        resolved
    }

    pub fn get(&self, name: &str) -> Option<&ContextVariable> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All variables, ordered by name.
    pub fn variables(&self) -> Vec<ContextVariable> {
        self.values.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_lines_are_recorded() {
        let mut store = ContextStore::new();
        let count = store.extract("loading\nRESULT: price = 100\nRESULT: name = \"widget\"\n", 0);
        assert_eq!(count, 2);
        assert_eq!(store.get("price").map(|v| v.value.as_str()), Some("100"));
        assert_eq!(store.get("name").map(|v| v.value.as_str()), Some("widget"));
    }

    #[test]
    fn only_the_exact_marker_is_recognised() {
        let mut store = ContextStore::new();
        let output = "result: price = 1\nRESULT price = 2\nThe RESULT: price = 3\nprice = 4\n";
        assert_eq!(store.extract(output, 0), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn first_equals_separates_name_and_value() {
        assert_eq!(
            parse_marker_line("  RESULT: expr = a == b  "),
            Some(("expr".to_string(), "a == b".to_string()))
        );
        assert_eq!(parse_marker_line("RESULT: 1bad = 3"), None);
        assert_eq!(parse_marker_line("RESULT: missing"), None);
    }

    #[test]
    fn one_pair_of_quotes_is_stripped() {
        assert_eq!(
            parse_marker_line("RESULT: s = '\"nested\"'").map(|(_, v)| v),
            Some("\"nested\"".to_string())
        );
        assert_eq!(
            parse_marker_line("RESULT: s = \"").map(|(_, v)| v),
            Some("\"".to_string())
        );
    }

    #[test]
    fn later_values_overwrite_earlier_ones() {
        let mut store = ContextStore::new();
        store.extract("RESULT: total = 1\n", 0);
        store.extract("RESULT: total = 2\n", 1);
        let total = store.get("total").expect("total");
        assert_eq!(total.value, "2");
        assert_eq!(total.produced_by_task, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn resolve_returns_requested_subset_in_order() {
        let mut store = ContextStore::new();
        store.extract("RESULT: a = 1\nRESULT: b = 2\nRESULT: c = 3\n", 0);
        let names = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let resolved: Vec<_> = store.resolve(&names).into_iter().map(|v| v.name).collect();
        assert_eq!(resolved, vec!["c", "a"]);
    }
}
