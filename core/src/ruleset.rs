//! The merged default + file rule set.

use std::fmt;

use serde::Serialize;

use crate::classify::Rule;
use crate::matcher::compile_rules;
use crate::tokenizer::{merge_rules, normalize_rules, tokenize};

/// Which half of the merged rule text a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Operator-supplied default rules.
    Default,
    /// Rules read from the allow file.
    File,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Default => f.write_str("default"),
            Provenance::File => f.write_str("file"),
        }
    }
}

/// A classified rule tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleEntry {
    pub rule: Rule,
    pub provenance: Provenance,
}

/// Immutable, compiled view of `default | file` rule text.
///
/// Entries keep merged order (default first, then file). Unclassifiable
/// tokens are dropped and only counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    merged: String,
    entries: Vec<RuleEntry>,
    skipped: usize,
}

impl RuleSet {
    /// Normalize and compile both halves.
    pub fn compile(default_rules: &str, file_rules: &str) -> Self {
        let default_rules = normalize_rules(default_rules).trim().to_string();
        let file_rules = normalize_rules(file_rules).trim().to_string();
        let merged = merge_rules(&default_rules, &file_rules);

        let mut entries = Vec::new();
        for (text, provenance) in [
            (&default_rules, Provenance::Default),
            (&file_rules, Provenance::File),
        ] {
            entries.extend(
                compile_rules(text)
                    .into_iter()
                    .map(|rule| RuleEntry { rule, provenance }),
            );
        }
        let skipped = tokenize(&merged).len() - entries.len();

        RuleSet {
            merged,
            entries,
            skipped,
        }
    }

    /// A rule set with only default rules.
    pub fn from_default(default_rules: &str) -> Self {
        Self::compile(default_rules, "")
    }

    /// `default` alone, or `default|file` when the file half is non-empty.
    pub fn merged(&self) -> &str {
        &self.merged
    }

    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// Number of classified rules from one half.
    pub fn count(&self, provenance: Provenance) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.provenance == provenance)
            .count()
    }

    /// Number of tokens that fit no notation.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Verdict: any rule, in merged order, admits the candidate.
    pub fn is_allowed(&self, candidate: &str) -> bool {
        self.entries.iter().any(|entry| entry.rule.matches(candidate))
    }

    /// First rule from one half that admits the candidate.
    pub fn matched(&self, provenance: Provenance, candidate: &str) -> Option<&Rule> {
        self.entries
            .iter()
            .filter(|entry| entry.provenance == provenance)
            .map(|entry| &entry.rule)
            .find(|rule| rule.matches(candidate))
    }
}
