//! Rule sources for the gate.
//!
//! Default rules come from configuration; file rules from the allow file,
//! which is discovered on disk and read fresh or through a cache.

mod loader;
mod logging;
mod provider;

pub use loader::{
    allow_file_candidates, expand_placeholders, locate_allow_file, or_no_rules,
    read_rules_file, resolve_allow_file, rules_hash, strip_comments, LoadError, SearchRoots,
};
pub use logging::{GuardLog, DECISION_TARGET};
pub use provider::{load_file_rules, CacheMode, FileRuleSource, FsRuleSource, RuleProvider};
