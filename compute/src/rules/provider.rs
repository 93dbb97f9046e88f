//! Rule provider: default rules plus the allow file, optionally cached.
//!
//! In cached mode a compiled [`RuleSet`] is published once at construction and
//! replaced wholesale by [`RuleProvider::reload`]. Readers take an `Arc`
//! snapshot and never observe a half-built set. In fresh mode every snapshot
//! re-reads the allow file.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipguard_core::RuleSet;
use serde::Serialize;

use super::loader::{locate_allow_file, or_no_rules, read_rules_file, LoadError, SearchRoots};
use crate::config::GateConfig;

/// Where file-provenance rules come from.
pub trait FileRuleSource: Send + Sync {
    /// Current file rule text, comments stripped and `~` normalized.
    fn load(&self) -> Result<String, LoadError>;
}

/// Allow file on the local filesystem, located by path or discovery.
#[derive(Debug, Clone)]
pub struct FsRuleSource {
    explicit: Option<PathBuf>,
    dir_hint: String,
    file_name: String,
    roots: SearchRoots,
}

impl FsRuleSource {
    pub fn new(
        explicit: Option<PathBuf>,
        dir_hint: impl Into<String>,
        file_name: impl Into<String>,
        roots: SearchRoots,
    ) -> Self {
        FsRuleSource {
            explicit,
            dir_hint: dir_hint.into(),
            file_name: file_name.into(),
            roots,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            config.allow_file.clone(),
            config.allow_dir_hint.clone(),
            config.allow_file_name.clone(),
            SearchRoots::from_env(),
        )
    }

    /// The file a load would read right now, if any.
    pub fn locate(&self) -> Result<PathBuf, LoadError> {
        locate_allow_file(
            self.explicit.as_deref(),
            &self.dir_hint,
            &self.file_name,
            &self.roots,
        )
    }
}

impl FileRuleSource for FsRuleSource {
    fn load(&self) -> Result<String, LoadError> {
        let path = self.locate()?;
        tracing::debug!(path = %path.display(), "reading allow file");
        read_rules_file(&path)
    }
}

/// Load file rules from a source, folding every failure into "no file rules".
pub fn load_file_rules(source: &dyn FileRuleSource) -> String {
    or_no_rules(source.load())
}

/// Whether snapshots come from a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Cached,
    Fresh,
}

/// Hands out compiled rule sets to request handlers.
pub struct RuleProvider {
    default_rules: String,
    source: Arc<dyn FileRuleSource>,
    cache: Option<ArcSwap<RuleSet>>,
}

impl RuleProvider {
    pub fn new(default_rules: impl Into<String>, source: Arc<dyn FileRuleSource>, cache: bool) -> Self {
        let mut provider = RuleProvider {
            default_rules: default_rules.into(),
            source,
            cache: None,
        };
        if cache {
            provider.cache = Some(ArcSwap::from_pointee(provider.compile()));
        }
        provider
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            config.default_rules.clone(),
            Arc::new(FsRuleSource::from_config(config)),
            config.cache_rules,
        )
    }

    pub fn cache_mode(&self) -> CacheMode {
        if self.cache.is_some() {
            CacheMode::Cached
        } else {
            CacheMode::Fresh
        }
    }

    pub fn default_rules(&self) -> &str {
        &self.default_rules
    }

    /// A rule set with the default half only, built without touching the source.
    pub fn default_only(&self) -> Arc<RuleSet> {
        Arc::new(RuleSet::from_default(self.default_rules()))
    }

    fn compile(&self) -> RuleSet {
        let file_rules = load_file_rules(self.source.as_ref());
        let rules = RuleSet::compile(&self.default_rules, &file_rules);
        tracing::debug!(
            default = rules.count(ipguard_core::Provenance::Default),
            file = rules.count(ipguard_core::Provenance::File),
            skipped = rules.skipped(),
            "compiled rule set"
        );
        rules
    }

    /// The rule set to evaluate against.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        match &self.cache {
            Some(cache) => cache.load_full(),
            None => Arc::new(self.compile()),
        }
    }

    /// Re-read the allow file. In cached mode the new set replaces the old one.
    pub fn reload(&self) -> Arc<RuleSet> {
        let rules = Arc::new(self.compile());
        if let Some(cache) = &self.cache {
            cache.store(rules.clone());
            tracing::info!(rules = rules.entries().len(), "rule cache reloaded");
        }
        rules
    }
}
