//! Allow file discovery and loading.
//!
//! The allow file holds file-provenance rules, one notation per line or
//! separated like any other rule text. Lines starting with `#` are comments.
//! A missing or unreadable file means "no file rules"; callers never see the
//! error unless they ask for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use hmac_sha256::HMAC;
use ipguard_core::normalize_rules;
use regex::{Captures, Regex};

const DESKTOP_PREFIX: &str = "DESKTOP:";

/// Errors that can occur while locating or reading the allow file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Allow file not found: {0}")]
    NotFound(String),

    #[error("Failed to read allow file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════
// Discovery
// ═══════════════════════════════════════════════════════════════════════════

/// Directories and variables that discovery resolves against.
#[derive(Debug, Clone, Default)]
pub struct SearchRoots {
    pub home: PathBuf,
    pub cwd: PathBuf,
    vars: HashMap<String, String>,
}

impl SearchRoots {
    pub fn new(home: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        SearchRoots {
            home: home.into(),
            cwd: cwd.into(),
            vars: HashMap::new(),
        }
    }

    /// Home, working directory and variables of the current process.
    pub fn from_env() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.clone());
        SearchRoots {
            home,
            cwd,
            vars: std::env::vars().collect(),
        }
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// The user's desktop: `~/Desktop`, `~/바탕 화면` (Korean Windows),
    /// `$OneDrive/Desktop`, falling back to home.
    pub fn desktop(&self) -> PathBuf {
        let mut candidates = vec![self.home.join("Desktop"), self.home.join("바탕 화면")];
        if let Some(one_drive) = self.var("OneDrive") {
            candidates.push(Path::new(one_drive).join("Desktop"));
        }
        candidates
            .into_iter()
            .find(|path| path.exists())
            .unwrap_or_else(|| self.home.clone())
    }
}

fn env_placeholder_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").ok())
        .as_ref()
}

/// Expand `~`, `$HOME`, `${HOME}`, `%USERPROFILE%`, `%HOMEPATH%` and `${VAR}`.
///
/// Unknown `${VAR}` placeholders expand to nothing.
pub fn expand_placeholders(hint: &str, roots: &SearchRoots) -> String {
    if hint.trim().is_empty() {
        return hint.to_string();
    }
    let home = roots.home.to_string_lossy();

    let mut out = match hint.strip_prefix('~') {
        Some(rest) => format!("{}{}", home, rest),
        None => hint.to_string(),
    };
    out = out.replace("${HOME}", &home).replace("$HOME", &home);

    if let Some(profile) = roots.var("USERPROFILE") {
        out = out.replace("%USERPROFILE%", profile);
    }
    if let Some(home_path) = roots.var("HOMEPATH") {
        let drive = roots.var("HOMEDRIVE").unwrap_or("");
        out = out.replace("%HOMEPATH%", &format!("{}{}", drive, home_path));
    }

    match env_placeholder_regex() {
        Some(re) => re
            .replace_all(&out, |caps: &Captures| {
                roots.var(&caps[1]).unwrap_or("").to_string()
            })
            .into_owned(),
        None => out,
    }
}

/// Candidate allow file paths, in probe order, without duplicates.
pub fn allow_file_candidates(dir_hint: &str, file_name: &str, roots: &SearchRoots) -> Vec<PathBuf> {
    let desktop = roots.desktop();
    let mut candidates = vec![
        desktop.join(file_name),
        roots.home.join(file_name),
        roots.cwd.join(file_name),
    ];

    let hint = dir_hint.trim();
    if !hint.is_empty() {
        let has_desktop_prefix = hint
            .get(..DESKTOP_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(DESKTOP_PREFIX));
        if has_desktop_prefix {
            let sub = hint[DESKTOP_PREFIX.len()..].trim_start_matches(['/', '\\']);
            let base = if sub.trim().is_empty() { desktop } else { desktop.join(sub) };
            candidates.push(base.join(file_name));
        } else {
            let expanded = expand_placeholders(hint, roots);
            if !expanded.trim().is_empty() {
                let path = Path::new(&expanded);
                if path.is_absolute() {
                    candidates.push(path.join(file_name));
                } else {
                    candidates.push(roots.cwd.join(path).join(file_name));
                    candidates.push(roots.home.join(path).join(file_name));
                }
            }
        }
    }

    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// First candidate that exists as a regular file.
pub fn resolve_allow_file(dir_hint: &str, file_name: &str, roots: &SearchRoots) -> Option<PathBuf> {
    allow_file_candidates(dir_hint, file_name, roots)
        .into_iter()
        .find(|path| path.is_file())
}

/// Locate the allow file: the explicit path when given, otherwise discovery.
pub fn locate_allow_file(
    explicit: Option<&Path>,
    dir_hint: &str,
    file_name: &str,
    roots: &SearchRoots,
) -> Result<PathBuf, LoadError> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(LoadError::NotFound(path.display().to_string())),
        None => resolve_allow_file(dir_hint, file_name, roots)
            .ok_or_else(|| LoadError::NotFound(file_name.to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Reading
// ═══════════════════════════════════════════════════════════════════════════

/// Drop full-line `#` comments and normalize `~` ranges.
pub fn strip_comments(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect();
    normalize_rules(&kept.join("\n"))
}

/// Read an allow file as UTF-8 rule text.
pub fn read_rules_file(path: &Path) -> Result<String, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(strip_comments(&text))
}

/// Fold a load result into rule text; failures become "no file rules".
pub fn or_no_rules(loaded: Result<String, LoadError>) -> String {
    match loaded {
        Ok(rules) => rules,
        Err(err @ LoadError::NotFound(_)) => {
            tracing::debug!("{} (no file rules)", err);
            String::new()
        }
        Err(err) => {
            tracing::warn!("{} (no file rules)", err);
            String::new()
        }
    }
}

/// Short fingerprint of rule text: first 16 hex chars of HMAC-SHA256 with an
/// empty key, or `none` for empty text.
pub fn rules_hash(rules: &str) -> String {
    if rules.is_empty() {
        return "none".to_string();
    }
    let hash = HMAC::mac(rules.as_bytes(), b"");
    hex::encode(&hash[..8])
}
