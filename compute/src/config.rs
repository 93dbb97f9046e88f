//! Gate configuration from environment variables.
//!
//! Values are trimmed and blank values count as unset.

use std::net::SocketAddr;
use std::path::PathBuf;

use ipguard_core::normalize_rules;

/// RFC 1918 private ranges, used when `DEFAULT_IP` is unset.
pub const DEFAULT_IP_RULES: &str =
    "10.0.0.0~10.255.255.255|172.16.0.0~172.31.255.255|192.168.0.0~192.168.255.255";
pub const DEFAULT_ALLOW_DIR: &str = "Desktop";
pub const DEFAULT_ALLOW_FILE_NAME: &str = "allow-ip.txt";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: expected a boolean (true/false, 1/0, yes/no, on/off), got '{value}'")]
    InvalidBool { key: &'static str, value: String },

    #[error("IPGUARD_BIND: invalid socket address '{value}': {source}")]
    InvalidBind {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Runtime settings for the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Default-provenance rules, `~` ranges already normalized.
    pub default_rules: String,
    /// Directory hint for allow file discovery (`ALLOW_IP_PATH`).
    pub allow_dir_hint: String,
    pub allow_file_name: String,
    /// Explicit allow file; skips discovery when set.
    pub allow_file: Option<PathBuf>,
    pub cache_rules: bool,
    pub trust_proxy_headers: bool,
    /// Answer denied requests with 403 instead of only annotating them.
    pub enforce: bool,
    pub bind: SocketAddr,
    pub log_filter: String,
}

impl GateConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let flag = |key: &'static str| match get(key) {
            Some(value) => parse_bool(key, &value),
            None => Ok(false),
        };

        let bind_raw = get("IPGUARD_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|source| ConfigError::InvalidBind { value: bind_raw.clone(), source })?;

        Ok(GateConfig {
            default_rules: normalize_rules(
                &get("DEFAULT_IP").unwrap_or_else(|| DEFAULT_IP_RULES.to_string()),
            ),
            allow_dir_hint: get("ALLOW_IP_PATH").unwrap_or_else(|| DEFAULT_ALLOW_DIR.to_string()),
            allow_file_name: get("DEFAULT_FILE_NAME")
                .unwrap_or_else(|| DEFAULT_ALLOW_FILE_NAME.to_string()),
            allow_file: get("IPGUARD_ALLOW_FILE").map(PathBuf::from),
            cache_rules: flag("IPGUARD_CACHE_RULES")?,
            trust_proxy_headers: flag("IPGUARD_TRUST_PROXY_HEADERS")?,
            enforce: flag("IPGUARD_ENFORCE")?,
            bind,
            log_filter: get("IPGUARD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            default_rules: normalize_rules(DEFAULT_IP_RULES),
            allow_dir_hint: DEFAULT_ALLOW_DIR.to_string(),
            allow_file_name: DEFAULT_ALLOW_FILE_NAME.to_string(),
            allow_file: None,
            cache_rules: false,
            trust_proxy_headers: false,
            enforce: false,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value: value.to_string() }),
    }
}
