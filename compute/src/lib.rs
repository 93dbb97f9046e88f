//! IP Guard gate.
//!
//! Wraps the `ipguard-core` rule engine for a running service:
//! - configuration from the environment
//! - allow file discovery and loading, fresh or cached
//! - an axum guard layer that annotates or refuses requests
//! - one structured decision log line per request

pub mod config;
pub mod gate;
pub mod rules;
pub mod shutdown;

pub use config::{ConfigError, GateConfig};
pub use gate::{build_router, client_address, guard, protect, AppState, GuardDecision};
pub use rules::{CacheMode, FileRuleSource, FsRuleSource, LoadError, RuleProvider};
