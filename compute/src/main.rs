//! IP Guard gate - IPv4 allow-list guard for HTTP services.
//!
//! Subcommands:
//! - `serve` (default) runs the guarded HTTP gate
//! - `validate` strictly checks rule text and reports invalid tokens
//! - `check` evaluates one address against the configured rules

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ipguard_core::{evaluate, invalid_tokens, tokenize, RuleError, INVALID_IP_FORMAT};
use ipguard_gate::gate::{ENGINE_NAME, VERSION};
use ipguard_gate::rules::{read_rules_file, FileRuleSource, FsRuleSource, LoadError};
use ipguard_gate::shutdown::shutdown_signal;
use ipguard_gate::{build_router, AppState, GateConfig, RuleProvider};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "ipguard-gate", version, about = "IPv4 allow-list guard")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP gate.
    Serve,
    /// Validate rule text. Without arguments, validates the configured default and file rules.
    Validate {
        /// Rule text to validate.
        #[arg(long)]
        rules: Option<String>,
        /// Rule file to validate.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Evaluate one address and print the decision as JSON.
    Check {
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = GateConfig::from_env().context("invalid configuration")?;
    init_tracing(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await.map(|()| ExitCode::SUCCESS),
        Command::Validate { rules, file } => validate(&config, rules, file),
        Command::Check { address } => check(&config, &address),
    }
}

fn init_tracing(config: &GateConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(config: GateConfig) -> anyhow::Result<()> {
    let provider = RuleProvider::from_config(&config);
    let state = AppState {
        provider: Arc::new(provider),
        trust_proxy_headers: config.trust_proxy_headers,
        enforce: config.enforce,
    };
    info!(
        "[{}] v{} starting: cache={:?} trust_proxy_headers={} enforce={}",
        ENGINE_NAME,
        VERSION,
        state.provider.cache_mode(),
        config.trust_proxy_headers,
        config.enforce
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("listening on {}", config.bind);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

/// Print a report for one rule source. Returns false when it has invalid tokens.
fn report(label: &str, rules: &str) -> bool {
    let invalid = invalid_tokens(rules);
    if invalid.is_empty() {
        println!("ok: {} ({} tokens)", label, tokenize(rules).len());
        return true;
    }
    for token in invalid {
        println!("{}: {} {}", label, INVALID_IP_FORMAT, RuleError::from(token));
    }
    false
}

fn validate(config: &GateConfig, rules: Option<String>, file: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let mut ok = true;
    let explicit = rules.is_some() || file.is_some();

    if let Some(rules) = rules {
        ok &= report("--rules", &rules);
    }
    if let Some(path) = file {
        let text = read_rules_file(&path)?;
        ok &= report(&path.display().to_string(), &text);
    }
    if !explicit {
        ok &= report("DEFAULT_IP", &config.default_rules);
        match FsRuleSource::from_config(config).load() {
            Ok(text) => ok &= report(&config.allow_file_name, &text),
            Err(LoadError::NotFound(name)) => println!("skip: no allow file ({})", name),
            Err(err) => return Err(err.into()),
        }
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn check(config: &GateConfig, address: &str) -> anyhow::Result<ExitCode> {
    let provider = RuleProvider::from_config(config);
    let result = evaluate(&provider.snapshot(), address);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::SUCCESS)
}
