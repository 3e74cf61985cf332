//! gamewallet - drive a wallet session and delegation update from the terminal.
//!
//! Runs against the in-process sandbox services so every flow (restore,
//! connect, profile lookup, delegation fetch and update) can be exercised
//! without a browser wallet.

mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Game wallet session and delegation manager.
#[derive(Parser, Debug)]
#[command(name = "gamewallet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep the session marker in memory; nothing is written to disk
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore or connect, fetch delegations and delegate everything to the target
    Run(RunArgs),
    /// Show the session marker and the effective configuration
    Status,
    /// Forget the previous session
    Forget,
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Sandbox wallet and ledger setup for `run`.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Address of the sandbox wallet account
    #[arg(short, long, default_value = "sandbox-wallet-address")]
    address: String,

    /// Existing delegation as DELEGATEE=BASIS_POINTS (repeatable)
    #[arg(short, long = "delegation")]
    delegations: Vec<DelegationArg>,

    /// Number of connect prompts the wallet rejects before accepting
    #[arg(long, default_value = "0")]
    reject_connects: u32,

    /// Start with permissions already granted
    #[arg(long)]
    pre_authorized: bool,

    /// Profile display name registered for the address
    #[arg(long)]
    profile_name: Option<String>,

    /// Profile image reference registered for the address
    #[arg(long, requires = "profile_name")]
    profile_image: Option<String>,

    /// Number of profile lookups that fail before the registry answers
    #[arg(long, default_value = "0")]
    profile_failures: u32,

    /// Only show delegations; do not update them
    #[arg(long)]
    no_apply: bool,
}

/// Delegation parsed from `DELEGATEE=BASIS_POINTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationArg {
    delegatee: String,
    factor: i64,
}

impl std::str::FromStr for DelegationArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (delegatee, factor) = s
            .split_once('=')
            .ok_or_else(|| format!("Expected DELEGATEE=BASIS_POINTS, got '{}'", s))?;
        let delegatee = delegatee.trim();
        if delegatee.is_empty() {
            return Err(format!("Missing delegatee in '{}'", s));
        }
        let factor = factor
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("Invalid basis points '{}': {}", factor, e))?;
        Ok(DelegationArg {
            delegatee: delegatee.to_string(),
            factor,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("gamewallet=info".parse()?)
        .add_directive("gamewallet_session=info".parse()?)
        .add_directive("gamewallet_core=info".parse()?);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = match args.config {
        Some(path) => path,
        None => gamewallet_core::config::get_config_path()?,
    };

    match args.command {
        Command::Run(run_args) => commands::run(&config_path, args.memory, run_args).await,
        Command::Status => commands::status(&config_path, args.memory),
        Command::Forget => commands::forget(args.memory),
        Command::InitConfig { force } => commands::init_config(&config_path, force),
    }
}
