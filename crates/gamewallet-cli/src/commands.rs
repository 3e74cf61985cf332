//! Subcommand implementations.

use color_eyre::Result;
use color_eyre::eyre::eyre;
use gamewallet_core::config::{self, ConfigError};
use gamewallet_core::{
    Address, AppConfig, DelegationState, DisplayDelegation, DisplaySession, Profile,
};
use gamewallet_session::sandbox::{SandboxLedger, SandboxProfiles, SandboxWallet};
use gamewallet_session::{
    ApplyOutcome, DelegationManager, FileMarkerStore, MarkerStore, MemoryMarkerStore,
    ProfileCache, ProfileResolver, RetryPolicy, WalletSession,
};
use std::path::Path;
use std::sync::Arc;

use crate::RunArgs;

/// Load the config at `path`, backing up and replacing a corrupt file with defaults.
fn load_config(path: &Path) -> Result<AppConfig> {
    match config::load_config_from(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::Json(e)) => {
            let backup = config::backup_corrupted_config(path)?;
            tracing::warn!(
                "Config file is corrupt ({}), backed up to {:?}, using defaults",
                e,
                backup
            );
            Ok(AppConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn open_marker(memory: bool) -> Result<Arc<dyn MarkerStore>> {
    if memory {
        return Ok(Arc::new(MemoryMarkerStore::default()));
    }
    Ok(Arc::new(FileMarkerStore::open_default()?))
}

pub async fn run(config_path: &Path, memory: bool, args: RunArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let marker = open_marker(memory)?;

    let address = Address::from(args.address.as_str());
    let wallet = SandboxWallet::new(address.clone()).with_rejections(args.reject_connects);
    let wallet = if args.pre_authorized {
        wallet.pre_authorized()
    } else {
        wallet
    };

    let mut profiles = SandboxProfiles::new().with_failures(args.profile_failures);
    if let Some(name) = &args.profile_name {
        profiles = profiles.with_profile(
            address.clone(),
            Profile::new(name.clone(), args.profile_image.clone()),
        );
    }

    let ledger = args.delegations.iter().fold(SandboxLedger::new(), |ledger, d| {
        ledger.with_delegation(address.clone(), d.delegatee.as_str(), d.factor)
    });

    let resolver = ProfileResolver::new(
        Arc::new(profiles),
        ProfileCache::new(),
        RetryPolicy::from(config.profile_retry),
    );
    let session = WalletSession::new(
        Some(Arc::new(wallet)),
        resolver,
        marker,
        RetryPolicy::from(config.restore),
    );
    let manager = DelegationManager::new(
        Arc::new(ledger),
        session.subscribe(),
        Address::from(config.target_delegatee.as_str()),
        config.delegation_fetch_delay(),
    );

    let restored = if config.auto_restore {
        session.restore().await.address().cloned()
    } else {
        None
    };
    let connected = match restored {
        Some(address) => address,
        None => session.connect().await?,
    };
    println!("Connected as {}", connected);

    session.refresh_profile().await;
    print_session(&DisplaySession::from_state(&session.snapshot()));

    tokio::time::sleep(config.delegation_fetch_delay()).await;
    manager.fetch_delegations().await;
    println!();
    println!("Current delegations:");
    print_delegations(&manager.snapshot());

    if !args.no_apply {
        match manager.set_target_delegation().await? {
            ApplyOutcome::Applied { cleared, .. } => {
                println!();
                println!(
                    "Delegated everything to {} (cleared {} other delegation(s))",
                    manager.target(),
                    cleared
                );
                print_delegations(&manager.snapshot());
            }
            other => return Err(eyre!("Delegation update did not run: {:?}", other)),
        }
    }

    manager.close();
    session.close();
    Ok(())
}

fn print_session(display: &DisplaySession) {
    println!("Status:  {}", display.status);
    if let Some(name) = &display.name {
        println!("Name:    {}", name);
    }
    if let Some(short) = &display.short_address {
        println!("Address: {}", short);
    }
    if let Some(url) = &display.image_url {
        println!("Image:   {}", url);
    }
}

fn print_delegations(state: &DelegationState) {
    if state.delegations.is_empty() {
        println!("  (none)");
        return;
    }
    for delegation in &state.delegations {
        let row = DisplayDelegation::from(delegation);
        println!("  {:<24} {:>7}%", row.delegatee, row.percentage);
    }
    println!(
        "  {:<24} {:>7.2}%",
        "total",
        state.total_weight() as f64 / 100.0
    );
}

pub fn status(config_path: &Path, memory: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let marker = open_marker(memory)?;

    println!("Config file:        {}", config_path.display());
    println!(
        "Previous session:   {}",
        if marker.was_connected() { "yes" } else { "no" }
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn forget(memory: bool) -> Result<()> {
    open_marker(memory)?.clear()?;
    println!("Previous session forgotten");
    Ok(())
}

pub fn init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(eyre!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    config::save_config_to(&AppConfig::default(), config_path)?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}
