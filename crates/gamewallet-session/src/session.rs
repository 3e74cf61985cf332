//! Wallet session: connection state, durable marker and start-up restore.
//!
//! State is published through a `watch` channel. Every operation bumps a
//! session generation before its first await and re-checks it before
//! applying a result, so a `disconnect()` or `close()` that happens while a
//! wallet or profile call is pending makes that call's result a no-op.

use gamewallet_core::{Address, ConnectionStatus, Permission, Profile, SessionState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::capability::WalletCapability;
use crate::error::{CapabilityError, SessionError};
use crate::marker::MarkerStore;
use crate::profile::ProfileResolver;
use crate::retry::RetryPolicy;

/// How a start-up restore ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No durable marker, nothing to restore.
    NoPriorSession,
    /// No wallet in this environment.
    WalletUnavailable,
    /// The wallet still had our permissions; adopted without prompting.
    AlreadyAuthorized(Address),
    /// A reconnect attempt succeeded.
    Reconnected { address: Address, attempt: u32 },
    /// Every attempt failed. The marker is left in place.
    Exhausted,
    /// Superseded by `connect`/`disconnect`, or the session was closed.
    Cancelled,
}

impl RestoreOutcome {
    pub fn address(&self) -> Option<&Address> {
        match self {
            RestoreOutcome::AlreadyAuthorized(address)
            | RestoreOutcome::Reconnected { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// Handle to the wallet session. Clones share the same session.
#[derive(Clone)]
pub struct WalletSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    wallet: Option<Arc<dyn WalletCapability>>,
    resolver: ProfileResolver,
    marker: Arc<dyn MarkerStore>,
    restore_policy: RetryPolicy,
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl WalletSession {
    /// `wallet` is `None` when no wallet is injected in this environment.
    pub fn new(
        wallet: Option<Arc<dyn WalletCapability>>,
        resolver: ProfileResolver,
        marker: Arc<dyn MarkerStore>,
        restore_policy: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                wallet,
                resolver,
                marker,
                restore_policy,
                state,
                generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().connected()
    }

    pub fn address(&self) -> Option<Address> {
        self.inner.state.borrow().active_address().cloned()
    }

    /// Prompt the wallet for access and adopt its active address.
    ///
    /// The profile is fetched in the background; a failed lookup leaves the
    /// session connected with no profile.
    pub async fn connect(&self) -> Result<Address, SessionError> {
        let Some(wallet) = self.inner.wallet.clone() else {
            tracing::warn!("Wallet not found, cannot connect");
            return Err(SessionError::WalletUnavailable);
        };
        if self.inner.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let generation = self.inner.begin(ConnectionStatus::Connecting);
        tracing::info!("Connecting to wallet...");

        match authorize(wallet.as_ref()).await {
            Ok(address) => {
                if !self.inner.is_current(generation) {
                    tracing::debug!("Discarding wallet connection for {}", address);
                    return Err(SessionError::Cancelled);
                }
                tracing::info!("Connected to wallet: {}", address);
                self.adopt(address.clone(), generation);
                Ok(address)
            }
            Err(e) => {
                tracing::error!("Error connecting wallet: {}", e);
                if self.inner.is_current(generation) {
                    self.inner.state.send_replace(SessionState::default());
                    if let Err(marker_err) = self.inner.marker.clear() {
                        tracing::warn!("Failed to clear session marker: {}", marker_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Reset to the initial state and forget the durable marker.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_replace(SessionState::default());
        if let Err(e) = self.inner.marker.clear() {
            tracing::warn!("Failed to clear session marker: {}", e);
        }
        tracing::info!("Wallet disconnected");
    }

    /// Re-establish a session from a previous run.
    ///
    /// Adopts an existing authorization silently if the wallet still has it,
    /// otherwise makes up to `max_attempts` connect attempts on the linear
    /// backoff schedule. Failures are logged, never returned.
    pub async fn restore(&self) -> RestoreOutcome {
        if !self.inner.marker.was_connected() {
            tracing::debug!("No previous wallet session to restore");
            return RestoreOutcome::NoPriorSession;
        }
        let Some(wallet) = self.inner.wallet.clone() else {
            tracing::info!("Wallet not found, skipping session restore");
            return RestoreOutcome::WalletUnavailable;
        };
        if self.inner.cancel.is_cancelled() {
            return RestoreOutcome::Cancelled;
        }

        let generation = self.inner.begin(ConnectionStatus::Restoring);
        let policy = self.inner.restore_policy;
        tracing::info!("Checking existing wallet connection...");

        for attempt in policy.attempts() {
            if attempt > 1 {
                tracing::info!(
                    "Scheduling retry {} of {} in {}ms",
                    attempt,
                    policy.max_attempts,
                    policy.delay_before(attempt).as_millis()
                );
            }
            if !policy.wait_before(attempt, &self.inner.cancel).await
                || !self.inner.is_current(generation)
            {
                return RestoreOutcome::Cancelled;
            }

            if let Some(address) = existing_authorization(wallet.as_ref()).await {
                if !self.inner.is_current(generation) {
                    return RestoreOutcome::Cancelled;
                }
                tracing::info!("Wallet already connected: {}", address);
                self.adopt(address.clone(), generation);
                return RestoreOutcome::AlreadyAuthorized(address);
            }

            tracing::info!(
                "Auto-reconnect attempt {} of {}...",
                attempt,
                policy.max_attempts
            );
            match authorize(wallet.as_ref()).await {
                Ok(address) => {
                    if !self.inner.is_current(generation) {
                        return RestoreOutcome::Cancelled;
                    }
                    tracing::info!("Auto-reconnect successful: {}", address);
                    self.adopt(address.clone(), generation);
                    return RestoreOutcome::Reconnected { address, attempt };
                }
                Err(SessionError::WalletUnavailable) => {
                    tracing::info!("Wallet went away during restore, giving up");
                    self.inner.reset_if_current(generation);
                    return RestoreOutcome::WalletUnavailable;
                }
                Err(e) => {
                    tracing::warn!("Auto-reconnect attempt failed: {}", e);
                }
            }
        }

        tracing::warn!(
            "Could not restore wallet session after {} attempts",
            policy.max_attempts
        );
        if self.inner.reset_if_current(generation) {
            RestoreOutcome::Exhausted
        } else {
            RestoreOutcome::Cancelled
        }
    }

    /// Resolve the profile of the connected address now, waiting for it.
    ///
    /// Returns the cached profile when there is one.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let address = self.address()?;
        let profile = self.inner.resolver.resolve(&address).await?;
        if self.inner.is_current(generation) {
            self.inner.apply_profile(&address, profile.clone());
        }
        Some(profile)
    }

    /// Stop all pending work. Results arriving afterwards are dropped.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        tracing::debug!("Wallet session closed");
    }

    /// Enter `Connected`, persist the marker and start the profile fetch.
    fn adopt(&self, address: Address, generation: u64) {
        self.inner
            .state
            .send_replace(SessionState::connected_as(address.clone()));
        if let Err(e) = self.inner.marker.set_connected() {
            tracing::warn!("Failed to persist session marker: {}", e);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let profile = inner.resolver.resolve(&address).await;
            if !inner.is_current(generation) {
                tracing::debug!("Discarding profile for {} (session changed)", address);
                return;
            }
            match profile {
                Some(profile) => inner.apply_profile(&address, profile),
                None => tracing::warn!("No profile for {}, continuing without one", address),
            }
        });
    }
}

impl SessionInner {
    /// Start a new operation: bump the generation and publish `status`.
    fn begin(&self, status: ConnectionStatus) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(SessionState::pending(status));
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.cancel.is_cancelled() && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Back to `Disconnected` without touching the marker.
    fn reset_if_current(&self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.state.send_replace(SessionState::default());
            true
        } else {
            false
        }
    }

    fn apply_profile(&self, address: &Address, profile: Profile) {
        self.state.send_if_modified(|state| {
            if state.active_address() == Some(address) && state.profile.as_ref() != Some(&profile)
            {
                state.profile = Some(profile);
                true
            } else {
                false
            }
        });
    }
}

/// Prompting connect, then read the active address.
async fn authorize(wallet: &dyn WalletCapability) -> Result<Address, SessionError> {
    wallet
        .connect(Permission::requested())
        .await
        .map_err(authorization_error)?;
    let address = wallet
        .active_address()
        .await
        .map_err(authorization_error)?;
    if address.is_empty() {
        return Err(SessionError::AuthorizationFailed(
            "No address returned from wallet".to_string(),
        ));
    }
    Ok(address)
}

/// Non-prompting check for a grant that survived the restart.
async fn existing_authorization(wallet: &dyn WalletCapability) -> Option<Address> {
    let permissions = match wallet.permissions().await {
        Ok(permissions) => permissions,
        Err(e) => {
            tracing::warn!("Error checking existing connection: {}", e);
            return None;
        }
    };
    if !permissions.contains(&Permission::AccessAddress) {
        return None;
    }
    match wallet.active_address().await {
        Ok(address) if !address.is_empty() => Some(address),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Error reading active address: {}", e);
            None
        }
    }
}

fn authorization_error(err: CapabilityError) -> SessionError {
    match err {
        CapabilityError::Unavailable => SessionError::WalletUnavailable,
        other => SessionError::AuthorizationFailed(other.to_string()),
    }
}
