//! In-process wallet, profile registry and ledger.
//!
//! Scriptable stand-ins for the remote services, used by the CLI's offline
//! mode and by tests. Failures and latency are configured up front; every
//! ledger call is recorded in a journal so call order can be asserted.

use async_trait::async_trait;
use gamewallet_core::{Address, BasisPoints, Permission, Profile};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::capability::{
    DelegationLedger, DelegationPref, DelegationUpdate, ProfileLookup, RawDelegationRecord,
    WalletCapability, parse_delegation_prefs,
};
use crate::error::CapabilityError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[derive(Debug, Default)]
struct WalletState {
    granted: Vec<Permission>,
    rejections_left: u32,
    connect_calls: u32,
}

/// Wallet holding a single account.
#[derive(Debug)]
pub struct SandboxWallet {
    address: Address,
    latency: Duration,
    state: Mutex<WalletState>,
}

impl SandboxWallet {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            latency: Duration::ZERO,
            state: Mutex::new(WalletState::default()),
        }
    }

    /// Reject the next `count` connect prompts.
    pub fn with_rejections(self, count: u32) -> Self {
        lock(&self.state).rejections_left = count;
        self
    }

    /// Start with the requested permissions already granted.
    pub fn pre_authorized(self) -> Self {
        lock(&self.state).granted = Permission::requested().to_vec();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connect_calls
    }

    /// Forget every granted permission.
    pub fn revoke(&self) {
        lock(&self.state).granted.clear();
    }
}

#[async_trait]
impl WalletCapability for SandboxWallet {
    async fn connect(&self, permissions: &[Permission]) -> Result<(), CapabilityError> {
        lock(&self.state).connect_calls += 1;
        simulate_latency(self.latency).await;

        let mut state = lock(&self.state);
        if state.rejections_left > 0 {
            state.rejections_left -= 1;
            return Err(CapabilityError::Rejected(
                "User rejected the request".to_string(),
            ));
        }
        for permission in permissions {
            if !state.granted.contains(permission) {
                state.granted.push(*permission);
            }
        }
        Ok(())
    }

    async fn active_address(&self) -> Result<Address, CapabilityError> {
        if lock(&self.state)
            .granted
            .contains(&Permission::AccessAddress)
        {
            Ok(self.address.clone())
        } else {
            Err(CapabilityError::Rejected(format!(
                "{} not granted",
                Permission::AccessAddress
            )))
        }
    }

    async fn permissions(&self) -> Result<Vec<Permission>, CapabilityError> {
        Ok(lock(&self.state).granted.clone())
    }
}

/// Profile registry backed by a map.
#[derive(Debug, Default)]
pub struct SandboxProfiles {
    profiles: HashMap<Address, Profile>,
    latency: Duration,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl SandboxProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, address: impl Into<Address>, profile: Profile) -> Self {
        self.profiles.insert(address.into(), profile);
        self
    }

    /// Fail the next `count` lookups with a remote error.
    pub fn with_failures(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileLookup for SandboxProfiles {
    async fn lookup(&self, address: &Address) -> Result<Profile, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(self.latency).await;

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CapabilityError::Remote("Profile registry timeout".to_string()));
        }
        self.profiles
            .get(address)
            .cloned()
            .ok_or_else(|| {
                CapabilityError::Remote(format!("No profile registered for {}", address))
            })
    }
}

/// One recorded ledger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Read(Address),
    UpdateStarted(DelegationUpdate),
    UpdateFinished { update: DelegationUpdate, ok: bool },
}

/// Delegation ledger keyed by delegating address.
///
/// Entries keep insertion order. Setting a weight of zero removes the entry.
#[derive(Debug, Default)]
pub struct SandboxLedger {
    records: Mutex<HashMap<Address, Vec<(Address, i64)>>>,
    failing_delegatees: HashSet<Address>,
    failing_reads: AtomicU32,
    read_calls: AtomicU32,
    latency: Duration,
    journal: Mutex<Vec<LedgerEvent>>,
}

impl SandboxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw factor; values outside 0..=10000 are stored as given.
    pub fn with_delegation(
        self,
        from: impl Into<Address>,
        to: impl Into<Address>,
        factor: i64,
    ) -> Self {
        lock(&self.records)
            .entry(from.into())
            .or_default()
            .push((to.into(), factor));
        self
    }

    /// Reject every update that targets `delegatee`.
    pub fn with_failing_delegatee(mut self, delegatee: impl Into<Address>) -> Self {
        self.failing_delegatees.insert(delegatee.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` reads with a remote error.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn read_calls(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<LedgerEvent> {
        lock(&self.journal).clone()
    }

    /// Updates that completed successfully, in completion order.
    pub fn updates(&self) -> Vec<DelegationUpdate> {
        lock(&self.journal)
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::UpdateFinished { update, ok: true } => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current weights for `from`, clamped the way a reader would see them.
    pub fn weights(&self, from: &Address) -> Vec<(Address, BasisPoints)> {
        lock(&self.records)
            .get(from)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(to, factor)| (to.clone(), BasisPoints::clamped(*factor)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record(&self, event: LedgerEvent) {
        lock(&self.journal).push(event);
    }
}

#[async_trait]
impl DelegationLedger for SandboxLedger {
    async fn get_delegation(
        &self,
        address: &Address,
    ) -> Result<Option<RawDelegationRecord>, CapabilityError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.record(LedgerEvent::Read(address.clone()));
        simulate_latency(self.latency).await;

        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CapabilityError::Remote("Ledger unreachable".to_string()));
        }

        let records = lock(&self.records);
        Ok(records.get(address).map(|entries| {
            let prefs: Vec<_> = entries
                .iter()
                .map(|(to, factor)| json!({"walletTo": to, "factor": factor}))
                .collect();
            RawDelegationRecord(json!({ "delegationPrefs": prefs }))
        }))
    }

    fn parse_delegation_info(
        &self,
        record: &RawDelegationRecord,
    ) -> Result<Vec<DelegationPref>, CapabilityError> {
        parse_delegation_prefs(record)
    }

    async fn set_delegation(&self, update: DelegationUpdate) -> Result<(), CapabilityError> {
        self.record(LedgerEvent::UpdateStarted(update.clone()));
        simulate_latency(self.latency).await;

        if self.failing_delegatees.contains(&update.wallet_to) {
            self.record(LedgerEvent::UpdateFinished {
                update: update.clone(),
                ok: false,
            });
            return Err(CapabilityError::Remote(format!(
                "Delegation to {} rejected",
                update.wallet_to
            )));
        }

        {
            let mut records = lock(&self.records);
            let entries = records.entry(update.wallet_from.clone()).or_default();
            let existing = entries.iter().position(|(to, _)| to == &update.wallet_to);
            match (existing, update.factor.is_zero()) {
                (Some(index), true) => {
                    entries.remove(index);
                }
                (Some(index), false) => entries[index].1 = i64::from(update.factor.get()),
                (None, true) => {}
                (None, false) => {
                    entries.push((update.wallet_to.clone(), i64::from(update.factor.get())));
                }
            }
        }
        self.record(LedgerEvent::UpdateFinished { update, ok: true });
        Ok(())
    }
}
