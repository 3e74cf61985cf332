//! Delegation view and the "delegate everything to the target" action.
//!
//! The manager follows the wallet session through a `watch` receiver and
//! never writes back to it.

use futures::future::try_join_all;
use gamewallet_core::{
    Address, BasisPoints, Delegation, DelegationState, OperationState, SessionState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capability::{DelegationLedger, DelegationUpdate};
use crate::error::{ApplyPhase, CapabilityError, SessionError};

/// Result of `fetch_delegations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    NotConnected,
    /// Another fetch was running; this call did nothing.
    AlreadyInFlight,
    /// Delegations replaced with `n` entries.
    Loaded(usize),
    /// The ledger call failed; delegations are now empty.
    Failed,
    /// The session changed or the manager closed while fetching.
    Discarded,
}

/// Result of a successful `set_target_delegation` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    NotConnected,
    /// An apply was already running; this call did nothing.
    AlreadyApplying,
    Applied {
        /// Number of other delegatees zeroed.
        cleared: usize,
        refresh: FetchOutcome,
    },
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Fetch,
    Apply,
}

impl Operation {
    fn publish(self, state: &watch::Sender<DelegationState>, value: OperationState) {
        state.send_modify(|s| match self {
            Operation::Fetch => s.fetch = value,
            Operation::Apply => s.apply = value,
        });
    }
}

/// Holds the in-flight flag of one operation until finished or dropped.
struct InFlightGuard<'a> {
    flag: &'a AtomicU8,
    state: &'a watch::Sender<DelegationState>,
    operation: Operation,
    finished: bool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(
        flag: &'a AtomicU8,
        state: &'a watch::Sender<DelegationState>,
        operation: Operation,
    ) -> Option<Self> {
        let in_flight = OperationState::InFlight.as_u8();
        let previous = flag
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != in_flight).then_some(in_flight)
            })
            .ok()?;
        tracing::trace!(
            "{:?} started (previous run: {})",
            operation,
            OperationState::from_u8(previous).label()
        );
        operation.publish(state, OperationState::InFlight);
        Some(Self {
            flag,
            state,
            operation,
            finished: false,
        })
    }

    fn finish(mut self, outcome: OperationState) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: OperationState) {
        self.finished = true;
        self.flag.store(outcome.as_u8(), Ordering::SeqCst);
        self.operation.publish(self.state, outcome);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.release(OperationState::Idle);
        }
    }
}

/// Fetches and rewrites the connected address's delegations.
#[derive(Clone)]
pub struct DelegationManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    ledger: Arc<dyn DelegationLedger>,
    session: watch::Receiver<SessionState>,
    target: Address,
    fetch_delay: Duration,
    state: watch::Sender<DelegationState>,
    fetch_flag: AtomicU8,
    apply_flag: AtomicU8,
    cancel: CancellationToken,
}

impl DelegationManager {
    /// `fetch_delay` is how long `watch_session` waits after a connect before
    /// fetching.
    pub fn new(
        ledger: Arc<dyn DelegationLedger>,
        session: watch::Receiver<SessionState>,
        target: Address,
        fetch_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(DelegationState::default());
        Self {
            inner: Arc::new(ManagerInner {
                ledger,
                session,
                target,
                fetch_delay,
                state,
                fetch_flag: AtomicU8::new(OperationState::Idle.as_u8()),
                apply_flag: AtomicU8::new(OperationState::Idle.as_u8()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn target(&self) -> &Address {
        &self.inner.target
    }

    pub fn subscribe(&self) -> watch::Receiver<DelegationState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> DelegationState {
        self.inner.state.borrow().clone()
    }

    fn connected_address(&self) -> Option<Address> {
        self.inner.session.borrow().active_address().cloned()
    }

    /// Replace the delegation list with what the ledger reports.
    ///
    /// A second call while one is running is a no-op. On failure the list is
    /// cleared and the error logged.
    pub async fn fetch_delegations(&self) -> FetchOutcome {
        let Some(address) = self.connected_address() else {
            tracing::debug!("Not connected, skipping delegation fetch");
            return FetchOutcome::NotConnected;
        };
        let Some(guard) =
            InFlightGuard::acquire(&self.inner.fetch_flag, &self.inner.state, Operation::Fetch)
        else {
            tracing::debug!("Delegation fetch already in flight, skipping");
            return FetchOutcome::AlreadyInFlight;
        };

        tracing::debug!("Fetching delegations for {}", address);
        let result = self.load(&address).await;

        let current = self.connected_address();
        if self.inner.cancel.is_cancelled() || current.as_ref() != Some(&address) {
            tracing::debug!("Discarding delegations for {} (session changed)", address);
            self.drop_stale(current.as_ref());
            return FetchOutcome::Discarded;
        }

        match result {
            Ok(delegations) => {
                let count = delegations.len();
                tracing::info!("Loaded {} delegations for {}", count, address);
                self.publish_list(address, delegations);
                guard.finish(OperationState::Succeeded);
                FetchOutcome::Loaded(count)
            }
            Err(e) => {
                let err = SessionError::DelegationFetchFailed(e);
                tracing::error!("Error fetching delegations: {}", err);
                self.inner.state.send_modify(|s| {
                    s.reset_delegations();
                });
                guard.finish(OperationState::Failed);
                FetchOutcome::Failed
            }
        }
    }

    fn publish_list(&self, owner: Address, delegations: Vec<Delegation>) {
        self.inner.state.send_modify(|s| {
            s.owner = Some(owner);
            s.delegations = delegations;
        });
    }

    /// Clear a list that belongs to some address other than `current`.
    fn drop_stale(&self, current: Option<&Address>) {
        self.inner.state.send_if_modified(|s| match current {
            Some(address) if s.is_owned_by(address) => false,
            _ => s.reset_delegations(),
        });
    }

    async fn load(&self, address: &Address) -> Result<Vec<Delegation>, CapabilityError> {
        let Some(record) = self.inner.ledger.get_delegation(address).await? else {
            return Ok(Vec::new());
        };
        let prefs = self.inner.ledger.parse_delegation_info(&record)?;
        Ok(prefs.iter().map(Delegation::from).collect())
    }

    /// Make the target the sole delegatee.
    ///
    /// Zeroes every other delegatee in the current list concurrently, then
    /// sets the target to full weight, then re-fetches. The target is never
    /// written if any zeroing fails. When the list was not loaded for the
    /// connected address it is read from the ledger first.
    pub async fn set_target_delegation(&self) -> Result<ApplyOutcome, SessionError> {
        let Some(address) = self.connected_address() else {
            tracing::warn!("Not connected, cannot update delegations");
            return Ok(ApplyOutcome::NotConnected);
        };
        let Some(guard) =
            InFlightGuard::acquire(&self.inner.apply_flag, &self.inner.state, Operation::Apply)
        else {
            tracing::warn!("Delegation update already in progress");
            return Ok(ApplyOutcome::AlreadyApplying);
        };

        let target = &self.inner.target;
        let delegations = match self.delegations_of(&address).await {
            Ok(delegations) => delegations,
            Err(source) => {
                guard.finish(OperationState::Failed);
                let err = SessionError::DelegationFetchFailed(source);
                tracing::error!("Error reading delegations before update: {}", err);
                return Err(err);
            }
        };
        let others: Vec<Address> = delegations
            .into_iter()
            .filter(|d| &d.delegatee != target)
            .map(|d| d.delegatee)
            .collect();

        tracing::info!(
            "Delegating all weight from {} to {} (clearing {} others)",
            address,
            target,
            others.len()
        );

        let clears = others.iter().map(|delegatee| {
            self.inner.ledger.set_delegation(DelegationUpdate {
                wallet_from: address.clone(),
                wallet_to: delegatee.clone(),
                factor: BasisPoints::ZERO,
            })
        });
        if let Err(source) = try_join_all(clears).await {
            return Err(self.apply_failed(guard, ApplyPhase::ClearOthers, source));
        }

        let update = DelegationUpdate {
            wallet_from: address.clone(),
            wallet_to: target.clone(),
            factor: BasisPoints::FULL,
        };
        if let Err(source) = self.inner.ledger.set_delegation(update).await {
            return Err(self.apply_failed(guard, ApplyPhase::SetTarget, source));
        }

        let refresh = self.fetch_delegations().await;
        guard.finish(OperationState::Succeeded);
        tracing::info!("Delegation to {} applied", target);
        Ok(ApplyOutcome::Applied {
            cleared: others.len(),
            refresh,
        })
    }

    /// The list for `address`: the local one if it was loaded for that
    /// address, otherwise a fresh ledger read.
    async fn delegations_of(
        &self,
        address: &Address,
    ) -> Result<Vec<Delegation>, CapabilityError> {
        {
            let state = self.inner.state.borrow();
            if state.is_owned_by(address) {
                return Ok(state.delegations.clone());
            }
        }
        tracing::debug!("Delegation list is not for {}, reading ledger", address);
        let delegations = self.load(address).await?;
        if self.connected_address().as_ref() == Some(address) {
            self.publish_list(address.clone(), delegations.clone());
        }
        Ok(delegations)
    }

    fn apply_failed(
        &self,
        guard: InFlightGuard<'_>,
        phase: ApplyPhase,
        source: CapabilityError,
    ) -> SessionError {
        guard.finish(OperationState::Failed);
        let err = SessionError::DelegationApplyFailed { phase, source };
        tracing::error!("Error updating delegation: {}", err);
        err
    }

    /// Drop the delegation list without touching the ledger.
    pub fn clear(&self) {
        self.inner.state.send_if_modified(|s| s.reset_delegations());
    }

    /// Follow the session: fetch `fetch_delay` after every connect or address
    /// change, clear on disconnect. The previous list is dropped as soon as
    /// the address changes. Runs until `close()`.
    pub fn watch_session(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut session = self.inner.session.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            let mut last: Option<Address> = None;
            loop {
                let current = session.borrow_and_update().active_address().cloned();
                if current != last {
                    manager.drop_stale(current.as_ref());
                    if let Some(address) = &current {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(manager.inner.fetch_delay) => {}
                        }
                        if manager.connected_address().as_ref() == Some(address) {
                            manager.fetch_delegations().await;
                        }
                    }
                    last = current;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Delegation session watcher stopped");
        })
    }

    /// Stop the watcher and drop any results still in flight.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLedger;
    use pretty_assertions::assert_eq;

    fn manager_for(
        ledger: Arc<SandboxLedger>,
        session: watch::Receiver<SessionState>,
    ) -> DelegationManager {
        DelegationManager::new(
            ledger,
            session,
            Address::from("GAME"),
            Duration::from_millis(500),
        )
    }

    fn connected(address: &str) -> (watch::Sender<SessionState>, watch::Receiver<SessionState>) {
        watch::channel(SessionState::connected_as(Address::from(address)))
    }

    #[tokio::test]
    async fn test_fetch_when_disconnected_is_noop() {
        let ledger = Arc::new(SandboxLedger::new());
        let (_tx, rx) = watch::channel(SessionState::default());
        let manager = manager_for(ledger.clone(), rx);

        assert_eq!(manager.fetch_delegations().await, FetchOutcome::NotConnected);
        assert_eq!(ledger.read_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_loads_and_clamps() {
        let ledger = Arc::new(
            SandboxLedger::new()
                .with_delegation("addr1", "A", 3000)
                .with_delegation("addr1", "B", 12_000),
        );
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);

        assert_eq!(manager.fetch_delegations().await, FetchOutcome::Loaded(2));

        let state = manager.snapshot();
        assert_eq!(state.fetch, OperationState::Succeeded);
        assert_eq!(state.weight_for(&Address::from("A")), BasisPoints::new(3000));
        assert_eq!(state.weight_for(&Address::from("B")), Some(BasisPoints::FULL));
    }

    #[tokio::test]
    async fn test_no_record_means_empty_list() {
        let ledger = Arc::new(SandboxLedger::new());
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);

        assert_eq!(manager.fetch_delegations().await, FetchOutcome::Loaded(0));
        assert!(manager.snapshot().delegations.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_clears_list() {
        let ledger = Arc::new(SandboxLedger::new().with_delegation("addr1", "A", 5000));
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger.clone(), rx);
        manager.fetch_delegations().await;
        assert_eq!(manager.snapshot().delegations.len(), 1);

        ledger.fail_next_reads(1);
        assert_eq!(manager.fetch_delegations().await, FetchOutcome::Failed);

        let state = manager.snapshot();
        assert!(state.delegations.is_empty());
        assert_eq!(state.fetch, OperationState::Failed);
        assert!(!state.loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetch_is_skipped() {
        let ledger = Arc::new(
            SandboxLedger::new()
                .with_latency(Duration::from_millis(100))
                .with_delegation("addr1", "A", 5000),
        );
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger.clone(), rx);

        let (first, second) =
            tokio::join!(manager.fetch_delegations(), manager.fetch_delegations());

        assert_eq!(first, FetchOutcome::Loaded(1));
        assert_eq!(second, FetchOutcome::AlreadyInFlight);
        assert_eq!(ledger.read_calls(), 1);
        assert!(!manager.snapshot().loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_releases_loading_flag() {
        let ledger = Arc::new(SandboxLedger::new().with_latency(Duration::from_millis(100)));
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);

        let mut fetch = tokio_test::task::spawn(manager.fetch_delegations());
        tokio_test::assert_pending!(fetch.poll());
        assert!(manager.snapshot().loading());

        drop(fetch);
        assert!(!manager.snapshot().loading());
        assert_eq!(manager.fetch_delegations().await, FetchOutcome::Loaded(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_discarded_after_disconnect() {
        let ledger = Arc::new(
            SandboxLedger::new()
                .with_latency(Duration::from_millis(100))
                .with_delegation("addr1", "A", 5000),
        );
        let (tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);

        let disconnect = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_replace(SessionState::default());
        };
        let (outcome, _) = tokio::join!(manager.fetch_delegations(), disconnect);

        assert_eq!(outcome, FetchOutcome::Discarded);
        let state = manager.snapshot();
        assert!(state.delegations.is_empty());
        assert_eq!(state.owner, None);
        assert_eq!(state.fetch, OperationState::Idle);
    }

    #[tokio::test]
    async fn test_apply_when_disconnected() {
        let ledger = Arc::new(SandboxLedger::new());
        let (_tx, rx) = watch::channel(SessionState::default());
        let manager = manager_for(ledger.clone(), rx);

        assert_eq!(
            manager.set_target_delegation().await,
            Ok(ApplyOutcome::NotConnected)
        );
        assert!(ledger.updates().is_empty());
    }

    #[tokio::test]
    async fn test_apply_with_empty_list_sets_target_only() {
        let ledger = Arc::new(SandboxLedger::new());
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger.clone(), rx);

        let outcome = manager.set_target_delegation().await.unwrap();

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                cleared: 0,
                refresh: FetchOutcome::Loaded(1),
            }
        );
        assert_eq!(ledger.updates().len(), 1);
        assert!(manager.snapshot().is_fully_delegated_to(&Address::from("GAME")));
    }

    #[tokio::test]
    async fn test_apply_set_target_failure_reports_phase() {
        let ledger = Arc::new(SandboxLedger::new().with_failing_delegatee("GAME"));
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);

        let err = manager.set_target_delegation().await.unwrap_err();

        assert_eq!(err.apply_phase(), Some(ApplyPhase::SetTarget));
        let state = manager.snapshot();
        assert_eq!(state.apply, OperationState::Failed);
        assert!(!state.applying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_apply_is_rejected_while_applying() {
        let ledger = Arc::new(SandboxLedger::new().with_latency(Duration::from_millis(50)));
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger.clone(), rx);

        let (first, second) = tokio::join!(
            manager.set_target_delegation(),
            manager.set_target_delegation()
        );

        assert!(matches!(first, Ok(ApplyOutcome::Applied { .. })));
        assert_eq!(second, Ok(ApplyOutcome::AlreadyApplying));
        assert_eq!(ledger.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_empties_list() {
        let ledger = Arc::new(SandboxLedger::new().with_delegation("addr1", "A", 5000));
        let (_tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);
        manager.fetch_delegations().await;

        manager.clear();
        assert!(manager.snapshot().delegations.is_empty());
    }

    fn switch_ledger() -> Arc<SandboxLedger> {
        Arc::new(
            SandboxLedger::new()
                .with_delegation("addr1", "A", 3000)
                .with_delegation("addr1", "B", 7000)
                .with_delegation("addr2", "C", 10_000),
        )
    }

    #[tokio::test]
    async fn test_apply_after_address_switch_clears_new_owner_delegatees() {
        let ledger = switch_ledger();
        let (tx, rx) = connected("addr1");
        let manager = manager_for(ledger.clone(), rx);
        assert_eq!(manager.fetch_delegations().await, FetchOutcome::Loaded(2));

        tx.send_replace(SessionState::connected_as(Address::from("addr2")));
        let outcome = manager.set_target_delegation().await.unwrap();

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                cleared: 1,
                refresh: FetchOutcome::Loaded(1),
            }
        );
        let addr2 = Address::from("addr2");
        assert_eq!(ledger.weights(&addr2), vec![(Address::from("GAME"), BasisPoints::FULL)]);
        assert!(
            ledger
                .updates()
                .iter()
                .all(|u| u.wallet_to.as_str() != "A" && u.wallet_to.as_str() != "B")
        );
        assert_eq!(ledger.weights(&Address::from("addr1")).len(), 2);

        let state = manager.snapshot();
        assert!(state.is_owned_by(&addr2));
        assert!(state.is_fully_delegated_to(&Address::from("GAME")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_drops_list_on_address_switch() {
        let ledger = switch_ledger();
        let (tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);
        let _watcher = manager.watch_session();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(manager.snapshot().is_owned_by(&Address::from("addr1")));
        assert_eq!(manager.snapshot().delegations.len(), 2);

        tx.send_replace(SessionState::connected_as(Address::from("addr2")));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let state = manager.snapshot();
        assert!(state.delegations.is_empty());
        assert_eq!(state.owner, None);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let state = manager.snapshot();
        assert!(state.is_owned_by(&Address::from("addr2")));
        assert_eq!(state.weight_for(&Address::from("C")), Some(BasisPoints::FULL));
        manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_discarded_after_switch_drops_old_list() {
        let ledger = Arc::new(
            SandboxLedger::new()
                .with_latency(Duration::from_millis(100))
                .with_delegation("addr1", "A", 3000)
                .with_delegation("addr2", "C", 10_000),
        );
        let (tx, rx) = connected("addr1");
        let manager = manager_for(ledger, rx);
        manager.fetch_delegations().await;
        assert!(manager.snapshot().is_owned_by(&Address::from("addr1")));

        let switch = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_replace(SessionState::connected_as(Address::from("addr2")));
        };
        let (outcome, _) = tokio::join!(manager.fetch_delegations(), switch);

        assert_eq!(outcome, FetchOutcome::Discarded);
        let state = manager.snapshot();
        assert!(state.delegations.is_empty());
        assert_eq!(state.owner, None);
    }

    #[tokio::test]
    async fn test_apply_fails_when_owner_read_fails() {
        let ledger = switch_ledger();
        let (tx, rx) = connected("addr1");
        let manager = manager_for(ledger.clone(), rx);
        manager.fetch_delegations().await;

        tx.send_replace(SessionState::connected_as(Address::from("addr2")));
        ledger.fail_next_reads(1);
        let err = manager.set_target_delegation().await.unwrap_err();

        assert!(matches!(err, SessionError::DelegationFetchFailed(_)));
        assert!(ledger.updates().is_empty());
        let state = manager.snapshot();
        assert_eq!(state.apply, OperationState::Failed);
        assert!(!state.applying());
    }
}
