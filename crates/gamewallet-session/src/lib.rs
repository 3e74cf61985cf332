//! Wallet session and delegation management.
//!
//! This crate provides:
//! - Capability traits for the wallet, profile registry and delegation ledger
//! - `WalletSession`: connect, disconnect and start-up restore with backoff
//! - `ProfileResolver`: cached profile lookups with linear-backoff retry
//! - `DelegationManager`: delegation fetch and the two-phase target update
//! - Sandbox capability implementations for offline runs and tests

pub mod cache;
pub mod capability;
pub mod delegation;
pub mod error;
pub mod marker;
pub mod profile;
pub mod retry;
pub mod sandbox;
pub mod session;

pub use cache::ProfileCache;
pub use capability::{
    DelegationLedger, DelegationPref, DelegationUpdate, ProfileLookup, RawDelegationRecord,
    WalletCapability,
};
pub use delegation::{ApplyOutcome, DelegationManager, FetchOutcome};
pub use error::{ApplyPhase, CapabilityError, MarkerError, SessionError};
pub use marker::{FileMarkerStore, MarkerStore, MemoryMarkerStore};
pub use profile::ProfileResolver;
pub use retry::RetryPolicy;
pub use session::{RestoreOutcome, WalletSession};
