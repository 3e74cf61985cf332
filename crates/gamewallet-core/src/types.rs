//! Core domain types for wallet sessions and delegation.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Opaque wallet identifier. Only ever compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wallets occasionally hand back an empty string instead of failing.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Delegation weight in basis points (10000 = 100%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BasisPoints(u16);

impl BasisPoints {
    pub const ZERO: BasisPoints = BasisPoints(0);
    pub const FULL: BasisPoints = BasisPoints(10_000);

    /// Returns `None` if `value` exceeds 10000.
    pub fn new(value: u16) -> Option<Self> {
        (value <= Self::FULL.0).then_some(Self(value))
    }

    /// Clamp an untrusted ledger factor into `[0, 10000]`.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, Self::FULL.0 as i64) as u16)
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    /// Weight as a percentage (0.0 to 100.0).
    pub fn percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bps", self.0)
    }
}

/// Social identity record attached to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name chosen by the profile owner.
    pub display_name: String,
    /// Content id of the profile image, if any.
    pub image_ref: Option<String>,
}

impl Profile {
    pub fn new(display_name: impl Into<String>, image_ref: Option<String>) -> Self {
        Self {
            display_name: display_name.into(),
            image_ref,
        }
    }
}

/// Permission requested from the wallet on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    AccessAddress,
    SignTransaction,
}

impl Permission {
    /// Wire name understood by the wallet extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AccessAddress => "ACCESS_ADDRESS",
            Permission::SignTransaction => "SIGN_TRANSACTION",
        }
    }

    /// Permissions requested by every connect attempt.
    pub fn requested() -> &'static [Permission] {
        &[Permission::AccessAddress, Permission::SignTransaction]
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCESS_ADDRESS" => Ok(Permission::AccessAddress),
            "SIGN_TRANSACTION" => Ok(Permission::SignTransaction),
            other => Err(format!("Unknown permission '{}'", other)),
        }
    }
}

/// Connection status of the wallet session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Only entered by the start-up restore routine.
    Restoring,
    Connected,
}

impl ConnectionStatus {
    /// Get display label.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Restoring => "Restoring",
            ConnectionStatus::Connected => "Connected",
        }
    }
}

/// Snapshot of the wallet session.
///
/// `address` and `profile` are only ever `Some` while connected. A connected
/// session may still have no profile (lookup pending or failed).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub address: Option<Address>,
    pub profile: Option<Profile>,
}

impl SessionState {
    /// A freshly connected session without a profile yet.
    pub fn connected_as(address: Address) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            address: Some(address),
            profile: None,
        }
    }

    /// A transitional state (connecting or restoring) with nothing adopted.
    pub fn pending(status: ConnectionStatus) -> Self {
        Self {
            status,
            address: None,
            profile: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// The active address, only when connected.
    pub fn active_address(&self) -> Option<&Address> {
        if self.connected() {
            self.address.as_ref()
        } else {
            None
        }
    }
}

/// One delegation entry as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegatee: Address,
    pub weight: BasisPoints,
}

impl Delegation {
    pub fn new(delegatee: impl Into<Address>, weight: BasisPoints) -> Self {
        Self {
            delegatee: delegatee.into(),
            weight,
        }
    }
}

/// Lifecycle of one logical async operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationState {
    #[default]
    Idle = 0,
    InFlight = 1,
    Succeeded = 2,
    Failed = 3,
}

impl OperationState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, OperationState::InFlight)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of `as_u8`. Unknown values map to `Idle`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => OperationState::InFlight,
            2 => OperationState::Succeeded,
            3 => OperationState::Failed,
            _ => OperationState::Idle,
        }
    }

    /// Get display label.
    pub fn label(&self) -> &'static str {
        match self {
            OperationState::Idle => "Idle",
            OperationState::InFlight => "In flight",
            OperationState::Succeeded => "Succeeded",
            OperationState::Failed => "Failed",
        }
    }
}

/// Delegation view for the connected address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelegationState {
    /// Address the list was fetched for. `None` when the list is empty
    /// because nothing has been loaded for the current session.
    pub owner: Option<Address>,
    /// Replaced wholesale on every fetch.
    pub delegations: Vec<Delegation>,
    pub fetch: OperationState,
    pub apply: OperationState,
}

impl DelegationState {
    /// Whether the list was loaded for `address`.
    pub fn is_owned_by(&self, address: &Address) -> bool {
        self.owner.as_ref() == Some(address)
    }

    /// Forget the list and its owner.
    pub fn reset_delegations(&mut self) -> bool {
        let changed = self.owner.is_some() || !self.delegations.is_empty();
        self.owner = None;
        self.delegations.clear();
        changed
    }

    /// True while a fetch is running.
    pub fn loading(&self) -> bool {
        self.fetch.is_in_flight()
    }

    /// True while the target delegation is being applied.
    pub fn applying(&self) -> bool {
        self.apply.is_in_flight()
    }

    /// Weight currently delegated to `delegatee`, if any.
    pub fn weight_for(&self, delegatee: &Address) -> Option<BasisPoints> {
        self.delegations
            .iter()
            .find(|d| &d.delegatee == delegatee)
            .map(|d| d.weight)
    }

    /// Sum of all weights. Not required to equal 10000.
    pub fn total_weight(&self) -> u32 {
        self.delegations.iter().map(|d| d.weight.get() as u32).sum()
    }

    /// Whether `target` holds the full weight and every other entry is zero.
    pub fn is_fully_delegated_to(&self, target: &Address) -> bool {
        self.weight_for(target) == Some(BasisPoints::FULL)
            && self
                .delegations
                .iter()
                .filter(|d| &d.delegatee != target)
                .all(|d| d.weight.is_zero())
    }
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn clamped_is_always_in_range(raw in any::<i64>()) {
            let bps = BasisPoints::clamped(raw);
            prop_assert!(bps.get() <= 10_000);
            if (0..=10_000).contains(&raw) {
                prop_assert_eq!(i64::from(bps.get()), raw);
            }
        }

        #[test]
        fn operation_state_u8_roundtrip(value in 0u8..4) {
            prop_assert_eq!(OperationState::from_u8(value).as_u8(), value);
        }
    }
}
