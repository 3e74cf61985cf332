//! Capability interfaces for the wallet, profile and delegation services.
//!
//! The session never talks to a network directly. Each remote service is an
//! object-safe async trait so real clients and the sandbox implementations
//! are interchangeable.

use async_trait::async_trait;
use gamewallet_core::{Address, BasisPoints, Delegation, Permission, Profile};
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// Injected wallet extension.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Ask the user to authorize `permissions`. May prompt.
    async fn connect(&self, permissions: &[Permission]) -> Result<(), CapabilityError>;

    /// Address of the active wallet account.
    async fn active_address(&self) -> Result<Address, CapabilityError>;

    /// Permissions already granted to this application. Never prompts.
    async fn permissions(&self) -> Result<Vec<Permission>, CapabilityError>;
}

/// Remote profile registry.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn lookup(&self, address: &Address) -> Result<Profile, CapabilityError>;
}

/// Opaque delegation record as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDelegationRecord(pub serde_json::Value);

/// One parsed delegation preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationPref {
    pub wallet_to: Address,
    /// Weight in basis points. Untrusted, may be out of range.
    pub factor: i64,
}

impl From<&DelegationPref> for Delegation {
    fn from(pref: &DelegationPref) -> Self {
        Delegation::new(pref.wallet_to.clone(), BasisPoints::clamped(pref.factor))
    }
}

/// A single weight change submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationUpdate {
    pub wallet_from: Address,
    pub wallet_to: Address,
    pub factor: BasisPoints,
}

/// Remote delegation ledger.
#[async_trait]
pub trait DelegationLedger: Send + Sync {
    /// Current record for `address`, `None` if it never delegated.
    async fn get_delegation(
        &self,
        address: &Address,
    ) -> Result<Option<RawDelegationRecord>, CapabilityError>;

    /// Decode a record into its delegation preferences.
    fn parse_delegation_info(
        &self,
        record: &RawDelegationRecord,
    ) -> Result<Vec<DelegationPref>, CapabilityError>;

    async fn set_delegation(&self, update: DelegationUpdate) -> Result<(), CapabilityError>;
}

/// Decode the `{"delegationPrefs": [...]}` record layout.
pub fn parse_delegation_prefs(
    record: &RawDelegationRecord,
) -> Result<Vec<DelegationPref>, CapabilityError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Envelope {
        #[serde(default)]
        delegation_prefs: Option<Vec<DelegationPref>>,
    }

    let envelope: Envelope = serde_json::from_value(record.0.clone())
        .map_err(|e| CapabilityError::Remote(format!("Malformed delegation record: {}", e)))?;
    Ok(envelope.delegation_prefs.unwrap_or_default())
}
