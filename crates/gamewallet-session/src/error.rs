//! Error types for session and delegation operations.

use thiserror::Error;

/// Failure reported by a wallet, profile or ledger capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Capability unavailable")]
    Unavailable,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Remote error: {0}")]
    Remote(String),
}

/// Which half of the two-phase delegation update failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    /// Zeroing every non-target delegation.
    ClearOthers,
    /// Setting the target delegation to full weight.
    SetTarget,
}

impl std::fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyPhase::ClearOthers => write!(f, "clearing other delegations"),
            ApplyPhase::SetTarget => write!(f, "setting target delegation"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Wallet not found")]
    WalletUnavailable,

    #[error("Wallet authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Profile lookup failed: {0}")]
    ProfileFetchFailed(#[source] CapabilityError),

    #[error("Delegation fetch failed: {0}")]
    DelegationFetchFailed(#[source] CapabilityError),

    #[error("Delegation update failed while {phase}: {source}")]
    DelegationApplyFailed {
        phase: ApplyPhase,
        #[source]
        source: CapabilityError,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Phase of a failed delegation update, if this is one.
    pub fn apply_phase(&self) -> Option<ApplyPhase> {
        match self {
            SessionError::DelegationApplyFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Failure reading or writing the durable session marker.
#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] gamewallet_core::ConfigError),
}
