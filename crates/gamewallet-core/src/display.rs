//! Display helpers shared by front-ends.
//!
//! These keep presentation rules (name fallback, address truncation,
//! percentage formatting) in one place so every front-end renders a session
//! the same way.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Delegation, Profile, SessionState};

/// Name shown when an address has no profile.
pub const ANONYMOUS_NAME: &str = "Anon";

/// Gateway used to render profile images.
pub const IMAGE_GATEWAY_DOMAIN: &str = "ar.io";

/// Truncate an address for display (e.g., "abc...xyz").
pub fn truncate_address(address: &str, prefix_len: usize, suffix_len: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= prefix_len + suffix_len + 3 {
        return address.to_string();
    }
    let prefix: String = chars[..prefix_len].iter().collect();
    let suffix: String = chars[chars.len() - suffix_len..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

/// Profile name, or [`ANONYMOUS_NAME`] when missing or blank.
pub fn display_name(profile: Option<&Profile>) -> &str {
    match profile {
        Some(p) if !p.display_name.trim().is_empty() => &p.display_name,
        _ => ANONYMOUS_NAME,
    }
}

/// Gateway URL for a profile image reference.
pub fn profile_image_url(image_ref: &str) -> String {
    format!("https://{0}.{1}/{0}", image_ref, IMAGE_GATEWAY_DOMAIN)
}

/// Format a basis-point factor as a two-decimal percentage ("30.00").
pub fn format_percentage(factor: u16) -> String {
    format!("{:.2}", factor as f64 / 100.0)
}

/// Delegation row as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDelegation {
    pub delegatee: String,
    /// Two-decimal percentage without the `%` sign.
    pub percentage: String,
}

impl From<&Delegation> for DisplayDelegation {
    fn from(delegation: &Delegation) -> Self {
        Self {
            delegatee: delegation.delegatee.to_string(),
            percentage: format_percentage(delegation.weight.get()),
        }
    }
}

/// Session summary as shown in a wallet widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySession {
    pub status: String,
    pub name: Option<String>,
    pub short_address: Option<String>,
    pub image_url: Option<String>,
}

impl DisplaySession {
    pub fn from_state(state: &SessionState) -> Self {
        let address = state.active_address();
        Self {
            status: state.status.label().to_string(),
            name: address.map(|_| display_name(state.profile.as_ref()).to_string()),
            short_address: address.map(short_address),
            image_url: state
                .profile
                .as_ref()
                .and_then(|p| p.image_ref.as_deref())
                .map(profile_image_url),
        }
    }
}

/// The 3+3 truncation used in the wallet widget.
pub fn short_address(address: &Address) -> String {
    truncate_address(address.as_str(), 3, 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BasisPoints;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_address() {
        let addr = "vLRHFqCw1uHu75xqB4fCDW-QxpkpJxBtFD9g4QYUbfw";
        assert_eq!(truncate_address(addr, 3, 3), "vLR...bfw");
    }

    #[test]
    fn test_truncate_short_address() {
        assert_eq!(truncate_address("short", 3, 3), "short");
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(display_name(None), "Anon");
        let blank = Profile::new("  ", None);
        assert_eq!(display_name(Some(&blank)), "Anon");
        let named = Profile::new("Alice", None);
        assert_eq!(display_name(Some(&named)), "Alice");
    }

    #[test]
    fn test_profile_image_url() {
        assert_eq!(profile_image_url("abc123"), "https://abc123.ar.io/abc123");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(3_000), "30.00");
        assert_eq!(format_percentage(10_000), "100.00");
        assert_eq!(format_percentage(1), "0.01");
        assert_eq!(format_percentage(0), "0.00");
    }

    #[test]
    fn test_display_delegation() {
        let delegation = Delegation::new("GAME", BasisPoints::FULL);
        let display = DisplayDelegation::from(&delegation);
        assert_eq!(
            display,
            DisplayDelegation {
                delegatee: "GAME".to_string(),
                percentage: "100.00".to_string(),
            }
        );
    }

    #[test]
    fn test_display_session_disconnected() {
        let display = DisplaySession::from_state(&SessionState::default());
        assert_eq!(display.status, "Disconnected");
        assert!(display.name.is_none());
        assert!(display.short_address.is_none());
        assert!(display.image_url.is_none());
    }

    #[test]
    fn test_display_session_connected_with_profile() {
        let mut state = SessionState::connected_as(Address::from("abcdefghijkl"));
        state.profile = Some(Profile::new("Alice", Some("img".to_string())));
        let display = DisplaySession::from_state(&state);
        assert_eq!(display.name.as_deref(), Some("Alice"));
        assert_eq!(display.short_address.as_deref(), Some("abc...jkl"));
        assert_eq!(display.image_url.as_deref(), Some("https://img.ar.io/img"));
    }

    #[test]
    fn test_display_session_connected_without_profile() {
        let state = SessionState::connected_as(Address::from("abcdefghijkl"));
        let display = DisplaySession::from_state(&state);
        assert_eq!(display.name.as_deref(), Some("Anon"));
    }
}
