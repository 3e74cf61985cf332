//! Core domain types for the wallet session and delegation manager.
//!
//! This crate provides:
//! - Domain types (`types` module)
//! - Display helpers for front-ends (`display` module)
//!
//! With the `persistence` feature enabled:
//! - Configuration management and platform paths (`config` module)

pub mod display;
pub mod types;

#[cfg(feature = "persistence")]
pub mod config;

pub use display::*;
pub use types::*;

#[cfg(feature = "persistence")]
pub use config::{AppConfig, ConfigError, RetryConfig};
