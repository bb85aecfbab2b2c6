//! Configuration management for the type-duel service
//!
//! This module handles all configuration loading from environment variables,
//! validation, and default values for the service.

pub mod app;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, MatchmakingSettings, RelaySettings, ServiceSettings};
