//! Type Duel - Matchmaking and race synchronization for typing duels
//!
//! This crate pairs waiting typists by preference, manages shared room
//! sessions, and keeps two independently-clocked clients in lock-step
//! through the ready/countdown/racing/finished/rematch cycle over an
//! asynchronous message relay.

pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod passage;
pub mod race;
pub mod relay;
pub mod room;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{DuelError, Result};
pub use types::*;

// Re-export key components
pub use matchmaking::MatchmakingService;
pub use race::{RaceCoordinator, RaceStateMachine};
pub use relay::RelayClient;
pub use room::{RoomLifecycleManager, RoomStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
