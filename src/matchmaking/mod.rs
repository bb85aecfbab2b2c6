//! Matchmaking: the preference queue and the pairing service

pub mod queue;
pub mod service;

pub use queue::PreferenceQueue;
pub use service::{MatchmakingService, MatchmakingStats};
