//! Metrics and monitoring for the type-duel service
//!
//! This module provides metrics collection and health monitoring endpoints.

pub mod collector;
pub mod health;

pub use collector::{MatchmakingMetrics, MetricsCollector, RaceMetrics, RoomMetrics};
pub use health::{HealthServer, HealthServerConfig};
