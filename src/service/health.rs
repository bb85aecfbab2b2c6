//! Health check reporting
//!
//! Readiness and liveness probes plus the component-by-component report
//! served by the stats endpoint.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Total search calls served
    pub searches_served: u64,
    /// Total pairs matched
    pub matches_made: u64,
    /// Searchers currently waiting
    pub participants_waiting: usize,
    /// Rooms currently active
    pub active_rooms: usize,
    /// Service uptime information
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(&app_state).await;
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        let matchmaking_check = Self::check_matchmaking(&app_state);
        if matchmaking_check.status == HealthStatus::Unhealthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(matchmaking_check);

        let relay_check = Self::check_relay(&app_state);
        if relay_check.status == HealthStatus::Degraded
            && overall_status == HealthStatus::Healthy
        {
            overall_status = HealthStatus::Degraded;
        }
        checks.push(relay_check);

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        // The matchmaking stats lock doubles as a cheap poisoning probe
        match app_state.matchmaking_stats() {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(_) => Ok(HealthStatus::Degraded),
        }
    }

    async fn check_service_running(app_state: &Arc<AppState>) -> ComponentCheck {
        let start = std::time::Instant::now();
        let running = app_state.is_running().await;

        ComponentCheck {
            name: "service".to_string(),
            status: if running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: if running {
                None
            } else {
                Some("Service is not running".to_string())
            },
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_matchmaking(app_state: &Arc<AppState>) -> ComponentCheck {
        let start = std::time::Instant::now();

        match app_state.matchmaking_stats() {
            Ok(stats) => {
                debug!(
                    "Matchmaking check: {} waiting, {} matched",
                    stats.participants_waiting, stats.matches_made
                );
                ComponentCheck {
                    name: "matchmaking".to_string(),
                    status: HealthStatus::Healthy,
                    message: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(e) => ComponentCheck {
                name: "matchmaking".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    fn check_relay(app_state: &Arc<AppState>) -> ComponentCheck {
        let start = std::time::Instant::now();

        // In-memory relay (tests, tester binary) counts as degraded so the
        // report distinguishes it from a broker-backed deployment
        let (status, message) = if app_state.relay_connected() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("Running on in-memory relay".to_string()),
            )
        };

        ComponentCheck {
            name: "relay".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &Arc<AppState>) -> ServiceStats {
        let matchmaking = app_state.matchmaking_stats().unwrap_or_default();

        ServiceStats {
            searches_served: matchmaking.searches_served,
            matches_made: matchmaking.matches_made,
            participants_waiting: matchmaking.participants_waiting,
            active_rooms: app_state.active_room_count().await,
            uptime_info: format!("{}s", app_state.uptime_seconds()),
        }
    }
}
