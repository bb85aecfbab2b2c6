//! Metrics collection using Prometheus
//!
//! Counters and gauges for matchmaking, rooms, and races, grouped the way
//! they are reported.

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Main metrics collector for the type-duel service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Matchmaking metrics
    matchmaking_metrics: MatchmakingMetrics,

    /// Room metrics
    room_metrics: RoomMetrics,

    /// Race metrics
    race_metrics: RaceMetrics,
}

/// Matchmaking-related metrics
#[derive(Clone)]
pub struct MatchmakingMetrics {
    /// Total search requests served
    pub searches_total: IntCounter,

    /// Total pairs matched
    pub matches_total: IntCounter,

    /// Searchers currently waiting in the queue
    pub participants_waiting: IntGauge,

    /// Queue entries evicted as stale
    pub entries_evicted_total: IntCounter,
}

/// Room-related metrics
#[derive(Clone)]
pub struct RoomMetrics {
    /// Rooms currently active
    pub active_rooms: IntGauge,

    /// Total rooms created
    pub rooms_created_total: IntCounter,

    /// Total rooms deleted
    pub rooms_deleted_total: IntCounter,
}

/// Race-related metrics
#[derive(Clone)]
pub struct RaceMetrics {
    /// Total races started
    pub races_started_total: IntCounter,

    /// Total races finished with an arbitrated result
    pub races_finished_total: IntCounter,

    /// Race duration from countdown to result
    pub race_duration_seconds: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let room_metrics = RoomMetrics::new(&registry)?;
        let race_metrics = RaceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            matchmaking_metrics,
            room_metrics,
            race_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    pub fn room(&self) -> &RoomMetrics {
        &self.room_metrics
    }

    pub fn race(&self) -> &RaceMetrics {
        &self.race_metrics
    }

    /// Record a served search request
    pub fn record_search(&self) {
        self.matchmaking_metrics.searches_total.inc();
    }

    /// Record a successful pairing
    pub fn record_match(&self) {
        self.matchmaking_metrics.matches_total.inc();
        self.room_metrics.rooms_created_total.inc();
        self.room_metrics.active_rooms.inc();
    }

    /// Update the waiting-searcher gauge
    pub fn set_waiting(&self, waiting: usize) {
        self.matchmaking_metrics
            .participants_waiting
            .set(waiting as i64);
    }

    /// Record a manual room creation
    pub fn record_room_created(&self) {
        self.room_metrics.rooms_created_total.inc();
        self.room_metrics.active_rooms.inc();
    }

    /// Record a room deletion
    pub fn record_room_deleted(&self) {
        self.room_metrics.rooms_deleted_total.inc();
        self.room_metrics.active_rooms.dec();
    }

    /// Record an arbitrated race result
    pub fn record_race_finished(&self, duration_seconds: f64) {
        self.race_metrics.races_finished_total.inc();
        self.race_metrics
            .race_duration_seconds
            .observe(duration_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        // Registration against a fresh registry cannot collide
        Self::new().expect("failed to create default metrics collector")
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let searches_total = IntCounter::with_opts(Opts::new(
            "typeduel_searches_total",
            "Total search requests served",
        ))?;
        let matches_total = IntCounter::with_opts(Opts::new(
            "typeduel_matches_total",
            "Total pairs matched into rooms",
        ))?;
        let participants_waiting = IntGauge::with_opts(Opts::new(
            "typeduel_participants_waiting",
            "Searchers currently waiting in the queue",
        ))?;
        let entries_evicted_total = IntCounter::with_opts(Opts::new(
            "typeduel_queue_entries_evicted_total",
            "Queue entries evicted as stale",
        ))?;

        registry.register(Box::new(searches_total.clone()))?;
        registry.register(Box::new(matches_total.clone()))?;
        registry.register(Box::new(participants_waiting.clone()))?;
        registry.register(Box::new(entries_evicted_total.clone()))?;

        Ok(Self {
            searches_total,
            matches_total,
            participants_waiting,
            entries_evicted_total,
        })
    }
}

impl RoomMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_rooms = IntGauge::with_opts(Opts::new(
            "typeduel_active_rooms",
            "Rooms currently active",
        ))?;
        let rooms_created_total = IntCounter::with_opts(Opts::new(
            "typeduel_rooms_created_total",
            "Total rooms created",
        ))?;
        let rooms_deleted_total = IntCounter::with_opts(Opts::new(
            "typeduel_rooms_deleted_total",
            "Total rooms deleted",
        ))?;

        registry.register(Box::new(active_rooms.clone()))?;
        registry.register(Box::new(rooms_created_total.clone()))?;
        registry.register(Box::new(rooms_deleted_total.clone()))?;

        Ok(Self {
            active_rooms,
            rooms_created_total,
            rooms_deleted_total,
        })
    }
}

impl RaceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let races_started_total = IntCounter::with_opts(Opts::new(
            "typeduel_races_started_total",
            "Total races started",
        ))?;
        let races_finished_total = IntCounter::with_opts(Opts::new(
            "typeduel_races_finished_total",
            "Total races finished with an arbitrated result",
        ))?;
        let race_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "typeduel_race_duration_seconds",
            "Race duration from start to result",
        ))?;

        registry.register(Box::new(races_started_total.clone()))?;
        registry.register(Box::new(races_finished_total.clone()))?;
        registry.register(Box::new(race_duration_seconds.clone()))?;

        Ok(Self {
            races_started_total,
            races_finished_total,
            race_duration_seconds,
        })
    }
}
