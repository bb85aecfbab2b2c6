//! Main application state and service coordination
//!
//! Wires the matchmaking service, room lifecycle, relay, and arbiters
//! together, and exposes the client-facing operations as structured results.

use crate::config::AppConfig;
use crate::error::{DuelError, Result as DuelResult};
use crate::matchmaking::{MatchmakingService, MatchmakingStats};
use crate::metrics::MetricsCollector;
use crate::passage::{FallbackPassageSource, PassageProvider, StaticPassageProvider};
use crate::race::ArbiterRegistry;
use crate::relay::handlers::{ClientRequestConsumer, RequestHandler};
use crate::relay::{parse_relay_url, AmqpRelayClient, InMemoryRelay, RelayClient, RelayConnection};
use crate::room::{InMemoryRoomStore, RoomLifecycleManager};
use crate::types::{
    ClientRequest, MatchOutcome, MatchPreference, MembershipChange, Participant, Room,
    RoomSettings,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Relay connection error: {message}")]
    RelayConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Service start time for uptime reporting
    started_at: Instant,

    /// Room persistence (in-memory implementation of the store boundary)
    store: Arc<InMemoryRoomStore>,

    /// Room lifecycle orchestration
    rooms: RoomLifecycleManager,

    /// Pairing service
    matchmaking: Arc<MatchmakingService>,

    /// Event relay
    relay: Arc<dyn RelayClient>,

    /// Broker connection, absent when running on the in-memory relay
    relay_connection: Option<RelayConnection>,

    /// Per-room win arbiters
    arbiters: Arc<ArbiterRegistry>,

    /// Metrics collector shared with the health server
    metrics: Arc<MetricsCollector>,

    /// Request consumer, present once started against a broker
    request_consumer: Option<ClientRequestConsumer>,

    /// Background task handles
    background_tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application against the configured relay broker.
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing type-duel service");
        info!(
            "Configuration: service={}, relay_url={}",
            config.service.name, config.relay.url
        );

        let mut relay_config =
            parse_relay_url(&config.relay.url).map_err(|e| ServiceError::Configuration {
                message: e.to_string(),
            })?;
        relay_config.max_retries = config.relay.max_retry_attempts;
        relay_config.retry_delay_ms = config.relay.retry_delay_ms;
        relay_config.connection_timeout_ms = config.relay.connection_timeout_seconds * 1000;

        let connection = RelayConnection::new(relay_config).await.map_err(|e| {
            ServiceError::RelayConnection {
                message: e.to_string(),
            }
        })?;
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::RelayConnection {
                message: e.to_string(),
            })?;
        let relay: Arc<dyn RelayClient> = Arc::new(
            AmqpRelayClient::new(channel)
                .await
                .map_err(|e| ServiceError::RelayConnection {
                    message: e.to_string(),
                })?,
        );

        Ok(Self::assemble(config, relay, Some(connection)))
    }

    /// Initialize with the in-memory relay, for tests and the race-tester.
    pub fn for_testing(config: AppConfig) -> Self {
        Self::assemble(config, Arc::new(InMemoryRelay::new()), None)
    }

    fn assemble(
        config: AppConfig,
        relay: Arc<dyn RelayClient>,
        relay_connection: Option<RelayConnection>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new().unwrap_or_else(|e| {
            warn!("Failed to create metrics collector, using default: {}", e);
            MetricsCollector::default()
        }));

        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = RoomLifecycleManager::with_settings(
            store.clone(),
            config.room_grace(),
            config.matchmaking.manual_room_capacity,
        );
        let passages: Arc<dyn PassageProvider> = Arc::new(FallbackPassageSource::new(Arc::new(
            StaticPassageProvider::new(),
        )));
        let matchmaking = Arc::new(MatchmakingService::new(
            rooms.clone(),
            relay.clone(),
            passages,
            metrics.clone(),
        ));
        let arbiters = Arc::new(ArbiterRegistry::new(relay.clone()));

        Self {
            config,
            started_at: Instant::now(),
            store,
            rooms,
            matchmaking,
            relay,
            relay_connection,
            arbiters,
            metrics,
            request_consumer: None,
            background_tasks: tokio::sync::Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the request consumer against the broker.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        if let Some(connection) = &self.relay_connection {
            let channel =
                connection
                    .open_channel()
                    .await
                    .map_err(|e| ServiceError::RelayConnection {
                        message: e.to_string(),
                    })?;

            let handler = Arc::new(ServiceRequestHandler {
                app: AppHandle {
                    matchmaking: self.matchmaking.clone(),
                    rooms: self.rooms.clone(),
                    arbiters: self.arbiters.clone(),
                    metrics: self.metrics.clone(),
                },
            });
            let consumer = ClientRequestConsumer::new(handler, channel);
            consumer
                .start_consuming(&self.config.relay.request_queue)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: e.to_string(),
                })?;
            self.request_consumer = Some(consumer);
        }

        *self.is_running.write().await = true;
        info!("type-duel service started");
        Ok(())
    }

    /// Stop background work and mark the service down.
    pub async fn stop(&self) -> Result<()> {
        *self.is_running.write().await = false;

        if let Some(consumer) = &self.request_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop request consumer: {}", e);
            }
        }

        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }

        info!("type-duel service stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn relay(&self) -> Arc<dyn RelayClient> {
        self.relay.clone()
    }

    pub fn relay_connected(&self) -> bool {
        self.relay_connection.is_some()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn matchmaking_stats(&self) -> DuelResult<MatchmakingStats> {
        self.matchmaking.stats()
    }

    pub async fn active_room_count(&self) -> usize {
        self.store.room_count().await
    }

    /// Client-facing search operation.
    pub async fn search(
        &self,
        participant: Participant,
        preference: MatchPreference,
    ) -> DuelResult<MatchOutcome> {
        let outcome = self
            .matchmaking
            .find_opponent(participant, preference)
            .await?;

        if let MatchOutcome::Matched { room, .. } = &outcome {
            // The matchmade pair is complete; arbitration can start
            self.arbiters.ensure(&room.room_id).await?;
        }
        Ok(outcome)
    }

    /// Client-facing cancel-search operation.
    pub async fn cancel_search(&self, participant_id: &str) -> DuelResult<()> {
        self.matchmaking.cancel_search(participant_id).await
    }

    /// Client-facing manual room creation.
    pub async fn create_room(
        &self,
        room_id: String,
        participant: Participant,
        settings: RoomSettings,
    ) -> DuelResult<Room> {
        let room = self.rooms.create_room(room_id, participant, settings).await?;
        self.metrics.record_room_created();
        Ok(room)
    }

    /// Client-facing room join.
    pub async fn join_room(&self, room_id: &str, participant: Participant) -> DuelResult<Room> {
        let room = self.rooms.join_room(room_id, participant).await?;
        if room.members.len() >= 2 {
            self.arbiters.ensure(room_id).await?;
        }
        Ok(room)
    }

    /// Client-facing room leave.
    pub async fn leave_room(&self, room_id: &str, participant_id: &str) -> DuelResult<()> {
        match self.rooms.remove_player(room_id, participant_id).await? {
            MembershipChange::Deleted => {
                self.matchmaking.forget_room(room_id);
                self.arbiters.remove(room_id).await;
                self.metrics.record_room_deleted();
            }
            MembershipChange::Updated(_) => {}
        }
        Ok(())
    }
}

/// Shared handles the request handler needs.
#[derive(Clone)]
struct AppHandle {
    matchmaking: Arc<MatchmakingService>,
    rooms: RoomLifecycleManager,
    arbiters: Arc<ArbiterRegistry>,
    metrics: Arc<MetricsCollector>,
}

/// Production handler dispatching broker requests into the service layer.
struct ServiceRequestHandler {
    app: AppHandle,
}

#[async_trait]
impl RequestHandler for ServiceRequestHandler {
    async fn handle_request(&self, request: ClientRequest) -> DuelResult<()> {
        match request {
            ClientRequest::Search(search) => {
                let outcome = self
                    .app
                    .matchmaking
                    .find_opponent(search.participant, search.preference)
                    .await?;
                if let MatchOutcome::Matched { room, .. } = outcome {
                    self.app.arbiters.ensure(&room.room_id).await?;
                }
                Ok(())
            }
            ClientRequest::CreateRoom(create) => {
                self.app
                    .rooms
                    .create_room(create.room_id, create.participant, create.settings)
                    .await?;
                self.app.metrics.record_room_created();
                Ok(())
            }
            ClientRequest::JoinRoom(join) => {
                let room = self.app.rooms.join_room(&join.room_id, join.participant).await?;
                if room.members.len() >= 2 {
                    self.app.arbiters.ensure(&join.room_id).await?;
                }
                Ok(())
            }
            ClientRequest::LeaveRoom(leave) => {
                match self
                    .app
                    .rooms
                    .remove_player(&leave.room_id, &leave.participant_id)
                    .await?
                {
                    MembershipChange::Deleted => {
                        self.app.matchmaking.forget_room(&leave.room_id);
                        self.app.arbiters.remove(&leave.room_id).await;
                        self.app.metrics.record_room_deleted();
                    }
                    MembershipChange::Updated(_) => {}
                }
                Ok(())
            }
        }
    }

    async fn handle_error(&self, error: DuelError, message_data: &[u8]) {
        error!(
            "Request handler error - type: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preference() -> MatchPreference {
        MatchPreference {
            language: "en".to_string(),
            max_passage_length: 100,
        }
    }

    fn settings() -> RoomSettings {
        RoomSettings {
            language: "en".to_string(),
            max_passage_length: 100,
        }
    }

    #[tokio::test]
    async fn test_search_through_app_state() {
        let app = AppState::for_testing(AppConfig::default());

        let first = app
            .search(Participant::new("a", "Alice"), preference())
            .await
            .unwrap();
        assert!(matches!(first, MatchOutcome::Waiting));

        let second = app
            .search(Participant::new("b", "Bob"), preference())
            .await
            .unwrap();
        assert!(matches!(second, MatchOutcome::Matched { .. }));
        assert_eq!(app.active_room_count().await, 1);
    }

    #[tokio::test]
    async fn test_manual_room_flow() {
        let app = AppState::for_testing(AppConfig::default());

        app.create_room("ABCD".to_string(), Participant::new("a", "Alice"), settings())
            .await
            .unwrap();
        let room = app
            .join_room("ABCD", Participant::new("b", "Bob"))
            .await
            .unwrap();
        assert_eq!(room.members.len(), 2);

        app.leave_room("ABCD", "a").await.unwrap();
        app.leave_room("ABCD", "b").await.unwrap();
        assert_eq!(app.active_room_count().await, 0);
    }

    #[tokio::test]
    async fn test_running_flag() {
        let app = AppState::for_testing(AppConfig::default());
        assert!(!app.is_running().await);

        *app.is_running.write().await = true;
        assert!(app.is_running().await);

        app.stop().await.unwrap();
        assert!(!app.is_running().await);
    }
}
