//! Matchmaking service: pairing searchers into rooms
//!
//! Combines the preference queue and the room lifecycle manager to either
//! pair two searchers or report that the caller is still waiting.

use crate::error::{DuelError, Result};
use crate::matchmaking::queue::PreferenceQueue;
use crate::metrics::MetricsCollector;
use crate::passage::PassageProvider;
use crate::relay::messages::{matchmaking_channel, EVENT_MATCH_FOUND};
use crate::relay::RelayClient;
use crate::room::RoomLifecycleManager;
use crate::types::{
    MatchFound, MatchOutcome, MatchPreference, Participant, ParticipantId, Room, RoomSettings,
};
use crate::utils::{current_timestamp, pair_room_id};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Counters about matchmaking operations
#[derive(Debug, Clone, Default)]
pub struct MatchmakingStats {
    /// Total search calls served
    pub searches_served: u64,
    /// Total pairs matched into rooms
    pub matches_made: u64,
    /// Searchers currently waiting in the queue
    pub participants_waiting: usize,
}

/// The matchmaking service.
///
/// The queue lives behind a single async mutex held across match-and-create,
/// which is what makes pairing race-free: two concurrent `find_opponent`
/// calls can never both claim the same third searcher.
pub struct MatchmakingService {
    queue: Mutex<PreferenceQueue>,
    rooms: RoomLifecycleManager,
    relay: Arc<dyn RelayClient>,
    passages: Arc<dyn PassageProvider>,
    /// Last seen preference per participant, for observability and resume.
    /// A side effect of search, not required for pairing correctness.
    preferences: StdMutex<HashMap<ParticipantId, MatchPreference>>,
    /// Passage served per matchmade room, so the second poller receives the
    /// same text its opponent already got
    served_passages: StdMutex<HashMap<String, String>>,
    stats: StdMutex<MatchmakingStats>,
    metrics: Arc<MetricsCollector>,
}

impl MatchmakingService {
    pub fn new(
        rooms: RoomLifecycleManager,
        relay: Arc<dyn RelayClient>,
        passages: Arc<dyn PassageProvider>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::with_queue(PreferenceQueue::new(), rooms, relay, passages, metrics)
    }

    pub fn with_queue(
        queue: PreferenceQueue,
        rooms: RoomLifecycleManager,
        relay: Arc<dyn RelayClient>,
        passages: Arc<dyn PassageProvider>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue: Mutex::new(queue),
            rooms,
            relay,
            passages,
            preferences: StdMutex::new(HashMap::new()),
            served_passages: StdMutex::new(HashMap::new()),
            stats: StdMutex::new(MatchmakingStats::default()),
            metrics,
        }
    }

    /// Find an opponent for the caller, or report `Waiting`.
    ///
    /// Never blocks waiting for a peer: with no compatible searcher present
    /// the caller gets `Waiting` immediately and is expected to poll again,
    /// bounded by its own 30s give-up timer.
    pub async fn find_opponent(
        &self,
        participant: Participant,
        preference: MatchPreference,
    ) -> Result<MatchOutcome> {
        debug!(
            "Search from '{}' with preference {}",
            participant.id, preference
        );
        self.record_search(&participant, &preference)?;

        // A poller whose queue entry was consumed by its opponent's call
        // discovers the match here instead of re-enqueueing forever
        if let Some(room) = self
            .rooms
            .store()
            .find_room_for_participant(&participant.id)
            .await?
        {
            if let Some(outcome) = self.reentrant_outcome(&participant, &room)? {
                return Ok(outcome);
            }
        }

        let mut queue = self.queue.lock().await;

        let evicted = queue.evict_expired(current_timestamp());
        if evicted > 0 {
            debug!("Evicted {} expired queue entries", evicted);
        }

        // Insert or refresh; at most one live entry per participant
        queue.enqueue(participant.clone(), preference.clone());

        let matched = match queue.find_match(&participant.id, &preference) {
            Some(entry) => entry,
            None => {
                self.update_waiting_count(queue.len())?;
                debug!("No compatible peer for '{}', waiting", participant.id);
                return Ok(MatchOutcome::Waiting);
            }
        };

        let opponent = matched.participant.clone();
        let room_id = pair_room_id(&participant.id, &opponent.id);
        let settings = RoomSettings::from(&matched.preference);

        // A retried search must not create a second room for the same pair
        let (room, newly_created) = match self.rooms.store().get_room(&room_id).await? {
            Some(existing) => {
                debug!("Room '{}' already exists, reusing", room_id);
                (existing, false)
            }
            None => {
                let room = self
                    .rooms
                    .create_paired_room(
                        room_id.clone(),
                        participant.clone(),
                        opponent.clone(),
                        settings.clone(),
                    )
                    .await?;
                (room, true)
            }
        };

        // Both entries leave the queue before the lock drops, so neither is
        // independently matchable afterward
        queue.remove(&participant.id);
        queue.remove(&opponent.id);
        self.update_waiting_count(queue.len())?;
        drop(queue);

        let passage = self.passage_for_room(&room_id, &settings).await?;

        if newly_created {
            self.record_match()?;
            self.metrics.record_match();

            info!(
                "Matched '{}' with '{}' in room '{}'",
                participant.id, opponent.id, room_id
            );

            self.publish_match_found(&room, &passage).await;
        }

        Ok(MatchOutcome::Matched {
            room,
            opponent,
            passage,
        })
    }

    /// Cancel an in-flight search. Idempotent.
    pub async fn cancel_search(&self, participant_id: &str) -> Result<()> {
        let mut queue = self.queue.lock().await;
        if queue.remove(participant_id).is_some() {
            info!("Cancelled search for '{}'", participant_id);
        }
        self.update_waiting_count(queue.len())?;
        Ok(())
    }

    /// Drop the cached passage once a matchmade room is torn down.
    pub fn forget_room(&self, room_id: &str) {
        if let Ok(mut served) = self.served_passages.lock() {
            served.remove(room_id);
        }
    }

    pub fn stats(&self) -> Result<MatchmakingStats> {
        let stats = self.stats.lock().map_err(|_| DuelError::InternalError {
            message: "Failed to acquire stats lock".to_string(),
        })?;
        Ok(stats.clone())
    }

    /// Idempotent result for a caller already paired into a matchmade room.
    fn reentrant_outcome(&self, participant: &Participant, room: &Room) -> Result<Option<MatchOutcome>> {
        if room.members.len() != 2 {
            return Ok(None);
        }
        let ids = room.member_ids();
        if room.room_id != pair_room_id(&ids[0], &ids[1]) {
            // Manual room membership never satisfies a search
            return Ok(None);
        }

        let opponent = match room.members.iter().find(|m| m.id != participant.id) {
            Some(opponent) => opponent.clone(),
            None => return Ok(None),
        };

        let passage = self
            .served_passages
            .lock()
            .map_err(|_| DuelError::InternalError {
                message: "Failed to acquire passage cache lock".to_string(),
            })?
            .get(&room.room_id)
            .cloned();

        let passage = match passage {
            Some(passage) => passage,
            // Cache lost (e.g. restart): the match itself is still valid
            None => return Ok(None),
        };

        debug!(
            "Re-entrant search from '{}' resolved to room '{}'",
            participant.id, room.room_id
        );
        Ok(Some(MatchOutcome::Matched {
            room: room.clone(),
            opponent,
            passage,
        }))
    }

    /// Generate (or re-serve) the shared passage for a room.
    async fn passage_for_room(&self, room_id: &str, settings: &RoomSettings) -> Result<String> {
        if let Some(existing) = self
            .served_passages
            .lock()
            .map_err(|_| DuelError::InternalError {
                message: "Failed to acquire passage cache lock".to_string(),
            })?
            .get(room_id)
            .cloned()
        {
            return Ok(existing);
        }

        let passage = self
            .passages
            .generate(settings.max_passage_length, &settings.language, None)
            .await?;

        self.served_passages
            .lock()
            .map_err(|_| DuelError::InternalError {
                message: "Failed to acquire passage cache lock".to_string(),
            })?
            .insert(room_id.to_string(), passage.clone());
        Ok(passage)
    }

    /// Publish the match notification. Best-effort: a relay failure is
    /// logged, never surfaced to the matched callers.
    async fn publish_match_found(&self, room: &Room, passage: &str) {
        let notification = MatchFound {
            room: room.clone(),
            participants: room.members.clone(),
            passage: passage.to_string(),
            timestamp: current_timestamp(),
        };

        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize match notification: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .relay
            .publish(
                &matchmaking_channel(&room.room_id),
                EVENT_MATCH_FOUND,
                payload,
            )
            .await
        {
            warn!(
                "Failed to publish match notification for room '{}': {}",
                room.room_id, e
            );
        }
    }

    fn record_search(&self, participant: &Participant, preference: &MatchPreference) -> Result<()> {
        {
            let mut preferences =
                self.preferences
                    .lock()
                    .map_err(|_| DuelError::InternalError {
                        message: "Failed to acquire preference lock".to_string(),
                    })?;
            preferences.insert(participant.id.clone(), preference.clone());
        }

        let mut stats = self.stats.lock().map_err(|_| DuelError::InternalError {
            message: "Failed to acquire stats lock".to_string(),
        })?;
        stats.searches_served += 1;
        self.metrics.record_search();
        Ok(())
    }

    fn record_match(&self) -> Result<()> {
        let mut stats = self.stats.lock().map_err(|_| DuelError::InternalError {
            message: "Failed to acquire stats lock".to_string(),
        })?;
        stats.matches_made += 1;
        Ok(())
    }

    fn update_waiting_count(&self, waiting: usize) -> Result<()> {
        let mut stats = self.stats.lock().map_err(|_| DuelError::InternalError {
            message: "Failed to acquire stats lock".to_string(),
        })?;
        stats.participants_waiting = waiting;
        self.metrics.set_waiting(waiting);
        Ok(())
    }
}
