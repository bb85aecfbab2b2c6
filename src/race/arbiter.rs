//! Per-room win arbitration
//!
//! Peers observing each other's `on-win` events can disagree about who
//! finished first under latency skew. The arbiter removes the ambiguity: it
//! timestamps the first win it observes on the room channel and broadcasts a
//! single authoritative result both clients converge on.

use crate::error::Result;
use crate::relay::messages::{race_channel, RaceEvent};
use crate::relay::RelayClient;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Authoritative first-win arbitration for one room.
pub struct RaceArbiter {
    relay: Arc<dyn RelayClient>,
    room_id: String,
}

impl RaceArbiter {
    pub fn new(relay: Arc<dyn RelayClient>, room_id: impl Into<String>) -> Self {
        Self {
            relay,
            room_id: room_id.into(),
        }
    }

    /// Subscribe and start arbitrating.
    ///
    /// The task ends when a participant leaves or the relay stream closes.
    pub async fn spawn(self) -> Result<JoinHandle<()>> {
        let channel = race_channel(&self.room_id);
        let mut stream = self.relay.subscribe(&channel).await?;
        let relay = self.relay;
        let room_id = self.room_id;

        let handle = tokio::spawn(async move {
            // Whether this round's result has been broadcast
            let mut decided = false;
            // Distinct ready senders since the last decision; two of them
            // mean a new round has begun
            let mut ready_seen: HashSet<String> = HashSet::new();

            while let Some(envelope) = stream.next().await {
                let event = match RaceEvent::from_wire(&envelope.event, &envelope.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Arbiter ignoring malformed event in '{}': {}", room_id, e);
                        continue;
                    }
                };

                match event {
                    RaceEvent::Win {
                        participant_id,
                        speed_wpm,
                        elapsed_seconds,
                    } => {
                        if decided {
                            debug!(
                                "Arbiter for '{}': ignoring win from '{}', round decided",
                                room_id, participant_id
                            );
                            continue;
                        }
                        decided = true;
                        ready_seen.clear();

                        info!(
                            "Arbiter for '{}': '{}' wins at {} WPM",
                            room_id, participant_id, speed_wpm
                        );

                        let result = RaceEvent::Result {
                            winner_id: participant_id,
                            speed_wpm,
                            elapsed_seconds,
                        };
                        let payload = match result.to_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("Arbiter failed to encode result: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = relay
                            .publish(&channel, result.event_name(), payload)
                            .await
                        {
                            warn!(
                                "Arbiter failed to publish result for '{}': {}",
                                room_id, e
                            );
                        }
                    }
                    RaceEvent::Ready { participant_id } => {
                        if decided {
                            ready_seen.insert(participant_id);
                            if ready_seen.len() >= 2 {
                                // Both peers re-readied: a new round begins
                                decided = false;
                                ready_seen.clear();
                                debug!("Arbiter for '{}': new round", room_id);
                            }
                        }
                    }
                    RaceEvent::Leave { participant_id } => {
                        info!(
                            "Arbiter for '{}': '{}' left, shutting down",
                            room_id, participant_id
                        );
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(handle)
    }
}

/// Tracks the arbiter task per room so each room gets exactly one.
pub struct ArbiterRegistry {
    relay: Arc<dyn RelayClient>,
    handles: tokio::sync::Mutex<std::collections::HashMap<String, JoinHandle<()>>>,
}

impl ArbiterRegistry {
    pub fn new(relay: Arc<dyn RelayClient>) -> Self {
        Self {
            relay,
            handles: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Spawn an arbiter for the room unless one is already running.
    pub async fn ensure(&self, room_id: &str) -> Result<()> {
        let mut handles = self.handles.lock().await;

        if let Some(handle) = handles.get(room_id) {
            if !handle.is_finished() {
                return Ok(());
            }
        }

        let handle = RaceArbiter::new(self.relay.clone(), room_id).spawn().await?;
        handles.insert(room_id.to_string(), handle);
        debug!("Arbiter registered for room '{}'", room_id);
        Ok(())
    }

    /// Stop and forget the arbiter for a dissolved room.
    pub async fn remove(&self, room_id: &str) {
        if let Some(handle) = self.handles.lock().await.remove(room_id) {
            handle.abort();
        }
    }

    /// Number of live arbiters, for stats reporting.
    pub async fn active_count(&self) -> usize {
        let mut handles = self.handles.lock().await;
        handles.retain(|_, handle| !handle.is_finished());
        handles.len()
    }
}
