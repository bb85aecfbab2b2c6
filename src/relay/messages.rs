//! Relay message definitions and serialization
//!
//! Channel naming, race event names, and the envelope wrapping every
//! published payload.

use crate::error::{DuelError, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// AMQP queue carrying inbound client requests
pub const CLIENT_REQUEST_QUEUE: &str = "typeduel.client_requests";
/// Exchange for race events (per-room channels as routing keys)
pub const RACE_EVENTS_EXCHANGE: &str = "typeduel.race_events";
/// Exchange for matchmaking notifications
pub const MATCHMAKING_EVENTS_EXCHANGE: &str = "typeduel.matchmaking_events";

/// Race event names as they travel on the wire
pub const EVENT_JOIN: &str = "on-join";
pub const EVENT_READY: &str = "on-ready";
pub const EVENT_TEXT_UPDATE: &str = "on-text-update";
pub const EVENT_WIN: &str = "on-win";
pub const EVENT_PLAY_AGAIN: &str = "on-play-again";
pub const EVENT_RESTART: &str = "on-restart";
pub const EVENT_LEAVE: &str = "on-leave";
/// Authoritative result broadcast by the room arbiter
pub const EVENT_RESULT: &str = "on-result";
/// Match notification on the matchmaking channel
pub const EVENT_MATCH_FOUND: &str = "match-found";

/// Channel carrying race events for a room
pub fn race_channel(room_id: &str) -> String {
    format!("room-{}", room_id)
}

/// Channel carrying matchmaking notifications for a room
pub fn matchmaking_channel(room_id: &str) -> String {
    format!("matchmaking-{}", room_id)
}

/// Envelope around every published payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub channel: String,
    pub event: String,
    pub payload: Value,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RelayEnvelope {
    pub fn new(channel: String, event: String, payload: Value) -> Self {
        Self {
            channel,
            event,
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            DuelError::InternalError {
                message: format!("Failed to serialize envelope: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            DuelError::InvalidRequest {
                reason: format!("Failed to deserialize envelope: {}", e),
            }
            .into()
        })
    }
}

/// A race event exchanged between the two peers of a room.
///
/// Every message carries the sender's id; progress updates are full input
/// snapshots rather than diffs, so out-of-order delivery only risks a stale
/// display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaceEvent {
    Join {
        participant: Participant,
    },
    Ready {
        participant_id: ParticipantId,
    },
    TextUpdate {
        participant_id: ParticipantId,
        input: String,
    },
    Win {
        participant_id: ParticipantId,
        speed_wpm: u32,
        elapsed_seconds: f64,
    },
    PlayAgain {
        participant_id: ParticipantId,
    },
    Restart {
        participant_id: ParticipantId,
    },
    Leave {
        participant_id: ParticipantId,
    },
    /// Authoritative outcome decided by the room arbiter
    Result {
        winner_id: ParticipantId,
        speed_wpm: u32,
        elapsed_seconds: f64,
    },
}

impl RaceEvent {
    /// Wire name for this event
    pub fn event_name(&self) -> &'static str {
        match self {
            RaceEvent::Join { .. } => EVENT_JOIN,
            RaceEvent::Ready { .. } => EVENT_READY,
            RaceEvent::TextUpdate { .. } => EVENT_TEXT_UPDATE,
            RaceEvent::Win { .. } => EVENT_WIN,
            RaceEvent::PlayAgain { .. } => EVENT_PLAY_AGAIN,
            RaceEvent::Restart { .. } => EVENT_RESTART,
            RaceEvent::Leave { .. } => EVENT_LEAVE,
            RaceEvent::Result { .. } => EVENT_RESULT,
        }
    }

    /// JSON payload carried next to the event name
    pub fn to_payload(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| {
            DuelError::InternalError {
                message: format!("Failed to serialize race event: {}", e),
            }
            .into()
        })
    }

    /// Rebuild an event from a received (name, payload) pair.
    ///
    /// The payload is self-describing; the name is cross-checked so a
    /// mislabeled message is rejected instead of dispatched.
    pub fn from_wire(event_name: &str, payload: &Value) -> Result<Self> {
        let event: RaceEvent = serde_json::from_value(payload.clone()).map_err(|e| {
            DuelError::InvalidRequest {
                reason: format!("Malformed race event payload: {}", e),
            }
        })?;

        if event.event_name() != event_name {
            return Err(DuelError::InvalidRequest {
                reason: format!(
                    "Event name '{}' does not match payload variant '{}'",
                    event_name,
                    event.event_name()
                ),
            }
            .into());
        }
        Ok(event)
    }

    /// Id of the participant that produced the event, where applicable
    pub fn sender_id(&self) -> Option<&str> {
        match self {
            RaceEvent::Join { participant } => Some(&participant.id),
            RaceEvent::Ready { participant_id }
            | RaceEvent::TextUpdate { participant_id, .. }
            | RaceEvent::Win { participant_id, .. }
            | RaceEvent::PlayAgain { participant_id }
            | RaceEvent::Restart { participant_id }
            | RaceEvent::Leave { participant_id } => Some(participant_id),
            RaceEvent::Result { .. } => None,
        }
    }
}

/// Validation for inbound client requests
pub struct RequestUtils;

impl RequestUtils {
    pub fn deserialize_request(bytes: &[u8]) -> Result<ClientRequest> {
        let request: ClientRequest =
            serde_json::from_slice(bytes).map_err(|e| DuelError::InvalidRequest {
                reason: format!("Failed to deserialize client request: {}", e),
            })?;
        Self::validate_request(&request)?;
        Ok(request)
    }

    pub fn serialize_request(request: &ClientRequest) -> Result<Vec<u8>> {
        Self::validate_request(request)?;
        serde_json::to_vec(request).map_err(|e| {
            DuelError::InternalError {
                message: format!("Failed to serialize client request: {}", e),
            }
            .into()
        })
    }

    pub fn validate_request(request: &ClientRequest) -> Result<()> {
        match request {
            ClientRequest::Search(search) => {
                Self::require_participant(&search.participant)?;
                if search.preference.language.is_empty() {
                    return Err(DuelError::InvalidRequest {
                        reason: "Preference language cannot be empty".to_string(),
                    }
                    .into());
                }
                if search.preference.max_passage_length == 0 {
                    return Err(DuelError::InvalidRequest {
                        reason: "Max passage length must be positive".to_string(),
                    }
                    .into());
                }
            }
            ClientRequest::CreateRoom(create) => {
                Self::require_participant(&create.participant)?;
                if create.room_id.is_empty() {
                    return Err(DuelError::InvalidRequest {
                        reason: "Room id cannot be empty".to_string(),
                    }
                    .into());
                }
            }
            ClientRequest::JoinRoom(join) => {
                Self::require_participant(&join.participant)?;
                if join.room_id.is_empty() {
                    return Err(DuelError::InvalidRequest {
                        reason: "Room id cannot be empty".to_string(),
                    }
                    .into());
                }
            }
            ClientRequest::LeaveRoom(leave) => {
                if leave.participant_id.is_empty() {
                    return Err(DuelError::InvalidRequest {
                        reason: "Participant id cannot be empty".to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn require_participant(participant: &Participant) -> Result<()> {
        if participant.id.is_empty() {
            return Err(DuelError::InvalidRequest {
                reason: "Participant id cannot be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;

    #[test]
    fn test_channel_naming() {
        assert_eq!(race_channel("duel-a-b"), "room-duel-a-b");
        assert_eq!(matchmaking_channel("duel-a-b"), "matchmaking-duel-a-b");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let event = RaceEvent::Ready {
            participant_id: "a".to_string(),
        };
        let envelope = RelayEnvelope::new(
            race_channel("duel-a-b"),
            event.event_name().to_string(),
            event.to_payload().unwrap(),
        );

        let bytes = envelope.to_bytes().unwrap();
        let decoded = RelayEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.event, EVENT_READY);
        assert!(!decoded.correlation_id.is_empty());

        let rebuilt = RaceEvent::from_wire(&decoded.event, &decoded.payload).unwrap();
        assert_eq!(rebuilt, event);
    }

    #[test]
    fn test_from_wire_rejects_mislabeled_event() {
        let payload = RaceEvent::Ready {
            participant_id: "a".to_string(),
        }
        .to_payload()
        .unwrap();

        assert!(RaceEvent::from_wire(EVENT_WIN, &payload).is_err());
    }

    #[test]
    fn test_event_names() {
        let win = RaceEvent::Win {
            participant_id: "a".to_string(),
            speed_wpm: 60,
            elapsed_seconds: 20.0,
        };
        assert_eq!(win.event_name(), "on-win");
        assert_eq!(win.sender_id(), Some("a"));

        let result = RaceEvent::Result {
            winner_id: "a".to_string(),
            speed_wpm: 60,
            elapsed_seconds: 20.0,
        };
        assert_eq!(result.sender_id(), None);
    }

    #[test]
    fn test_search_request_validation() {
        let valid = ClientRequest::Search(SearchRequest {
            participant: Participant::new("a", "Alice"),
            preference: MatchPreference {
                language: "en".to_string(),
                max_passage_length: 100,
            },
            timestamp: current_timestamp(),
        });
        assert!(RequestUtils::validate_request(&valid).is_ok());

        let empty_id = ClientRequest::Search(SearchRequest {
            participant: Participant::new("", "Nobody"),
            preference: MatchPreference {
                language: "en".to_string(),
                max_passage_length: 100,
            },
            timestamp: current_timestamp(),
        });
        assert!(RequestUtils::validate_request(&empty_id).is_err());

        let zero_len = ClientRequest::Search(SearchRequest {
            participant: Participant::new("a", "Alice"),
            preference: MatchPreference {
                language: "en".to_string(),
                max_passage_length: 0,
            },
            timestamp: current_timestamp(),
        });
        assert!(RequestUtils::validate_request(&zero_len).is_err());
    }

    #[test]
    fn test_request_serialization_roundtrip() {
        let request = ClientRequest::JoinRoom(JoinRoomRequest {
            room_id: "ABCD".to_string(),
            participant: Participant::new("b", "Bob"),
            timestamp: current_timestamp(),
        });

        let bytes = RequestUtils::serialize_request(&request).unwrap();
        let decoded = RequestUtils::deserialize_request(&bytes).unwrap();
        match decoded {
            ClientRequest::JoinRoom(join) => {
                assert_eq!(join.room_id, "ABCD");
                assert_eq!(join.participant.id, "b");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }
}
