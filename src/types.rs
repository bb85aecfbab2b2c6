//! Common types used throughout the type-duel service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for participants
pub type ParticipantId = String;

/// Unique identifier for rooms
///
/// Matchmade rooms use a deterministic id derived from the sorted pair of
/// participant ids; manual rooms use a caller-supplied join code.
pub type RoomId = String;

/// A participant in the matchmaking system
///
/// Identity is owned by the calling client; the core only references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Match preferences supplied with a search request
///
/// Two searchers pair only on exact equality of both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPreference {
    pub language: String,
    pub max_passage_length: u32,
}

impl std::fmt::Display for MatchPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.language, self.max_passage_length)
    }
}

/// A waiting searcher in the preference queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub participant: Participant,
    pub preference: MatchPreference,
    pub enqueued_at: DateTime<Utc>,
}

/// Per-room settings, copied from the matched preference at pairing time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub language: String,
    pub max_passage_length: u32,
}

impl From<&MatchPreference> for RoomSettings {
    fn from(preference: &MatchPreference) -> Self {
        Self {
            language: preference.language.clone(),
            max_passage_length: preference.max_passage_length,
        }
    }
}

/// A room session shared by up to `max_players` participants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub max_players: usize,
    pub members: Vec<Participant>,
    pub settings: RoomSettings,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_players
    }

    pub fn member_ids(&self) -> Vec<ParticipantId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn has_member(&self, participant_id: &str) -> bool {
        self.members.iter().any(|m| m.id == participant_id)
    }
}

/// Outcome of a `find_opponent` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Paired: the shared room, the opponent, and the passage to type
    Matched {
        room: Room,
        opponent: Participant,
        passage: String,
    },
    /// No compatible peer yet; the client polls again (bounded by its own
    /// 30s give-up timer, matching the queue eviction horizon)
    Waiting,
}

/// Result of a membership update against a room
#[derive(Debug, Clone)]
pub enum MembershipChange {
    Updated(Room),
    Deleted,
}

/// A completed run of the passage by one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub speed_wpm: u32,
    pub elapsed_seconds: f64,
}

/// Request to find an opponent, as carried over the request queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub participant: Participant,
    pub preference: MatchPreference,
    pub timestamp: DateTime<Utc>,
}

/// Request to create a manual room with a chosen join code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub room_id: RoomId,
    pub participant: Participant,
    pub settings: RoomSettings,
    pub timestamp: DateTime<Utc>,
}

/// Request to join an existing room by its code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
    pub participant: Participant,
    pub timestamp: DateTime<Utc>,
}

/// Request to leave a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRoomRequest {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    pub timestamp: DateTime<Utc>,
}

/// Notification published on the room's matchmaking channel once a pair
/// is formed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFound {
    pub room: Room,
    pub participants: Vec<Participant>,
    pub passage: String,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all inbound client requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    Search(SearchRequest),
    CreateRoom(CreateRoomRequest),
    JoinRoom(JoinRoomRequest),
    LeaveRoom(LeaveRoomRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_equality_is_exact() {
        let en = MatchPreference {
            language: "en".to_string(),
            max_passage_length: 100,
        };
        let en_long = MatchPreference {
            language: "en".to_string(),
            max_passage_length: 200,
        };
        let fr = MatchPreference {
            language: "fr".to_string(),
            max_passage_length: 100,
        };

        assert_eq!(en, en.clone());
        assert_ne!(en, en_long);
        assert_ne!(en, fr);
    }

    #[test]
    fn test_room_membership_helpers() {
        let room = Room {
            room_id: "ABCD".to_string(),
            max_players: 2,
            members: vec![
                Participant::new("a", "Alice"),
                Participant::new("b", "Bob"),
            ],
            settings: RoomSettings {
                language: "en".to_string(),
                max_passage_length: 100,
            },
            created_at: chrono::Utc::now(),
        };

        assert!(room.is_full());
        assert!(room.has_member("a"));
        assert!(!room.has_member("c"));
        assert_eq!(room.member_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
