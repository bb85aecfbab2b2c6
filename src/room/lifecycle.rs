//! Room lifecycle orchestration
//!
//! Create, join, and leave operations against the room store, plus the
//! delayed empty-room cleanup that tolerates a member reconnecting within
//! the grace window.

use crate::error::{DuelError, Result};
use crate::room::store::RoomStore;
use crate::types::{MembershipChange, Participant, Room, RoomId, RoomSettings};
use crate::utils::is_valid_join_code;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Membership action reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAction {
    Joined,
    Left,
}

/// Orchestrates room create/join/leave against the store, enforcing
/// capacity and idempotency.
#[derive(Clone)]
pub struct RoomLifecycleManager {
    store: Arc<dyn RoomStore>,
    /// How long an empty room survives before the delayed re-check deletes it
    grace_window: Duration,
    /// Member cap for manually created rooms
    manual_room_capacity: usize,
}

impl RoomLifecycleManager {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self::with_settings(store, Duration::from_secs(10), 4)
    }

    pub fn with_settings(
        store: Arc<dyn RoomStore>,
        grace_window: Duration,
        manual_room_capacity: usize,
    ) -> Self {
        Self {
            store,
            grace_window,
            manual_room_capacity,
        }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Create a manual room with a caller-chosen join code.
    ///
    /// A taken code surfaces as `RoomAlreadyExists`, distinct from success,
    /// so the caller can prompt for a different one.
    pub async fn create_room(
        &self,
        room_id: RoomId,
        creator: Participant,
        settings: RoomSettings,
    ) -> Result<Room> {
        if !is_valid_join_code(&room_id) {
            return Err(DuelError::InvalidRequest {
                reason: format!("invalid room code '{}'", room_id),
            }
            .into());
        }

        let room = self
            .store
            .create_room(room_id, creator, self.manual_room_capacity, settings)
            .await?;

        info!(
            "Created manual room '{}' with capacity {}",
            room.room_id, room.max_players
        );
        Ok(room)
    }

    /// Create a matchmade 2-party room with both members present.
    pub async fn create_paired_room(
        &self,
        room_id: RoomId,
        first: Participant,
        second: Participant,
        settings: RoomSettings,
    ) -> Result<Room> {
        let room = self
            .store
            .create_room(room_id, first, 2, settings)
            .await?;
        let room = self.store.add_member(&room.room_id, second).await?;

        info!(
            "Created paired room '{}' for {:?}",
            room.room_id,
            room.member_ids()
        );
        Ok(room)
    }

    /// Join an existing room.
    ///
    /// `NotFound` if absent, `RoomFull` if at capacity; under two
    /// simultaneous joins to the last slot the store guarantees exactly one
    /// succeeds.
    pub async fn join_room(&self, room_id: &str, participant: Participant) -> Result<Room> {
        let room = self.store.add_member(room_id, participant.clone()).await?;

        info!(
            "Participant '{}' joined room '{}' ({}/{})",
            participant.id,
            room_id,
            room.members.len(),
            room.max_players
        );
        Ok(room)
    }

    /// Apply a membership change and delete the room once abandoned.
    ///
    /// On `Left`, if no members remain the room and its settings are deleted
    /// immediately and `Deleted` is reported.
    pub async fn update_membership(
        &self,
        room_id: &str,
        participant: Participant,
        action: MemberAction,
    ) -> Result<MembershipChange> {
        match action {
            MemberAction::Joined => {
                let room = self.store.add_member(room_id, participant).await?;
                Ok(MembershipChange::Updated(room))
            }
            MemberAction::Left => {
                let room = self.store.remove_member(room_id, &participant.id).await?;
                if room.members.is_empty() {
                    self.store.delete_room(room_id).await?;
                    info!("Deleted abandoned room '{}'", room_id);
                    Ok(MembershipChange::Deleted)
                } else {
                    Ok(MembershipChange::Updated(room))
                }
            }
        }
    }

    /// Remove a player and, if others remain, schedule a delayed re-check
    /// that deletes the room only if it is still empty at that point.
    ///
    /// The grace window avoids deleting a room out from under a member who is
    /// mid-reconnect.
    pub async fn remove_player(&self, room_id: &str, participant_id: &str) -> Result<MembershipChange> {
        let room = self.store.remove_member(room_id, participant_id).await?;
        debug!(
            "Removed '{}' from room '{}', {} member(s) remain",
            participant_id,
            room_id,
            room.members.len()
        );

        if room.members.is_empty() {
            self.store.delete_room(room_id).await?;
            info!("Deleted empty room '{}'", room_id);
            return Ok(MembershipChange::Deleted);
        }

        self.schedule_empty_check(room_id.to_string());
        Ok(MembershipChange::Updated(room))
    }

    /// Spawn the delayed empty-room re-check.
    fn schedule_empty_check(&self, room_id: RoomId) {
        let store = self.store.clone();
        let grace = self.grace_window;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            match store.get_room(&room_id).await {
                Ok(Some(room)) if room.members.is_empty() => {
                    if let Err(e) = store.delete_room(&room_id).await {
                        warn!("Failed to delete room '{}' after grace window: {}", room_id, e);
                    } else {
                        info!("Deleted room '{}' after grace window", room_id);
                    }
                }
                Ok(_) => {
                    debug!("Room '{}' still occupied after grace window", room_id);
                }
                Err(e) => {
                    warn!("Grace-window re-check failed for room '{}': {}", room_id, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::store::InMemoryRoomStore;

    fn settings() -> RoomSettings {
        RoomSettings {
            language: "en".to_string(),
            max_passage_length: 100,
        }
    }

    fn manager(store: Arc<InMemoryRoomStore>) -> RoomLifecycleManager {
        RoomLifecycleManager::with_settings(store, Duration::from_millis(50), 4)
    }

    #[tokio::test]
    async fn test_manual_room_create_and_join() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store);

        rooms
            .create_room("ABCD".to_string(), Participant::new("a", "Alice"), settings())
            .await
            .unwrap();
        let room = rooms
            .join_room("ABCD", Participant::new("b", "Bob"))
            .await
            .unwrap();

        assert_eq!(room.members.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_room_rejects_bad_code() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store);

        let err = rooms
            .create_room("x".to_string(), Participant::new("a", "Alice"), settings())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DuelError>(),
            Some(DuelError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_code_surfaces_conflict() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store);

        rooms
            .create_room("ABCD".to_string(), Participant::new("a", "Alice"), settings())
            .await
            .unwrap();
        let err = rooms
            .create_room("ABCD".to_string(), Participant::new("b", "Bob"), settings())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DuelError>(),
            Some(DuelError::RoomAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_missing_room_not_found() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store);

        let err = rooms
            .join_room("NOPE", Participant::new("a", "Alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DuelError>(),
            Some(DuelError::RoomNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_third_join_to_paired_room_is_full() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store);

        rooms
            .create_paired_room(
                "duel-a-b".to_string(),
                Participant::new("a", "Alice"),
                Participant::new("b", "Bob"),
                settings(),
            )
            .await
            .unwrap();

        let err = rooms
            .join_room("duel-a-b", Participant::new("c", "Carol"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DuelError>(),
            Some(DuelError::RoomFull { .. })
        ));
    }

    #[tokio::test]
    async fn test_last_leave_deletes_room() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store.clone());

        rooms
            .create_paired_room(
                "duel-a-b".to_string(),
                Participant::new("a", "Alice"),
                Participant::new("b", "Bob"),
                settings(),
            )
            .await
            .unwrap();

        let first = rooms
            .update_membership("duel-a-b", Participant::new("a", "Alice"), MemberAction::Left)
            .await
            .unwrap();
        assert!(matches!(first, MembershipChange::Updated(_)));

        let second = rooms
            .update_membership("duel-a-b", Participant::new("b", "Bob"), MemberAction::Left)
            .await
            .unwrap();
        assert!(matches!(second, MembershipChange::Deleted));
        assert!(store.get_room("duel-a-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grace_window_deletes_room_left_empty() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store.clone());

        rooms
            .create_paired_room(
                "duel-a-b".to_string(),
                Participant::new("a", "Alice"),
                Participant::new("b", "Bob"),
                settings(),
            )
            .await
            .unwrap();

        // One player leaves; the room stays alive pending the re-check
        rooms.remove_player("duel-a-b", "a").await.unwrap();
        assert!(store.get_room("duel-a-b").await.unwrap().is_some());

        // The second player leaves directly through the store (e.g. a crash
        // path that bypassed remove_player); the scheduled re-check cleans up
        store.remove_member("duel-a-b", "b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.get_room("duel-a-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grace_window_spares_reoccupied_room() {
        let store = Arc::new(InMemoryRoomStore::new());
        let rooms = manager(store.clone());

        rooms
            .create_paired_room(
                "duel-a-b".to_string(),
                Participant::new("a", "Alice"),
                Participant::new("b", "Bob"),
                settings(),
            )
            .await
            .unwrap();

        rooms.remove_player("duel-a-b", "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Member b never left: the room must survive the re-check
        let room = store.get_room("duel-a-b").await.unwrap().unwrap();
        assert_eq!(room.members.len(), 1);
    }
}
