//! Room store collaborator boundary
//!
//! The store is the single source of truth for room membership and capacity.
//! Production deployments back it with a relational database; tests and the
//! race-tester binary use the in-memory implementation.

use crate::error::{DuelError, Result};
use crate::types::{Participant, Room, RoomId, RoomSettings};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// CRUD boundary to the persistent room collaborator.
///
/// `add_member` must reject members past `max_players` atomically: under two
/// simultaneous joins to the last open slot, exactly one succeeds.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create a room with one initial member. Fails with `RoomAlreadyExists`
    /// if the id is taken.
    async fn create_room(
        &self,
        room_id: RoomId,
        initial_member: Participant,
        max_players: usize,
        settings: RoomSettings,
    ) -> Result<Room>;

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>>;

    /// Append a member. Fails with `RoomNotFound`, `RoomFull`, or
    /// `AlreadyJoined`.
    async fn add_member(&self, room_id: &str, member: Participant) -> Result<Room>;

    /// Remove a member; unknown members are a no-op. Returns the updated room.
    async fn remove_member(&self, room_id: &str, member_id: &str) -> Result<Room>;

    /// Delete a room and its settings row. Idempotent.
    async fn delete_room(&self, room_id: &str) -> Result<()>;

    /// Find the room (if any) a participant currently belongs to.
    ///
    /// Used by `find_opponent` so a poller whose queue entry was consumed by
    /// its opponent's call still discovers the match.
    async fn find_room_for_participant(&self, participant_id: &str) -> Result<Option<Room>>;
}

/// In-memory room store.
///
/// All mutation happens under one async mutex, which is what makes the
/// last-slot capacity check atomic.
#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rooms, for stats and health reporting.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn create_room(
        &self,
        room_id: RoomId,
        initial_member: Participant,
        max_players: usize,
        settings: RoomSettings,
    ) -> Result<Room> {
        let mut rooms = self.rooms.lock().await;

        if rooms.contains_key(&room_id) {
            return Err(DuelError::RoomAlreadyExists { room_id }.into());
        }

        let room = Room {
            room_id: room_id.clone(),
            max_players,
            members: vec![initial_member],
            settings,
            created_at: current_timestamp(),
        };
        rooms.insert(room_id, room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let rooms = self.rooms.lock().await;
        Ok(rooms.get(room_id).cloned())
    }

    async fn add_member(&self, room_id: &str, member: Participant) -> Result<Room> {
        let mut rooms = self.rooms.lock().await;

        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| DuelError::RoomNotFound {
                room_id: room_id.to_string(),
            })?;

        if room.has_member(&member.id) {
            return Err(DuelError::AlreadyJoined {
                participant_id: member.id,
            }
            .into());
        }

        if room.is_full() {
            return Err(DuelError::RoomFull {
                room_id: room_id.to_string(),
            }
            .into());
        }

        room.members.push(member);
        Ok(room.clone())
    }

    async fn remove_member(&self, room_id: &str, member_id: &str) -> Result<Room> {
        let mut rooms = self.rooms.lock().await;

        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| DuelError::RoomNotFound {
                room_id: room_id.to_string(),
            })?;

        room.members.retain(|m| m.id != member_id);
        Ok(room.clone())
    }

    async fn delete_room(&self, room_id: &str) -> Result<()> {
        let mut rooms = self.rooms.lock().await;
        rooms.remove(room_id);
        Ok(())
    }

    async fn find_room_for_participant(&self, participant_id: &str) -> Result<Option<Room>> {
        let rooms = self.rooms.lock().await;
        Ok(rooms
            .values()
            .find(|room| room.has_member(participant_id))
            .cloned())
    }
}
