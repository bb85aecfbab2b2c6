//! Error types for the type-duel service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking and race scenarios
#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("Room is full: {room_id}")]
    RoomFull { room_id: String },

    #[error("Room already exists: {room_id}")]
    RoomAlreadyExists { room_id: String },

    #[error("Participant not found: {participant_id}")]
    ParticipantNotFound { participant_id: String },

    #[error("Participant already in room: {participant_id}")]
    AlreadyJoined { participant_id: String },

    #[error("Queue entry expired for participant: {participant_id}")]
    Expired { participant_id: String },

    #[error("Storage operation failed: {message}")]
    StorageError { message: String },

    #[error("Relay publish/subscribe failed: {message}")]
    RelayError { message: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl DuelError {
    /// Whether the caller may usefully retry the failed operation.
    ///
    /// Storage and relay failures are transient collaborator problems;
    /// conflicts and lookups are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DuelError::StorageError { .. }
                | DuelError::RelayError { .. }
                | DuelError::InternalError { .. }
        )
    }
}
