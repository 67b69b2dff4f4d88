//! External room store.
//!
//! Users, rooms, participant records and waiting-room entries are owned by
//! the persisted-resource service. The coordinator reaches them only through
//! the narrow [`RoomStore`] contract and never caches a result beyond the
//! operation that read it.
//!
//! Implementations:
//! - [`postgres::PgRoomStore`] - production, over a `sqlx::PgPool`
//! - [`memory::InMemoryRoomStore`] - tests and local runs, with failure injection

pub mod memory;
pub mod postgres;

use crate::errors::RcError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::InMemoryRoomStore;
pub use postgres::PgRoomStore;

/// Participant role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// Column / wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "HOST",
            Role::Guest => "GUEST",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = RcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "HOST" => Ok(Role::Host),
            "GUEST" => Ok(Role::Guest),
            _ => Err(RcError::Store(format!("unknown participant role: {value}"))),
        }
    }
}

/// Waiting-room entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitingStatus {
    Pending,
    Approved,
    Rejected,
}

impl WaitingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            WaitingStatus::Pending => "PENDING",
            WaitingStatus::Approved => "APPROVED",
            WaitingStatus::Rejected => "REJECTED",
        }
    }
}

impl TryFrom<String> for WaitingStatus {
    type Error = RcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(WaitingStatus::Pending),
            "APPROVED" => Ok(WaitingStatus::Approved),
            "REJECTED" => Ok(WaitingStatus::Rejected),
            _ => Err(RcError::Store(format!("unknown waiting room status: {value}"))),
        }
    }
}

/// Persisted user, reduced to what the coordinator reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Persisted room settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub code: String,
    pub title: String,
    pub host_id: String,
    pub is_active: bool,
    pub video_enabled: bool,
    pub audio_only: bool,
    pub max_participants: i32,
    pub waiting_room_enabled: bool,
}

/// Persisted participant record for (user, room).
///
/// `left_at == None` means the user is currently a participant of record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub user_id: String,
    pub room_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl ParticipantRecord {
    /// Whether this record admits a real-time join.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Persisted waiting-room entry for (user, room).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingRoomEntry {
    pub user_id: String,
    pub room_id: String,
    pub status: WaitingStatus,
}

/// Store call identifiers, used as the `operation` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetUser,
    GetRoom,
    GetParticipantRecord,
    SetParticipantLeftAt,
    CreateParticipantRecord,
    GetWaitingRoomEntry,
    SetWaitingRoomStatus,
}

impl StoreOperation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::GetUser => "get_user",
            StoreOperation::GetRoom => "get_room",
            StoreOperation::GetParticipantRecord => "get_participant_record",
            StoreOperation::SetParticipantLeftAt => "set_participant_left_at",
            StoreOperation::CreateParticipantRecord => "create_participant_record",
            StoreOperation::GetWaitingRoomEntry => "get_waiting_room_entry",
            StoreOperation::SetWaitingRoomStatus => "set_waiting_room_status",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read/write contract the coordinator consumes from the external store.
///
/// Every failure is reported as [`RcError::Store`].
#[async_trait::async_trait]
pub trait RoomStore: Send + Sync {
    /// Resolve a user's display name.
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, RcError>;

    /// Fetch room settings.
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, RcError>;

    /// Fetch the most recent participant record for (user, room).
    async fn get_participant_record(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<ParticipantRecord>, RcError>;

    /// Stamp `left_at` on the active participant record for (user, room).
    async fn set_participant_left_at(
        &self,
        user_id: &str,
        room_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<(), RcError>;

    /// Create a new active participant record.
    async fn create_participant_record(
        &self,
        user_id: &str,
        room_id: &str,
        role: Role,
    ) -> Result<ParticipantRecord, RcError>;

    /// Fetch the waiting-room entry for (user, room).
    async fn get_waiting_room_entry(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<WaitingRoomEntry>, RcError>;

    /// Update the status of the waiting-room entry for (user, room).
    async fn set_waiting_room_status(
        &self,
        user_id: &str,
        room_id: &str,
        status: WaitingStatus,
    ) -> Result<(), RcError>;
}
