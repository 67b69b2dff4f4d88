//! In-memory [`RoomStore`] for tests and local runs.
//!
//! Seed it with the builder methods, then inspect it after driving the
//! coordinator. Individual operations can be made to fail to exercise the
//! store-failure path.

use super::{
    ParticipantRecord, Role, Room, RoomStore, StoreOperation, User, WaitingRoomEntry,
    WaitingStatus,
};
use crate::errors::RcError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, User>,
    rooms: HashMap<String, Room>,
    participants: Vec<ParticipantRecord>,
    waiting: HashMap<(String, String), WaitingRoomEntry>,
    failing: HashSet<StoreOperation>,
    calls: HashMap<StoreOperation, usize>,
}

/// In-memory store with failure injection.
#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    state: Mutex<State>,
}

impl InMemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge every other caller
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and fail it if injected.
    fn begin(&self, op: StoreOperation) -> Result<MutexGuard<'_, State>, RcError> {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        if state.failing.contains(&op) {
            return Err(RcError::Store(format!("injected failure: {op}")));
        }
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    #[must_use]
    pub fn with_user(self, id: &str, name: &str) -> Self {
        self.insert_user(id, name);
        self
    }

    #[must_use]
    pub fn with_room(self, room: Room) -> Self {
        self.insert_room(room);
        self
    }

    /// Seed an active participant record.
    #[must_use]
    pub fn with_participant(self, user_id: &str, room_id: &str, role: Role) -> Self {
        self.insert_participant(ParticipantRecord {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            role,
            joined_at: Utc::now(),
            left_at: None,
        });
        self
    }

    /// Seed a participant record that has already left.
    #[must_use]
    pub fn with_left_participant(self, user_id: &str, room_id: &str, role: Role) -> Self {
        let now = Utc::now();
        self.insert_participant(ParticipantRecord {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            role,
            joined_at: now,
            left_at: Some(now),
        });
        self
    }

    #[must_use]
    pub fn with_waiting_entry(self, user_id: &str, room_id: &str, status: WaitingStatus) -> Self {
        self.state().waiting.insert(
            (user_id.to_string(), room_id.to_string()),
            WaitingRoomEntry {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                status,
            },
        );
        self
    }

    pub fn insert_user(&self, id: &str, name: &str) {
        self.state().users.insert(
            id.to_string(),
            User {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn insert_room(&self, room: Room) {
        self.state().rooms.insert(room.id.clone(), room);
    }

    pub fn insert_participant(&self, record: ParticipantRecord) {
        self.state().participants.push(record);
    }

    /// Flip a room's active flag.
    pub fn set_room_active(&self, room_id: &str, is_active: bool) {
        if let Some(room) = self.state().rooms.get_mut(room_id) {
            room.is_active = is_active;
        }
    }

    /// Change the host of a room.
    pub fn set_room_host(&self, room_id: &str, host_id: &str) {
        if let Some(room) = self.state().rooms.get_mut(room_id) {
            room.host_id = host_id.to_string();
        }
    }

    // ------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------

    /// Make `op` fail with `RcError::Store` until [`Self::recover`] is called.
    pub fn fail_on(&self, op: StoreOperation) {
        self.state().failing.insert(op);
    }

    /// Clear every injected failure.
    pub fn recover(&self) {
        self.state().failing.clear();
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of times `op` has been called.
    #[must_use]
    pub fn calls(&self, op: StoreOperation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every participant record for (user, room), oldest first.
    #[must_use]
    pub fn participant_records(&self, user_id: &str, room_id: &str) -> Vec<ParticipantRecord> {
        self.state()
            .participants
            .iter()
            .filter(|p| p.user_id == user_id && p.room_id == room_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn waiting_status(&self, user_id: &str, room_id: &str) -> Option<WaitingStatus> {
        self.state()
            .waiting
            .get(&(user_id.to_string(), room_id.to_string()))
            .map(|e| e.status)
    }
}

#[async_trait::async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, RcError> {
        let state = self.begin(StoreOperation::GetUser)?;
        Ok(state.users.get(user_id).cloned())
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, RcError> {
        let state = self.begin(StoreOperation::GetRoom)?;
        Ok(state.rooms.get(room_id).cloned())
    }

    async fn get_participant_record(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<ParticipantRecord>, RcError> {
        let state = self.begin(StoreOperation::GetParticipantRecord)?;
        Ok(state
            .participants
            .iter()
            .filter(|p| p.user_id == user_id && p.room_id == room_id)
            .max_by_key(|p| (p.left_at.is_none(), p.joined_at))
            .cloned())
    }

    async fn set_participant_left_at(
        &self,
        user_id: &str,
        room_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<(), RcError> {
        let mut state = self.begin(StoreOperation::SetParticipantLeftAt)?;
        for record in state
            .participants
            .iter_mut()
            .filter(|p| p.user_id == user_id && p.room_id == room_id && p.left_at.is_none())
        {
            record.left_at = Some(left_at);
        }
        Ok(())
    }

    async fn create_participant_record(
        &self,
        user_id: &str,
        room_id: &str,
        role: Role,
    ) -> Result<ParticipantRecord, RcError> {
        let mut state = self.begin(StoreOperation::CreateParticipantRecord)?;
        let record = ParticipantRecord {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            role,
            joined_at: Utc::now(),
            left_at: None,
        };
        state.participants.push(record.clone());
        Ok(record)
    }

    async fn get_waiting_room_entry(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<WaitingRoomEntry>, RcError> {
        let state = self.begin(StoreOperation::GetWaitingRoomEntry)?;
        Ok(state
            .waiting
            .get(&(user_id.to_string(), room_id.to_string()))
            .cloned())
    }

    async fn set_waiting_room_status(
        &self,
        user_id: &str,
        room_id: &str,
        status: WaitingStatus,
    ) -> Result<(), RcError> {
        let mut state = self.begin(StoreOperation::SetWaitingRoomStatus)?;
        if let Some(entry) = state
            .waiting
            .get_mut(&(user_id.to_string(), room_id.to_string()))
        {
            entry.status = status;
        }
        Ok(())
    }
}

/// Room fixture with the usual defaults: active, video on, capacity 10.
#[must_use]
pub fn test_room(id: &str, host_id: &str) -> Room {
    Room {
        id: id.to_string(),
        code: format!("code-{id}"),
        title: format!("Room {id}"),
        host_id: host_id.to_string(),
        is_active: true,
        video_enabled: true,
        audio_only: false,
        max_participants: 10,
        waiting_room_enabled: false,
    }
}
