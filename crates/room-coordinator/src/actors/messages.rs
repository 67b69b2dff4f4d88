//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed messages over
//! `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`.

use super::connection::ConnectionHandle;
use super::room::RoomHandle;
use crate::errors::RcError;
use crate::presence::{PresenceEntry, RegistrySnapshot};
use crate::session::protocol::{ChatMessage, RoomSettings, ServerEvent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `RoomControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Route to a room actor, spawning one if none is live.
    GetOrCreateRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomHandle, RcError>>,
    },

    /// Route to a live room actor, if any.
    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    /// Close the room actor if it holds no presence and no group members,
    /// and drop it from the index in the same step.
    PruneRoom {
        room_id: String,
        /// `true` if the room was removed.
        respond_to: oneshot::Sender<bool>,
    },

    /// A connection was opened for `user_id`.
    RegisterConnection { handle: ConnectionHandle },

    /// A connection was closed.
    UnregisterConnection {
        user_id: String,
        connection_id: String,
    },

    /// Tell every live connection of `user_id` it was removed from `room_id`.
    NotifyUserRemoved {
        user_id: String,
        room_id: String,
        respond_to: oneshot::Sender<usize>,
    },

    /// Presence of every room with at least one entry.
    Snapshot {
        respond_to: oneshot::Sender<RegistrySnapshot>,
    },

    /// Controller status (for `/status`).
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Cancel every room and wait up to `grace` for them to stop.
    Shutdown {
        grace: Duration,
        respond_to: oneshot::Sender<()>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add presence and group membership, unicast `room-joined`, then
    /// broadcast `participant-joined` to everyone else.
    Join {
        entry: PresenceEntry,
        connection: ConnectionHandle,
        settings: RoomSettings,
        respond_to: oneshot::Sender<()>,
    },

    /// Drop the connection from the group and the user's presence.
    Leave {
        user_id: String,
        connection_id: String,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// Relay a chat message to the whole group, sender included.
    Chat {
        message: ChatMessage,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Sender toggled their microphone.
    SetAudio {
        user_id: String,
        connection_id: String,
        muted: bool,
        respond_to: oneshot::Sender<bool>,
    },

    /// Sender toggled their camera.
    SetVideo {
        user_id: String,
        connection_id: String,
        video_off: bool,
        respond_to: oneshot::Sender<bool>,
    },

    /// Host muted a participant.
    HostMute {
        target_user_id: String,
        muted_by: String,
        respond_to: oneshot::Sender<()>,
    },

    /// Host removed a participant.
    HostRemove {
        target_user_id: String,
        removed_by: String,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// Fan an event out to the whole group.
    Broadcast {
        event: ServerEvent,
        respond_to: oneshot::Sender<()>,
    },

    /// Current presence and group size.
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },

    /// Stop if presence and group are both empty.
    CloseIfEmpty { respond_to: oneshot::Sender<bool> },
}

/// Result of removing someone from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// A presence entry was removed.
    pub removed: bool,
    /// Presence and group are both empty now.
    pub room_empty: bool,
}

/// Snapshot of one room actor.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: String,
    pub participants: Vec<PresenceEntry>,
    pub member_count: usize,
}

/// Controller status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub instance_id: String,
    pub room_count: usize,
    pub connection_count: usize,
    pub user_count: usize,
    pub mailbox_depth: usize,
    /// Presence entries per live room.
    pub presence: BTreeMap<String, usize>,
}
