//! Host moderation.
//!
//! Every operation first resolves the persisted room and requires the caller
//! to be its host. A refused operation changes nothing and broadcasts
//! nothing; the caller gets an `error` event.
//!
//! Removal is the only operation that writes a participant record directly,
//! so it stays durable even if the target is disconnected at the time.

use crate::actors::RoomControllerHandle;
use crate::errors::RcError;
use crate::session::protocol::ServerEvent;
use crate::store::{Role, Room, RoomStore, WaitingStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Host-only operations on a room.
#[derive(Clone)]
pub struct ModerationHandler {
    controller: RoomControllerHandle,
    store: Arc<dyn RoomStore>,
}

impl ModerationHandler {
    #[must_use]
    pub fn new(controller: RoomControllerHandle, store: Arc<dyn RoomStore>) -> Self {
        Self { controller, store }
    }

    /// Mute `target_user_id`.
    ///
    /// `participant-muted-by-host` goes to the whole room even when the
    /// target has no live presence.
    #[instrument(skip_all, name = "rc.session.host_mute", fields(room_id = %room_id))]
    pub async fn mute_participant(
        &self,
        caller_id: &str,
        room_id: &str,
        target_user_id: &str,
    ) -> Result<(), RcError> {
        self.authorize_host(caller_id, room_id, "mute participants")
            .await?;

        if let Some(room) = self.controller.get_room(room_id.to_string()).await? {
            match room
                .host_mute(target_user_id.to_string(), caller_id.to_string())
                .await
            {
                // Closed under us: nobody left to tell
                Ok(()) | Err(RcError::RoomClosed) => {}
                Err(e) => return Err(e),
            }
        }

        debug!(
            target: "rc.session",
            room_id = %room_id,
            target_user_id = %target_user_id,
            "Participant muted by host"
        );
        Ok(())
    }

    /// Remove `target_user_id` from the room, durably.
    ///
    /// Order: persist `leftAt`, drop presence, broadcast
    /// `participant-removed-by-host`, evict the target's connections from
    /// the group, then send `you-were-removed` to each of them.
    #[instrument(skip_all, name = "rc.session.host_remove", fields(room_id = %room_id))]
    pub async fn remove_participant(
        &self,
        caller_id: &str,
        room_id: &str,
        target_user_id: &str,
    ) -> Result<(), RcError> {
        self.authorize_host(caller_id, room_id, "remove participants")
            .await?;

        if target_user_id == caller_id {
            return Err(RcError::CannotRemoveSelf);
        }

        self.store
            .set_participant_left_at(target_user_id, room_id, Utc::now())
            .await?;

        if let Some(room) = self.controller.get_room(room_id.to_string()).await? {
            match room
                .host_remove(target_user_id.to_string(), caller_id.to_string())
                .await
            {
                Ok(outcome) => {
                    if outcome.room_empty {
                        self.controller.prune_room(room_id.to_string()).await?;
                    }
                }
                Err(RcError::RoomClosed) => {}
                Err(e) => return Err(e),
            }
        }

        let notified = self
            .controller
            .notify_user_removed(target_user_id.to_string(), room_id.to_string())
            .await?;

        info!(
            target: "rc.session",
            room_id = %room_id,
            connections_notified = notified,
            "Participant removed by host"
        );
        Ok(())
    }

    /// Approve a waiting user.
    ///
    /// Creates a `GUEST` participant record unless an active one exists. The
    /// user still has to `join-room` to become present.
    #[instrument(skip_all, name = "rc.session.approve_waiting", fields(room_id = %room_id))]
    pub async fn approve_waiting(
        &self,
        caller_id: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), RcError> {
        self.authorize_host(caller_id, room_id, "approve waiting participants")
            .await?;

        self.store
            .get_waiting_room_entry(user_id, room_id)
            .await?
            .ok_or(RcError::WaitingEntryNotFound)?;

        self.store
            .set_waiting_room_status(user_id, room_id, WaitingStatus::Approved)
            .await?;

        let has_active_record = self
            .store
            .get_participant_record(user_id, room_id)
            .await?
            .is_some_and(|record| record.is_active());
        if !has_active_record {
            self.store
                .create_participant_record(user_id, room_id, Role::Guest)
                .await?;
        }

        self.broadcast(
            room_id,
            ServerEvent::WaitingRoomApproved {
                user_id: user_id.to_string(),
            },
        )
        .await?;

        info!(target: "rc.session", room_id = %room_id, "Waiting participant approved");
        Ok(())
    }

    /// Reject a waiting user. No participant record is created.
    #[instrument(skip_all, name = "rc.session.reject_waiting", fields(room_id = %room_id))]
    pub async fn reject_waiting(
        &self,
        caller_id: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), RcError> {
        self.authorize_host(caller_id, room_id, "reject waiting participants")
            .await?;

        self.store
            .get_waiting_room_entry(user_id, room_id)
            .await?
            .ok_or(RcError::WaitingEntryNotFound)?;

        self.store
            .set_waiting_room_status(user_id, room_id, WaitingStatus::Rejected)
            .await?;

        self.broadcast(
            room_id,
            ServerEvent::WaitingRoomRejected {
                user_id: user_id.to_string(),
            },
        )
        .await?;

        info!(target: "rc.session", room_id = %room_id, "Waiting participant rejected");
        Ok(())
    }

    async fn authorize_host(
        &self,
        caller_id: &str,
        room_id: &str,
        action: &str,
    ) -> Result<Room, RcError> {
        match self.store.get_room(room_id).await? {
            Some(room) if room.host_id == caller_id => Ok(room),
            _ => Err(RcError::Forbidden(format!("Only the host can {action}"))),
        }
    }

    /// Broadcast to the room's live group, if it has one.
    async fn broadcast(&self, room_id: &str, event: ServerEvent) -> Result<(), RcError> {
        let Some(room) = self.controller.get_room(room_id.to_string()).await? else {
            return Ok(());
        };
        match room.broadcast(event).await {
            Ok(()) | Err(RcError::RoomClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
