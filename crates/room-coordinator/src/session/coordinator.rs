//! Room session coordinator.
//!
//! Drives one authenticated connection through the room protocol:
//! join/leave, chat, media toggles and host moderation. Every command
//! resolves to `Result<(), RcError>` and goes through a single
//! error-to-event path in [`SessionCoordinator::handle_command`].
//!
//! Presence is always subordinate to the persisted participant record:
//! join checks the record, everything after that trusts presence.

use super::moderation::ModerationHandler;
use super::protocol::{ChatMessage, ClientCommand, RoomSettings, ServerEvent};
use crate::actors::{ConnectionHandle, ConnectionSignal, RoomControllerHandle};
use crate::auth::Identity;
use crate::errors::RcError;
use crate::observability::metrics;
use crate::presence::{PresenceEntry, RegistrySnapshot};
use crate::store::{ParticipantRecord, RoomStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Attempts to route a join when the target room actor closes under us.
const ROUTE_ATTEMPTS: usize = 3;

/// Metric label for frames that do not decode to a command.
const INVALID_FRAME: &str = "invalid-frame";

/// One live, authenticated connection.
#[derive(Debug)]
pub struct Session {
    identity: Identity,
    connection: ConnectionHandle,
    /// Joined room to the join generation that admitted it.
    joined_rooms: HashMap<String, u64>,
}

impl Session {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.connection.connection_id()
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Rooms this connection has joined and not left.
    pub fn joined_rooms(&self) -> impl Iterator<Item = &str> {
        self.joined_rooms.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_joined(&self, room_id: &str) -> bool {
        self.joined_rooms.contains_key(room_id)
    }
}

/// Shared entry point for every session. Cheap to clone.
#[derive(Clone)]
pub struct SessionCoordinator {
    controller: RoomControllerHandle,
    store: Arc<dyn RoomStore>,
    moderation: ModerationHandler,
    max_chat_length: usize,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(
        controller: RoomControllerHandle,
        store: Arc<dyn RoomStore>,
        max_chat_length: usize,
    ) -> Self {
        let moderation = ModerationHandler::new(controller.clone(), Arc::clone(&store));
        Self {
            controller,
            store,
            moderation,
            max_chat_length,
        }
    }

    #[must_use]
    pub fn controller(&self) -> &RoomControllerHandle {
        &self.controller
    }

    /// Register a freshly authenticated connection.
    pub async fn open_session(
        &self,
        identity: Identity,
        connection: ConnectionHandle,
    ) -> Result<Session, RcError> {
        self.controller
            .register_connection(connection.clone())
            .await?;

        debug!(
            target: "rc.session",
            connection_id = %connection.connection_id(),
            "Session opened"
        );

        Ok(Session {
            identity,
            connection,
            joined_rooms: HashMap::new(),
        })
    }

    /// Decode and handle one inbound text frame.
    pub async fn handle_frame(&self, session: &mut Session, frame: &str) {
        match ClientCommand::parse(frame) {
            Ok(command) => self.handle_command(session, command).await,
            Err(e) => {
                metrics::record_command(INVALID_FRAME, "error", std::time::Duration::ZERO);
                self.report(session, INVALID_FRAME, &e);
            }
        }
    }

    /// Handle one command. Failures become one `error` event to this
    /// connection; they never close it.
    pub async fn handle_command(&self, session: &mut Session, command: ClientCommand) {
        let name = command.name();
        let start = Instant::now();
        let result = self.dispatch(session, command).await;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_command(name, status, start.elapsed());

        if let Err(e) = result {
            self.report(session, name, &e);
        }
    }

    /// React to a signal from this session's connection actor.
    pub fn handle_signal(&self, session: &mut Session, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::RemovedFromRoom {
                room_id,
                generation,
            } => {
                let stale = session
                    .joined_rooms
                    .get(&room_id)
                    .is_some_and(|&joined| generation < joined);
                if stale {
                    debug!(
                        target: "rc.session",
                        connection_id = %session.connection_id(),
                        room_id = %room_id,
                        "Ignoring removal issued before the current join"
                    );
                    return;
                }

                session.joined_rooms.remove(&room_id);
                debug!(
                    target: "rc.session",
                    connection_id = %session.connection_id(),
                    room_id = %room_id,
                    "Session evicted from room"
                );
            }
        }
    }

    /// Tear down a session: leave every joined room, unregister, close the
    /// connection.
    ///
    /// Cleanup failures are logged; there is nothing to report them to.
    #[instrument(skip_all, name = "rc.session.close", fields(connection_id = %session.connection_id()))]
    pub async fn close_session(&self, mut session: Session) {
        let rooms: Vec<String> = session.joined_rooms.drain().map(|(id, _)| id).collect();
        for room_id in rooms {
            if let Err(e) = self
                .leave_room(session.user_id(), session.connection_id(), &room_id)
                .await
            {
                warn!(
                    target: "rc.session",
                    room_id = %room_id,
                    error = %e,
                    "Failed to leave room on disconnect"
                );
            }
        }

        if let Err(e) = self
            .controller
            .unregister_connection(
                session.user_id().to_string(),
                session.connection_id().to_string(),
            )
            .await
        {
            warn!(target: "rc.session", error = %e, "Failed to unregister connection");
        }

        session.connection.close("session closed");
        debug!(target: "rc.session", "Session closed");
    }

    /// Presence of every room with at least one entry.
    pub async fn registry_snapshot(&self) -> Result<RegistrySnapshot, RcError> {
        self.controller.snapshot().await
    }

    async fn dispatch(&self, session: &mut Session, command: ClientCommand) -> Result<(), RcError> {
        match command {
            ClientCommand::JoinRoom { room_id } => self.join(session, room_id).await,
            ClientCommand::LeaveRoom { room_id } => {
                session.joined_rooms.remove(&room_id);
                self.leave_room(session.user_id(), session.connection_id(), &room_id)
                    .await
            }
            ClientCommand::ChatMessage { room_id, message } => {
                self.chat(session, &room_id, &message).await
            }
            ClientCommand::ToggleAudio { room_id, is_muted } => {
                self.toggle(session, &room_id, Toggle::Audio(is_muted)).await
            }
            ClientCommand::ToggleVideo {
                room_id,
                is_video_off,
            } => {
                self.toggle(session, &room_id, Toggle::Video(is_video_off))
                    .await
            }
            ClientCommand::HostMuteParticipant {
                room_id,
                target_user_id,
            } => {
                self.moderation
                    .mute_participant(session.user_id(), &room_id, &target_user_id)
                    .await
            }
            ClientCommand::HostRemoveParticipant {
                room_id,
                target_user_id,
            } => {
                self.moderation
                    .remove_participant(session.user_id(), &room_id, &target_user_id)
                    .await
            }
            ClientCommand::ApproveWaitingParticipant { room_id, user_id } => {
                self.moderation
                    .approve_waiting(session.user_id(), &room_id, &user_id)
                    .await
            }
            ClientCommand::RejectWaitingParticipant { room_id, user_id } => {
                self.moderation
                    .reject_waiting(session.user_id(), &room_id, &user_id)
                    .await
            }
        }
    }

    #[instrument(skip_all, name = "rc.session.join", fields(room_id = %room_id))]
    async fn join(&self, session: &mut Session, room_id: String) -> Result<(), RcError> {
        let room = self
            .store
            .get_room(&room_id)
            .await?
            .ok_or(RcError::RoomNotFound)?;
        if !room.is_active {
            return Err(RcError::RoomInactive);
        }

        let record = self
            .store
            .get_participant_record(session.user_id(), &room_id)
            .await?
            .filter(ParticipantRecord::is_active)
            .ok_or(RcError::NotAParticipant)?;

        let entry = PresenceEntry::joined(
            session.user_id(),
            session.name(),
            record.role,
            room.video_enabled,
        );
        let settings = RoomSettings::from(&room);
        let generation = session.connection.next_join_generation();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let handle = self.controller.get_or_create_room(room_id.clone()).await?;
            match handle
                .join(entry.clone(), session.connection.clone(), settings.clone())
                .await
            {
                Ok(()) => break,
                Err(RcError::RoomClosed) if attempt < ROUTE_ATTEMPTS => {
                    debug!(
                        target: "rc.session",
                        room_id = %room_id,
                        attempt = attempt,
                        "Room closed during join, re-routing"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        session.joined_rooms.insert(room_id, generation);
        Ok(())
    }

    /// Presence-only leave; the persisted record is untouched.
    async fn leave_room(
        &self,
        user_id: &str,
        connection_id: &str,
        room_id: &str,
    ) -> Result<(), RcError> {
        let Some(room) = self.controller.get_room(room_id.to_string()).await? else {
            return Ok(());
        };

        match room
            .leave(user_id.to_string(), connection_id.to_string())
            .await
        {
            Ok(outcome) => {
                if outcome.room_empty {
                    self.controller.prune_room(room_id.to_string()).await?;
                }
                Ok(())
            }
            // Closed means it was already empty
            Err(RcError::RoomClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn chat(&self, session: &Session, room_id: &str, text: &str) -> Result<(), RcError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let message: String = trimmed.chars().take(self.max_chat_length).collect();

        let room = self
            .controller
            .get_room(room_id.to_string())
            .await?
            .ok_or(RcError::NotInRoom)?;

        room.chat(ChatMessage {
            id: Uuid::now_v7().to_string(),
            user_id: session.user_id().to_string(),
            user_name: session.name().to_string(),
            message,
            timestamp: Utc::now(),
        })
        .await
        .map_err(|e| match e {
            RcError::RoomClosed => RcError::NotInRoom,
            other => other,
        })
    }

    /// Silent no-op unless the sender is present in the room.
    async fn toggle(&self, session: &Session, room_id: &str, toggle: Toggle) -> Result<(), RcError> {
        let Some(room) = self.controller.get_room(room_id.to_string()).await? else {
            return Ok(());
        };

        let user_id = session.user_id().to_string();
        let connection_id = session.connection_id().to_string();
        let result = match toggle {
            Toggle::Audio(muted) => room.set_audio(user_id, connection_id, muted).await,
            Toggle::Video(video_off) => room.set_video(user_id, connection_id, video_off).await,
        };

        match result {
            Ok(_) | Err(RcError::RoomClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn report(&self, session: &Session, command: &'static str, err: &RcError) {
        metrics::record_command_error(err.error_code());

        if err.is_expected() {
            debug!(
                target: "rc.session",
                connection_id = %session.connection_id(),
                command = command,
                code = err.error_code(),
                "Command rejected"
            );
        } else {
            error!(
                target: "rc.session",
                connection_id = %session.connection_id(),
                command = command,
                error = %err,
                "Command failed"
            );
        }

        session.connection.deliver(ServerEvent::error(err));
    }
}

#[derive(Debug, Clone, Copy)]
enum Toggle {
    Audio(bool),
    Video(bool),
}
