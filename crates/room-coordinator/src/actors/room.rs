//! `RoomActor` - per-room actor that owns presence and the broadcast group.
//!
//! Each `RoomActor`:
//! - Is the single writer for one room's presence table
//! - Owns the room's broadcast group (live connections joined to the room)
//! - Applies every join/leave/toggle/moderation mutation as one mailbox
//!   message, so mutations are atomic per room while unrelated rooms run
//!   in parallel
//!
//! # Lifecycle
//!
//! 1. Spawned by `RoomControllerActor` on the first join routed to the room
//! 2. Closed by the controller once presence and group are both empty
//! 3. Cancellation via child token propagates from the controller
//!
//! Callers that race a closing actor get [`RcError::RoomClosed`] and
//! re-route through the controller.

use super::connection::ConnectionHandle;
use super::messages::{LeaveOutcome, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::broadcast::BroadcastGroup;
use crate::errors::RcError;
use crate::presence::{PresenceEntry, RoomPresence};
use crate::session::protocol::{ChatMessage, RoomSettings, ServerEvent};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Add `entry` to presence and `connection` to the group.
    ///
    /// The joiner is sent `room-joined` before anyone else is sent
    /// `participant-joined`.
    pub async fn join(
        &self,
        entry: PresenceEntry,
        connection: ConnectionHandle,
        settings: RoomSettings,
    ) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Join {
            entry,
            connection,
            settings,
            respond_to,
        })
        .await
    }

    /// Remove the connection from the group and the user's presence entry.
    pub async fn leave(
        &self,
        user_id: String,
        connection_id: String,
    ) -> Result<LeaveOutcome, RcError> {
        self.request(|respond_to| RoomMessage::Leave {
            user_id,
            connection_id,
            respond_to,
        })
        .await
    }

    /// Relay a chat message to the whole group.
    ///
    /// Fails with `NotInRoom` if the sender has no presence entry.
    pub async fn chat(&self, message: ChatMessage) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Chat {
            message,
            respond_to,
        })
        .await?
    }

    /// Returns false (and broadcasts nothing) if the user is not present.
    pub async fn set_audio(
        &self,
        user_id: String,
        connection_id: String,
        muted: bool,
    ) -> Result<bool, RcError> {
        self.request(|respond_to| RoomMessage::SetAudio {
            user_id,
            connection_id,
            muted,
            respond_to,
        })
        .await
    }

    /// Returns false (and broadcasts nothing) if the user is not present.
    pub async fn set_video(
        &self,
        user_id: String,
        connection_id: String,
        video_off: bool,
    ) -> Result<bool, RcError> {
        self.request(|respond_to| RoomMessage::SetVideo {
            user_id,
            connection_id,
            video_off,
            respond_to,
        })
        .await
    }

    pub async fn host_mute(&self, target_user_id: String, muted_by: String) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::HostMute {
            target_user_id,
            muted_by,
            respond_to,
        })
        .await
    }

    pub async fn host_remove(
        &self,
        target_user_id: String,
        removed_by: String,
    ) -> Result<LeaveOutcome, RcError> {
        self.request(|respond_to| RoomMessage::HostRemove {
            target_user_id,
            removed_by,
            respond_to,
        })
        .await
    }

    pub async fn broadcast(&self, event: ServerEvent) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Broadcast { event, respond_to })
            .await
    }

    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    /// Ask the actor to stop if it is empty. Returns true if it stopped.
    pub async fn close_if_empty(&self) -> Result<bool, RcError> {
        self.request(|respond_to| RoomMessage::CloseIfEmpty { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if self.sender.send(build(tx)).await.is_err() {
            self.mailbox.record_drop();
            return Err(RcError::RoomClosed);
        }
        // Reply dropped: the actor stopped with our message still queued
        rx.await.map_err(|_| RcError::RoomClosed)
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    presence: RoomPresence,
    group: BroadcastGroup,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, &room_id));

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            presence: RoomPresence::new(),
            group: BroadcastGroup::new(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            participants = self.presence.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join {
                entry,
                connection,
                settings,
                respond_to,
            } => {
                self.handle_join(entry, connection, settings);
                let _ = respond_to.send(());
            }

            RoomMessage::Leave {
                user_id,
                connection_id,
                respond_to,
            } => {
                let outcome = self.handle_leave(&user_id, &connection_id);
                let _ = respond_to.send(outcome);
            }

            RoomMessage::Chat {
                message,
                respond_to,
            } => {
                let result = if self.presence.contains(&message.user_id) {
                    self.group.broadcast(&ServerEvent::ChatMessage(message), None);
                    Ok(())
                } else {
                    Err(RcError::NotInRoom)
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::SetAudio {
                user_id,
                connection_id,
                muted,
                respond_to,
            } => {
                let changed = self.presence.set_muted(&user_id, muted);
                if changed {
                    self.group.broadcast(
                        &ServerEvent::ParticipantAudioChanged {
                            user_id,
                            is_muted: muted,
                        },
                        Some(&connection_id),
                    );
                }
                let _ = respond_to.send(changed);
            }

            RoomMessage::SetVideo {
                user_id,
                connection_id,
                video_off,
                respond_to,
            } => {
                let changed = self.presence.set_video_off(&user_id, video_off);
                if changed {
                    self.group.broadcast(
                        &ServerEvent::ParticipantVideoChanged {
                            user_id,
                            is_video_off: video_off,
                        },
                        Some(&connection_id),
                    );
                }
                let _ = respond_to.send(changed);
            }

            RoomMessage::HostMute {
                target_user_id,
                muted_by,
                respond_to,
            } => {
                // Target may already be gone; clients still get the event
                self.presence.set_muted(&target_user_id, true);
                self.group.broadcast(
                    &ServerEvent::ParticipantMutedByHost {
                        target_user_id,
                        muted_by,
                    },
                    None,
                );
                let _ = respond_to.send(());
            }

            RoomMessage::HostRemove {
                target_user_id,
                removed_by,
                respond_to,
            } => {
                let outcome = self.handle_host_remove(target_user_id, removed_by);
                let _ = respond_to.send(outcome);
            }

            RoomMessage::Broadcast { event, respond_to } => {
                self.group.broadcast(&event, None);
                let _ = respond_to.send(());
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    room_id: self.room_id.clone(),
                    participants: self.presence.snapshot(),
                    member_count: self.group.len(),
                });
            }

            RoomMessage::CloseIfEmpty { respond_to } => {
                let empty = self.is_empty();
                let _ = respond_to.send(empty);
                if empty {
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "Room empty, closing"
                    );
                    return true;
                }
            }
        }
        false
    }

    fn handle_join(
        &mut self,
        entry: PresenceEntry,
        connection: ConnectionHandle,
        settings: RoomSettings,
    ) {
        let joined = ServerEvent::ParticipantJoined {
            user_id: entry.user_id.clone(),
            name: entry.name.clone(),
            role: entry.role,
        };
        let user_id = entry.user_id.clone();
        let connection_id = connection.connection_id().to_string();

        let replaced = self.presence.upsert(entry);
        self.group.add(connection);

        // Joiner first, then everyone else
        self.group.unicast(
            &connection_id,
            ServerEvent::RoomJoined {
                room_id: self.room_id.clone(),
                participants: self.presence.snapshot(),
                settings,
            },
        );
        let delivery = self.group.broadcast(&joined, Some(&connection_id));

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            connection_id = %connection_id,
            replaced = replaced,
            notified = delivery.delivered,
            "Participant joined"
        );
    }

    fn handle_leave(&mut self, user_id: &str, connection_id: &str) -> LeaveOutcome {
        self.group.remove(connection_id);
        self.group.prune_closed();

        let removed = self.presence.remove(user_id).is_some();
        if removed {
            self.group.broadcast(
                &ServerEvent::ParticipantLeft {
                    user_id: user_id.to_string(),
                },
                None,
            );
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                user_id = %user_id,
                remaining = self.presence.len(),
                "Participant left"
            );
        }

        LeaveOutcome {
            removed,
            room_empty: self.is_empty(),
        }
    }

    fn handle_host_remove(&mut self, target_user_id: String, removed_by: String) -> LeaveOutcome {
        let removed = self.presence.remove(&target_user_id).is_some();

        // Target's own connections still see the broadcast before eviction
        self.group.broadcast(
            &ServerEvent::ParticipantRemovedByHost {
                target_user_id: target_user_id.clone(),
                removed_by,
            },
            None,
        );
        let evicted = self.group.remove_user(&target_user_id);

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            target_user_id = %target_user_id,
            had_presence = removed,
            evicted_connections = evicted.len(),
            "Participant removed by host"
        );

        LeaveOutcome {
            removed,
            room_empty: self.is_empty(),
        }
    }

    fn is_empty(&self) -> bool {
        self.presence.is_empty() && self.group.is_empty()
    }

    fn graceful_shutdown(&mut self) {
        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            participants = self.presence.len(),
            connections = self.group.len(),
            "Performing graceful shutdown"
        );
        // Connection actors belong to their sessions and are cancelled
        // through their own tokens.
        self.presence = RoomPresence::new();
        self.group = BroadcastGroup::new();
    }
}
