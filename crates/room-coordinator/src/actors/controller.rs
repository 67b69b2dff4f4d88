//! `RoomControllerActor` - singleton supervisor for room actors.
//!
//! The `RoomControllerActor` is the top-level actor of the coordinator:
//!
//! - Singleton per process
//! - Owns the room-id to `RoomActor` index (the presence registry's keys)
//! - Owns the user-id to live-connection index used for targeted eviction
//! - Prunes room actors once their presence and group are both empty
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! Room actors never call back into the controller, so the controller may
//! await a room's reply from inside its own loop.

use super::connection::ConnectionHandle;
use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle};
use crate::errors::RcError;
use crate::presence::RegistrySnapshot;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long a pruned room actor gets to finish before we stop watching it.
const ROOM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomControllerActor`.
///
/// This is the public interface for routing to rooms. All methods are
/// async and return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct RoomControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomControllerHandle {
    /// Create a new `RoomControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(instance_id: String, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Controller, &instance_id));

        let actor = RoomControllerActor {
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            connections: HashMap::new(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    /// Route to the room's actor, spawning one if none is live.
    pub async fn get_or_create_room(&self, room_id: String) -> Result<RoomHandle, RcError> {
        self.request(|respond_to| ControllerMessage::GetOrCreateRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Route to the room's actor without creating one.
    pub async fn get_room(&self, room_id: String) -> Result<Option<RoomHandle>, RcError> {
        self.request(|respond_to| ControllerMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await
    }

    /// Close and forget the room's actor if it is empty.
    pub async fn prune_room(&self, room_id: String) -> Result<bool, RcError> {
        self.request(|respond_to| ControllerMessage::PruneRoom {
            room_id,
            respond_to,
        })
        .await
    }

    pub async fn register_connection(&self, handle: ConnectionHandle) -> Result<(), RcError> {
        self.send(ControllerMessage::RegisterConnection { handle })
            .await
    }

    pub async fn unregister_connection(
        &self,
        user_id: String,
        connection_id: String,
    ) -> Result<(), RcError> {
        self.send(ControllerMessage::UnregisterConnection {
            user_id,
            connection_id,
        })
        .await
    }

    /// Send `you-were-removed` to every live connection of `user_id`.
    ///
    /// Returns the number of connections notified.
    pub async fn notify_user_removed(
        &self,
        user_id: String,
        room_id: String,
    ) -> Result<usize, RcError> {
        self.request(|respond_to| ControllerMessage::NotifyUserRemoved {
            user_id,
            room_id,
            respond_to,
        })
        .await
    }

    /// Presence of every room that has at least one entry.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RcError> {
        self.request(|respond_to| ControllerMessage::Snapshot { respond_to })
            .await
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, RcError> {
        self.request(|respond_to| ControllerMessage::GetStatus { respond_to })
            .await
    }

    /// Cancel every room and wait up to `grace` for them to stop.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RcError> {
        self.request(|respond_to| ControllerMessage::Shutdown { grace, respond_to })
            .await
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning connection actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, message: ControllerMessage) -> Result<(), RcError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_drop();
            RcError::Internal(format!("controller channel send failed: {e}"))
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|e| RcError::Internal(format!("controller response receive failed: {e}")))
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    instance_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<String, ManagedRoom>,
    /// Live connections by user id, then connection id.
    connections: HashMap<String, HashMap<String, ConnectionHandle>>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomControllerActor {
    #[instrument(skip_all, name = "rc.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            "RoomControllerActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.controller",
                        instance_id = %self.instance_id,
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown(ROOM_STOP_TIMEOUT).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "rc.actor.controller",
                                instance_id = %self.instance_id,
                                "RoomControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ControllerMessage) -> bool {
        match message {
            ControllerMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let handle = self
                    .rooms
                    .get(&room_id)
                    .filter(|managed| !managed.handle.is_closed())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(handle);
            }

            ControllerMessage::PruneRoom {
                room_id,
                respond_to,
            } => {
                let pruned = self.prune_room(&room_id).await;
                let _ = respond_to.send(pruned);
            }

            ControllerMessage::RegisterConnection { handle } => {
                debug!(
                    target: "rc.actor.controller",
                    connection_id = %handle.connection_id(),
                    "Connection registered"
                );
                self.connections
                    .entry(handle.user_id().to_string())
                    .or_default()
                    .insert(handle.connection_id().to_string(), handle);
            }

            ControllerMessage::UnregisterConnection {
                user_id,
                connection_id,
            } => {
                if let Some(by_id) = self.connections.get_mut(&user_id) {
                    by_id.remove(&connection_id);
                    if by_id.is_empty() {
                        self.connections.remove(&user_id);
                    }
                }
            }

            ControllerMessage::NotifyUserRemoved {
                user_id,
                room_id,
                respond_to,
            } => {
                let notified = self.connections.get(&user_id).map_or(0, |by_id| {
                    by_id
                        .values()
                        .filter(|handle| handle.notify_removed(&room_id))
                        .count()
                });
                debug!(
                    target: "rc.actor.controller",
                    room_id = %room_id,
                    notified = notified,
                    "Removed user notified"
                );
                let _ = respond_to.send(notified);
            }

            ControllerMessage::Snapshot { respond_to } => {
                let snapshot = self.snapshot().await;
                let _ = respond_to.send(snapshot);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let status = self.get_status().await;
                let _ = respond_to.send(status);
            }

            ControllerMessage::Shutdown { grace, respond_to } => {
                self.cancel_token.cancel();
                self.graceful_shutdown(grace).await;
                let _ = respond_to.send(());
                return true;
            }
        }
        false
    }

    fn get_or_create_room(&mut self, room_id: String) -> Result<RoomHandle, RcError> {
        if self.cancel_token.is_cancelled() {
            return Err(RcError::Internal("Coordinator is shutting down".to_string()));
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
            // Stopped but not yet reaped; health check reports how it ended
            if let Some(stale) = self.rooms.remove(&room_id) {
                self.reap(room_id.clone(), stale);
            }
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.room_created();

        debug!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    async fn prune_room(&mut self, room_id: &str) -> bool {
        let Some(managed) = self.rooms.get(room_id) else {
            return false;
        };

        let close = match managed.handle.close_if_empty().await {
            Ok(closed) => closed,
            // Already stopped
            Err(RcError::RoomClosed) => true,
            Err(e) => {
                warn!(
                    target: "rc.actor.controller",
                    room_id = %room_id,
                    error = %e,
                    "Failed to prune room"
                );
                false
            }
        };

        if close {
            if let Some(managed) = self.rooms.remove(room_id) {
                self.reap(room_id.to_string(), managed);
            }
            debug!(
                target: "rc.actor.controller",
                instance_id = %self.instance_id,
                room_id = %room_id,
                total_rooms = self.rooms.len(),
                "Room actor pruned"
            );
        }
        close
    }

    /// Stop tracking a removed room; wait for its task off the message loop.
    fn reap(&self, room_id: String, managed: ManagedRoom) {
        self.metrics.room_removed();

        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rc.actor.controller",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        metrics.record_panic(ActorType::Room);
                    }
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor stop timed out"
                    );
                    managed.handle.cancel();
                }
            }
        });
    }

    async fn snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::new();
        for (room_id, managed) in &self.rooms {
            if let Ok(state) = managed.handle.get_state().await {
                if !state.participants.is_empty() {
                    snapshot.insert(room_id.clone(), state.participants);
                }
            }
        }
        snapshot
    }

    async fn get_status(&self) -> ControllerStatus {
        let presence: BTreeMap<String, usize> = self
            .snapshot()
            .await
            .into_iter()
            .map(|(room_id, entries)| (room_id, entries.len()))
            .collect();

        ControllerStatus {
            instance_id: self.instance_id.clone(),
            room_count: self.rooms.len(),
            connection_count: self.connections.values().map(HashMap::len).sum(),
            user_count: self.connections.len(),
            mailbox_depth: self.mailbox.current_depth(),
            presence,
        }
    }

    async fn graceful_shutdown(&mut self, grace: Duration) {
        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        // Rooms hold child tokens; cancel explicitly anyway
        for managed in self.rooms.values() {
            managed.handle.cancel();
        }
        for by_id in self.connections.values() {
            for handle in by_id.values() {
                handle.close("shutdown");
            }
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(grace, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.controller",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }
        self.connections.clear();

        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            if let Some(managed) = self.rooms.remove(&room_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        warn!(
                            target: "rc.actor.controller",
                            instance_id = %self.instance_id,
                            room_id = %room_id,
                            "Room actor exited without being pruned"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "rc.actor.controller",
                                instance_id = %self.instance_id,
                                room_id = %room_id,
                                error = ?join_error,
                                "Room actor panicked - presence for this room is lost"
                            );
                            self.metrics.record_panic(ActorType::Room);
                        }
                    }
                }
                self.metrics.room_removed();
            }
        }
    }
}
