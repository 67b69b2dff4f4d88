//! `ConnectionActor` - per-WebSocket writer actor.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one client connection
//! - Writes outbound events in mailbox order, which keeps per-sender order
//! - Delivers `you-were-removed` and reports the eviction back to the session
//!
//! Room actors enqueue with [`ConnectionHandle::deliver`], which never
//! waits: a full or closed mailbox drops the event for this receiver only.
//!
//! # Lifecycle
//!
//! 1. Spawned by the session after the upgrade is authenticated
//! 2. Runs until the socket fails, the session closes it, or shutdown
//! 3. Cancellation via child token propagates from the controller

use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::RcError;
use crate::session::protocol::ServerEvent;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
pub const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Capacity of the connection-to-session signal channel.
const SIGNAL_CHANNEL_BUFFER: usize = 16;

/// Destination for a connection's outbound events.
///
/// The WebSocket server implements this over the socket's write half;
/// tests implement it over a channel.
#[async_trait::async_trait]
pub trait EventSink: Send + 'static {
    /// Write one event.
    async fn send_event(&mut self, event: &ServerEvent) -> Result<(), RcError>;

    /// Close the underlying transport.
    async fn close(&mut self);
}

/// [`EventSink`] that forwards events into a channel.
#[derive(Debug)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelEventSink {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelEventSink {
    async fn send_event(&mut self, event: &ServerEvent) -> Result<(), RcError> {
        self.tx
            .send(event.clone())
            .map_err(|_| RcError::Internal("event receiver dropped".to_string()))
    }

    async fn close(&mut self) {}
}

/// Signals from a connection actor to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// The host removed this user from `room_id`.
    ///
    /// `generation` is the connection's join generation when the removal
    /// was issued. A session that joined the room again since then ignores
    /// the signal.
    RemovedFromRoom { room_id: String, generation: u64 },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
enum ConnectionMessage {
    Deliver { event: ServerEvent },
    Removed { room_id: String, generation: u64 },
    Close { reason: &'static str },
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    user_id: String,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<ActorMetrics>,
    join_generation: Arc<AtomicU64>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue an event without waiting.
    ///
    /// Returns false if the event was dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.enqueue(ConnectionMessage::Deliver { event })
    }

    /// Queue `you-were-removed` for `room_id`, stamped with the current
    /// join generation.
    pub fn notify_removed(&self, room_id: &str) -> bool {
        self.enqueue(ConnectionMessage::Removed {
            room_id: room_id.to_string(),
            generation: self.join_generation.load(Ordering::SeqCst),
        })
    }

    /// Start a new join on this connection and return its generation.
    ///
    /// Must be taken before the room sees the join, so any removal issued
    /// afterwards carries a generation at least this high.
    pub fn next_join_generation(&self) -> u64 {
        self.join_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Ask the actor to close the transport after draining queued events.
    pub fn close(&self, reason: &'static str) {
        if self.sender.try_send(ConnectionMessage::Close { reason }).is_err() {
            // Full or already gone; cancel instead
            self.cancel_token.cancel();
        }
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

    fn enqueue(&self, message: ConnectionMessage) -> bool {
        self.mailbox.record_enqueue();
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                self.mailbox.record_drop();
                self.metrics.record_event_dropped();
                debug!(
                    target: "rc.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Outbound event dropped"
                );
                false
            }
        }
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S: EventSink> {
    connection_id: String,
    user_id: String,
    receiver: mpsc::Receiver<ConnectionMessage>,
    sink: S,
    signals: mpsc::Sender<ConnectionSignal>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl<S: EventSink> ConnectionActor<S> {
    /// Spawn a connection actor writing to `sink`.
    ///
    /// Returns the handle, the task join handle and the receiver the
    /// session reads [`ConnectionSignal`]s from.
    pub fn spawn(
        connection_id: String,
        user_id: String,
        sink: S,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (
        ConnectionHandle,
        JoinHandle<()>,
        mpsc::Receiver<ConnectionSignal>,
    ) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        metrics.connection_opened();

        let actor = Self {
            connection_id: connection_id.clone(),
            user_id: user_id.clone(),
            receiver,
            sink,
            signals: signal_tx,
            cancel_token: cancel_token.clone(),
            metrics: Arc::clone(&metrics),
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
            user_id,
            mailbox,
            metrics,
            join_generation: Arc::new(AtomicU64::new(0)),
        };

        (handle, task_handle, signal_rx)
    }

    #[instrument(
        skip_all,
        name = "rc.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.sink.close().await;
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
                            debug!(
                                target: "rc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => !self.write(&event).await,

            ConnectionMessage::Removed {
                room_id,
                generation,
            } => {
                let written = self
                    .write(&ServerEvent::YouWereRemoved {
                        room_id: room_id.clone(),
                    })
                    .await;

                if self
                    .signals
                    .try_send(ConnectionSignal::RemovedFromRoom {
                        room_id,
                        generation,
                    })
                    .is_err()
                {
                    warn!(
                        target: "rc.actor.connection",
                        connection_id = %self.connection_id,
                        "Session did not accept removal signal"
                    );
                }
                !written
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "rc.actor.connection",
                    connection_id = %self.connection_id,
                    reason = reason,
                    "Closing connection"
                );
                self.sink.close().await;
                true
            }
        }
    }

    /// Write an event. Returns false if the transport failed.
    async fn write(&mut self, event: &ServerEvent) -> bool {
        match self.sink.send_event(event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "rc.actor.connection",
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    event = event.name(),
                    error = %e,
                    "Write failed, stopping connection actor"
                );
                false
            }
        }
    }
}
