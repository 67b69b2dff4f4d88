//! Actor model implementation for the room coordinator.
//!
//! ```text
//! RoomControllerActor (singleton)
//! ├── indexes live connections by user id
//! └── supervises N RoomActors
//!     └── RoomActor (one per room with presence or group members)
//!         ├── owns the room's presence table
//!         └── owns the room's broadcast group (ConnectionHandles)
//!
//! ConnectionActor (one per WebSocket, owned by its session)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per room**: presence mutations are mailbox messages to
//!   the room's actor, so unrelated rooms never contend
//! - **CancellationToken propagation**: rooms and connections hold child
//!   tokens of the controller's root token
//! - **Mailbox monitoring**: depth thresholds (Room: 100/500, Connection: 50/200)
//! - **Non-blocking fan-out**: rooms enqueue into connection mailboxes with
//!   `try_send`; a full mailbox drops the event for that receiver only
//!
//! # Modules
//!
//! - [`controller`] - `RoomControllerActor` singleton that routes and prunes rooms
//! - [`room`] - `RoomActor` per live room
//! - [`connection`] - `ConnectionActor` per WebSocket
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;

// Re-export primary types
pub use connection::{ChannelEventSink, ConnectionActor, ConnectionHandle, ConnectionSignal, EventSink};
pub use controller::{RoomControllerActor, RoomControllerHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::{RoomActor, RoomHandle};
