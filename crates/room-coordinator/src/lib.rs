//! Room Coordinator Service Library
//!
//! Real-time session coordinator for small video-conferencing rooms:
//!
//! - Authenticates WebSocket connections with a bearer credential
//! - Admits users into rooms they hold an active participant record for
//! - Tracks live presence (audio/video state) per room
//! - Fans out chat, media toggles and join/leave announcements
//! - Executes host moderation: mute, remove, waiting-room approve/reject
//!
//! # Architecture
//!
//! ```text
//! RoomControllerActor (singleton)
//! ├── connection index (user id -> live connections)
//! └── RoomActor (one per live room)
//!     ├── presence table
//!     └── broadcast group
//!
//! ConnectionActor (one per WebSocket)
//! ```
//!
//! Durable state (users, rooms, participant records, waiting room) lives
//! in Postgres behind the [`store::RoomStore`] trait. Live presence is
//! in-memory and lost on restart.
//!
//! # Modules
//!
//! - [`actors`] - Actor hierarchy (controller, room, connection)
//! - [`auth`] - Connection authentication
//! - [`broadcast`] - Per-room broadcast group
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error taxonomy with client-safe messages
//! - [`observability`] - Metrics, health and status endpoints
//! - [`presence`] - Per-room presence table
//! - [`server`] - WebSocket endpoint
//! - [`session`] - Wire protocol, session coordinator and moderation
//! - [`store`] - External store adapter

pub mod actors;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod observability;
pub mod presence;
pub mod server;
pub mod session;
pub mod store;
