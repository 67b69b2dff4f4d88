//! Per-connection room protocol.
//!
//! - [`protocol`] - wire format of client commands and server events
//! - [`coordinator`] - join/leave/chat/toggle and the single error path
//! - [`moderation`] - host-only operations

pub mod coordinator;
pub mod moderation;
pub mod protocol;

pub use coordinator::{Session, SessionCoordinator};
pub use moderation::ModerationHandler;
pub use protocol::{ClientCommand, ServerEvent};
