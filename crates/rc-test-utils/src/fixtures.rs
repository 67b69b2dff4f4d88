//! Pre-configured test data.

use chrono::{Duration, Utc};
use common::jwt::UserClaims;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use room_coordinator::session::ClientCommand;
use room_coordinator::store::memory::test_room;
use room_coordinator::store::{InMemoryRoomStore, Role, WaitingStatus};

/// HS256 secret shared by [`TestToken`] and test authenticators.
pub const TEST_JWT_SECRET: &str = "rc-test-secret-0123456789abcdef0123";

pub const ROOM_ID: &str = "room-r";
pub const HOST_ID: &str = "user-h";
pub const HOST_NAME: &str = "Hana";
pub const GUEST_ID: &str = "user-g";
pub const GUEST_NAME: &str = "Gil";
pub const WAITING_ID: &str = "user-w";
pub const FORMER_ID: &str = "user-f";

/// Builder for HS256 connection credentials.
///
/// # Example
/// ```rust,ignore
/// let token = TestToken::new("alice").with_name("Alice").build();
/// ```
#[derive(Debug, Clone)]
pub struct TestToken {
    sub: String,
    name: Option<String>,
    exp: i64,
    iat: i64,
    secret: String,
}

impl TestToken {
    pub fn new(sub: &str) -> Self {
        let now = Utc::now();
        Self {
            sub: sub.to_string(),
            name: None,
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            secret: TEST_JWT_SECRET.to_string(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set expiration in seconds from now (negative for an expired token).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Sign with a different secret.
    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn build(self) -> String {
        let claims = UserClaims {
            sub: self.sub,
            name: self.name,
            exp: self.exp,
            iat: self.iat,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("HS256 encoding of test claims should not fail")
    }
}

/// Store seeded for the standard host/guest scenario:
///
/// - room [`ROOM_ID`] hosted by [`HOST_ID`]
/// - active records for the host and [`GUEST_ID`]
/// - [`FORMER_ID`] whose record has `leftAt` set
/// - [`WAITING_ID`] pending in the waiting room
pub fn scenario_store() -> InMemoryRoomStore {
    InMemoryRoomStore::new()
        .with_user(HOST_ID, HOST_NAME)
        .with_user(GUEST_ID, GUEST_NAME)
        .with_user(WAITING_ID, "Wren")
        .with_user(FORMER_ID, "Fay")
        .with_room(test_room(ROOM_ID, HOST_ID))
        .with_participant(HOST_ID, ROOM_ID, Role::Host)
        .with_participant(GUEST_ID, ROOM_ID, Role::Guest)
        .with_left_participant(FORMER_ID, ROOM_ID, Role::Guest)
        .with_waiting_entry(WAITING_ID, ROOM_ID, WaitingStatus::Pending)
}

pub fn join_room(room_id: &str) -> ClientCommand {
    ClientCommand::JoinRoom {
        room_id: room_id.to_string(),
    }
}

pub fn leave_room(room_id: &str) -> ClientCommand {
    ClientCommand::LeaveRoom {
        room_id: room_id.to_string(),
    }
}

pub fn chat(room_id: &str, message: &str) -> ClientCommand {
    ClientCommand::ChatMessage {
        room_id: room_id.to_string(),
        message: message.to_string(),
    }
}

pub fn toggle_audio(room_id: &str, is_muted: bool) -> ClientCommand {
    ClientCommand::ToggleAudio {
        room_id: room_id.to_string(),
        is_muted,
    }
}

pub fn toggle_video(room_id: &str, is_video_off: bool) -> ClientCommand {
    ClientCommand::ToggleVideo {
        room_id: room_id.to_string(),
        is_video_off,
    }
}

pub fn host_mute(room_id: &str, target_user_id: &str) -> ClientCommand {
    ClientCommand::HostMuteParticipant {
        room_id: room_id.to_string(),
        target_user_id: target_user_id.to_string(),
    }
}

pub fn host_remove(room_id: &str, target_user_id: &str) -> ClientCommand {
    ClientCommand::HostRemoveParticipant {
        room_id: room_id.to_string(),
        target_user_id: target_user_id.to_string(),
    }
}

pub fn approve_waiting(room_id: &str, user_id: &str) -> ClientCommand {
    ClientCommand::ApproveWaitingParticipant {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
    }
}

pub fn reject_waiting(room_id: &str, user_id: &str) -> ClientCommand {
    ClientCommand::RejectWaitingParticipant {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
    }
}
