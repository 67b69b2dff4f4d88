//! Wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`. Event names are kebab-case and
//! payload fields camelCase.

use crate::errors::RcError;
use crate::presence::PresenceEntry;
use crate::store::{Role, Room};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commands a client may send once authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    ChatMessage { room_id: String, message: String },
    ToggleAudio { room_id: String, is_muted: bool },
    ToggleVideo { room_id: String, is_video_off: bool },
    HostMuteParticipant { room_id: String, target_user_id: String },
    HostRemoveParticipant { room_id: String, target_user_id: String },
    ApproveWaitingParticipant { room_id: String, user_id: String },
    RejectWaitingParticipant { room_id: String, user_id: String },
}

impl ClientCommand {
    /// Event name, also used as the `command` metric label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinRoom { .. } => "join-room",
            ClientCommand::LeaveRoom { .. } => "leave-room",
            ClientCommand::ChatMessage { .. } => "chat-message",
            ClientCommand::ToggleAudio { .. } => "toggle-audio",
            ClientCommand::ToggleVideo { .. } => "toggle-video",
            ClientCommand::HostMuteParticipant { .. } => "host-mute-participant",
            ClientCommand::HostRemoveParticipant { .. } => "host-remove-participant",
            ClientCommand::ApproveWaitingParticipant { .. } => "approve-waiting-participant",
            ClientCommand::RejectWaitingParticipant { .. } => "reject-waiting-participant",
        }
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `RcError::BadRequest` for anything that is not a known command.
    pub fn parse(frame: &str) -> Result<Self, RcError> {
        serde_json::from_str(frame).map_err(|e| {
            tracing::debug!(target: "rc.session", error = %e, "Undecodable frame");
            RcError::BadRequest("Malformed or unknown event".to_string())
        })
    }
}

/// Room settings sent with `room-joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub video_enabled: bool,
    pub audio_only: bool,
    pub max_participants: i32,
    pub title: String,
    pub code: String,
}

impl From<&Room> for RoomSettings {
    fn from(room: &Room) -> Self {
        Self {
            video_enabled: room.video_enabled,
            audio_only: room.audio_only,
            max_participants: room.max_participants,
            title: room.title.clone(),
            code: room.code.clone(),
        }
    }
}

/// A relayed chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Events the server sends to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    RoomJoined {
        room_id: String,
        participants: Vec<PresenceEntry>,
        settings: RoomSettings,
    },
    ParticipantJoined {
        user_id: String,
        name: String,
        role: Role,
    },
    ParticipantLeft {
        user_id: String,
    },
    ChatMessage(ChatMessage),
    ParticipantAudioChanged {
        user_id: String,
        is_muted: bool,
    },
    ParticipantVideoChanged {
        user_id: String,
        is_video_off: bool,
    },
    ParticipantMutedByHost {
        target_user_id: String,
        muted_by: String,
    },
    ParticipantRemovedByHost {
        target_user_id: String,
        removed_by: String,
    },
    YouWereRemoved {
        room_id: String,
    },
    WaitingRoomApproved {
        user_id: String,
    },
    WaitingRoomRejected {
        user_id: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// Client-facing error event for `err`.
    #[must_use]
    pub fn error(err: &RcError) -> Self {
        ServerEvent::Error {
            code: err.error_code().to_string(),
            message: err.client_message(),
        }
    }

    /// Event name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined { .. } => "room-joined",
            ServerEvent::ParticipantJoined { .. } => "participant-joined",
            ServerEvent::ParticipantLeft { .. } => "participant-left",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::ParticipantAudioChanged { .. } => "participant-audio-changed",
            ServerEvent::ParticipantVideoChanged { .. } => "participant-video-changed",
            ServerEvent::ParticipantMutedByHost { .. } => "participant-muted-by-host",
            ServerEvent::ParticipantRemovedByHost { .. } => "participant-removed-by-host",
            ServerEvent::YouWereRemoved { .. } => "you-were-removed",
            ServerEvent::WaitingRoomApproved { .. } => "waiting-room-approved",
            ServerEvent::WaitingRoomRejected { .. } => "waiting-room-rejected",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Internal` if serialization fails.
    pub fn to_frame(&self) -> Result<String, RcError> {
        serde_json::to_string(self)
            .map_err(|e| RcError::Internal(format!("event serialization failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_room() {
        let cmd = ClientCommand::parse(r#"{"event":"join-room","data":{"roomId":"r1"}}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::JoinRoom {
                room_id: "r1".to_string()
            }
        );
        assert_eq!(cmd.name(), "join-room");
    }

    #[test]
    fn test_parse_toggle_and_moderation_fields() {
        let cmd = ClientCommand::parse(
            r#"{"event":"toggle-audio","data":{"roomId":"r1","isMuted":true}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::ToggleAudio {
                room_id: "r1".to_string(),
                is_muted: true
            }
        );

        let cmd = ClientCommand::parse(
            r#"{"event":"host-remove-participant","data":{"roomId":"r1","targetUserId":"u2"}}"#,
        )
        .unwrap();
        assert_eq!(cmd.name(), "host-remove-participant");

        let cmd = ClientCommand::parse(
            r#"{"event":"reject-waiting-participant","data":{"roomId":"r1","userId":"u3"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::RejectWaitingParticipant {
                room_id: "r1".to_string(),
                user_id: "u3".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        for frame in [
            "not json",
            r#"{"event":"dance","data":{}}"#,
            r#"{"event":"join-room","data":{}}"#,
            r#"{"event":"toggle-video","data":{"roomId":"r1","isVideoOff":"yes"}}"#,
        ] {
            let err = ClientCommand::parse(frame).unwrap_err();
            assert_eq!(err.error_code(), "BAD_REQUEST", "frame: {frame}");
        }
    }

    #[test]
    fn test_room_joined_wire_format() {
        let event = ServerEvent::RoomJoined {
            room_id: "r1".to_string(),
            participants: vec![PresenceEntry::joined("h", "Hana", Role::Host, true)],
            settings: RoomSettings {
                video_enabled: true,
                audio_only: false,
                max_participants: 10,
                title: "Standup".to_string(),
                code: "abc-def".to_string(),
            },
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "room-joined",
                "data": {
                    "roomId": "r1",
                    "participants": [{
                        "userId": "h",
                        "name": "Hana",
                        "isMuted": false,
                        "isVideoOff": false,
                        "role": "HOST"
                    }],
                    "settings": {
                        "videoEnabled": true,
                        "audioOnly": false,
                        "maxParticipants": 10,
                        "title": "Standup",
                        "code": "abc-def"
                    }
                }
            })
        );
    }

    #[test]
    fn test_chat_message_wire_format() {
        let event = ServerEvent::ChatMessage(ChatMessage {
            id: "m1".to_string(),
            user_id: "u1".to_string(),
            user_name: "Ana".to_string(),
            message: "hi".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(value["event"], "chat-message");
        assert_eq!(value["data"]["userName"], "Ana");
        assert_eq!(value["data"]["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_error_event_uses_client_message() {
        let event = ServerEvent::error(&RcError::Store("pg down at 10.1.1.1".to_string()));
        assert_eq!(
            event,
            ServerEvent::Error {
                code: "STORE_FAILURE".to_string(),
                message: "An internal error occurred".to_string(),
            }
        );
    }

    #[test]
    fn test_moderation_event_field_names() {
        let event = ServerEvent::ParticipantMutedByHost {
            target_user_id: "g".to_string(),
            muted_by: "h".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "participant-muted-by-host", "data": {"targetUserId": "g", "mutedBy": "h"}})
        );
    }
}
