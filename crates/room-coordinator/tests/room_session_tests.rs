//! Integration tests for room sessions: join, leave, disconnect, chat and
//! media toggles, checked against the Presence Registry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rc_test_utils::*;
use room_coordinator::session::ServerEvent;
use room_coordinator::store::{Role, StoreOperation};

// ============================================================================
// Registry invariants
// ============================================================================

#[tokio::test]
async fn test_registry_never_lists_empty_rooms() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    assert!(harness.registry().await.is_empty());

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    assert_eq!(harness.registry().await[ROOM_ID].len(), 2);

    guest.send(leave_room(ROOM_ID)).await;
    assert_eq!(harness.registry().await[ROOM_ID].len(), 1);

    host.disconnect().await;
    assert!(harness.registry().await.is_empty());
    assert!(harness.controller.get_room(ROOM_ID.to_string()).await.unwrap().is_none());

    // A fresh join after pruning gets a new room
    guest.send(join_room(ROOM_ID)).await;
    assert_eq!(harness.registry().await[ROOM_ID].len(), 1);
}

#[tokio::test]
async fn test_rejoin_yields_single_entry_with_defaults() {
    let harness = TestHarness::new(scenario_store());
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    guest.send(join_room(ROOM_ID)).await;
    guest.send(toggle_audio(ROOM_ID, true)).await;
    guest.send(toggle_video(ROOM_ID, true)).await;

    let registry = harness.registry().await;
    let entry = &registry[ROOM_ID][0];
    assert!(entry.muted);
    assert!(entry.video_off);

    // Reconnect without leaving
    let mut reconnected = harness.connect(GUEST_ID, GUEST_NAME).await;
    reconnected.send(join_room(ROOM_ID)).await;

    let registry = harness.registry().await;
    let entries = &registry[ROOM_ID];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user_id, GUEST_ID);
    assert!(!entries[0].muted);
    assert!(!entries[0].video_off);
}

#[tokio::test]
async fn test_left_or_missing_record_cannot_join() {
    let harness = TestHarness::new(scenario_store());

    let mut former = harness.connect(FORMER_ID, "Fay").await;
    former.send(join_room(ROOM_ID)).await;
    former.expect_error("NOT_A_PARTICIPANT").await;

    let mut stranger = harness.connect("user-s", "Sam").await;
    stranger.send(join_room(ROOM_ID)).await;
    stranger.expect_error("NOT_A_PARTICIPANT").await;

    assert!(harness.registry().await.is_empty());
    assert!(former.joined_rooms().is_empty());
}

#[tokio::test]
async fn test_disconnect_leaves_every_joined_room() {
    let store = scenario_store()
        .with_room(room_coordinator::store::memory::test_room("room-b", HOST_ID))
        .with_participant(HOST_ID, "room-b", Role::Host)
        .with_participant(GUEST_ID, "room-b", Role::Guest);
    let harness = TestHarness::new(store);

    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    guest.send(join_room(ROOM_ID)).await;
    guest.send(join_room("room-b")).await;
    host.send(join_room("room-b")).await;
    assert_eq!(guest.joined_rooms().len(), 2);
    host.drain().await;

    guest.disconnect().await;

    let registry = harness.registry().await;
    // Room A had only the guest and is pruned; room B keeps the host
    assert!(!registry.contains_key(ROOM_ID));
    assert_eq!(registry["room-b"].len(), 1);
    assert_eq!(registry["room-b"][0].user_id, HOST_ID);

    assert_eq!(
        host.next_event().await,
        ServerEvent::ParticipantLeft {
            user_id: GUEST_ID.to_string()
        }
    );

    // Real-time leave does not touch the persisted record
    assert!(harness.store.participant_records(GUEST_ID, ROOM_ID)[0].is_active());
    assert_eq!(harness.store.calls(StoreOperation::SetParticipantLeftAt), 0);
}

#[tokio::test]
async fn test_join_error_paths() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;

    host.send(join_room("room-missing")).await;
    host.expect_error("ROOM_NOT_FOUND").await;

    harness.store.set_room_active(ROOM_ID, false);
    host.send(join_room(ROOM_ID)).await;
    host.expect_error("ROOM_INACTIVE").await;

    harness.store.set_room_active(ROOM_ID, true);
    harness.store.fail_on(StoreOperation::GetParticipantRecord);
    host.send(join_room(ROOM_ID)).await;
    host.expect_error("STORE_FAILURE").await;

    harness.store.recover();
    host.send(join_room(ROOM_ID)).await;
    host.expect_event("room-joined").await;
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;

    host.send_frame("not json").await;
    host.expect_error("BAD_REQUEST").await;

    host.send_frame(r#"{"event":"dance","data":{}}"#).await;
    host.expect_error("BAD_REQUEST").await;

    host.send_frame(r#"{"event":"join-room","data":{"roomId":"room-r"}}"#)
        .await;
    host.expect_event("room-joined").await;
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test]
async fn test_blank_chat_is_not_broadcast() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    guest.send(chat(ROOM_ID, "")).await;
    guest.send(chat(ROOM_ID, "   \n\t ")).await;

    host.assert_quiet().await;
    guest.assert_quiet().await;
}

#[tokio::test]
async fn test_chat_reaches_everyone_including_sender() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    guest.send(chat(ROOM_ID, "  hello  ")).await;

    for conn in [&mut host, &mut guest] {
        let event = conn.expect_event("chat-message").await;
        if let ServerEvent::ChatMessage(message) = event {
            assert_eq!(message.message, "hello");
            assert_eq!(message.user_id, GUEST_ID);
            assert_eq!(message.user_name, GUEST_NAME);
        }
    }
}

#[tokio::test]
async fn test_chat_requires_presence() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    // No live room at all
    guest.send(chat(ROOM_ID, "anyone?")).await;
    guest.expect_error("NOT_IN_ROOM").await;

    // Live room, but the guest never joined it
    host.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.send(chat(ROOM_ID, "let me in")).await;
    guest.expect_error("NOT_IN_ROOM").await;
    host.assert_quiet().await;
}

// ============================================================================
// Full scenario
// ============================================================================

#[tokio::test]
async fn test_host_guest_scenario() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    // Host joins
    host.send(join_room(ROOM_ID)).await;
    host.expect_event("room-joined").await;

    let registry = harness.registry().await;
    let entries = &registry[ROOM_ID];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user_id, HOST_ID);
    assert_eq!(entries[0].role, Role::Host);
    assert!(!entries[0].muted);
    assert!(!entries[0].video_off);

    // Guest joins
    guest.send(join_room(ROOM_ID)).await;
    assert_eq!(
        host.next_event().await,
        ServerEvent::ParticipantJoined {
            user_id: GUEST_ID.to_string(),
            name: GUEST_NAME.to_string(),
            role: Role::Guest,
        }
    );
    let event = guest.expect_event("room-joined").await;
    if let ServerEvent::RoomJoined {
        participants,
        settings,
        ..
    } = event
    {
        assert!(participants.iter().any(|p| p.user_id == HOST_ID));
        assert_eq!(settings.max_participants, 10);
        assert!(settings.video_enabled);
    }

    // Guest mutes
    guest.send(toggle_audio(ROOM_ID, true)).await;
    assert_eq!(
        host.next_event().await,
        ServerEvent::ParticipantAudioChanged {
            user_id: GUEST_ID.to_string(),
            is_muted: true,
        }
    );
    let registry = harness.registry().await;
    let guest_entry = registry[ROOM_ID]
        .iter()
        .find(|e| e.user_id == GUEST_ID)
        .unwrap();
    assert!(guest_entry.muted);

    // Host removes guest
    host.send(host_remove(ROOM_ID, GUEST_ID)).await;

    let records = harness.store.participant_records(GUEST_ID, ROOM_ID);
    assert!(records[0].left_at.is_some());

    let registry = harness.registry().await;
    assert_eq!(registry[ROOM_ID].len(), 1);
    assert_eq!(registry[ROOM_ID][0].user_id, HOST_ID);

    let removed = ServerEvent::ParticipantRemovedByHost {
        target_user_id: GUEST_ID.to_string(),
        removed_by: HOST_ID.to_string(),
    };
    assert_eq!(host.next_event().await, removed);
    assert_eq!(guest.next_event().await, removed);
    assert_eq!(
        guest.next_event().await,
        ServerEvent::YouWereRemoved {
            room_id: ROOM_ID.to_string()
        }
    );
    guest.process_signal().await;
    assert!(guest.joined_rooms().is_empty());

    // Evicted: the guest no longer receives room traffic
    host.send(chat(ROOM_ID, "bye")).await;
    host.expect_event("chat-message").await;
    guest.assert_quiet().await;

    // And cannot rejoin
    guest.send(join_room(ROOM_ID)).await;
    guest.expect_error("NOT_A_PARTICIPANT").await;
}

// ============================================================================
// Media toggles
// ============================================================================

#[tokio::test]
async fn test_toggle_is_silent_when_not_present_and_rebroadcasts_repeats() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    // No live room
    guest.send(toggle_audio(ROOM_ID, true)).await;
    guest.assert_quiet().await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    guest.send(toggle_video(ROOM_ID, true)).await;
    host.expect_event("participant-video-changed").await;
    // Sender is excluded
    guest.assert_quiet().await;

    // Same value again is still broadcast
    guest.send(toggle_video(ROOM_ID, true)).await;
    host.expect_event("participant-video-changed").await;
    guest.assert_quiet().await;

    let registry = harness.registry().await;
    let entry = registry[ROOM_ID]
        .iter()
        .find(|e| e.user_id == GUEST_ID)
        .unwrap();
    assert!(entry.video_off);
}
