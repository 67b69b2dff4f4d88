//! Integration tests for host moderation and the waiting room.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use rc_test_utils::*;
use room_coordinator::session::ServerEvent;
use room_coordinator::store::{ParticipantRecord, Role, StoreOperation, WaitingStatus};

#[tokio::test]
async fn test_remove_self_has_no_effect() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;
    let before = harness.registry().await;

    host.send(host_remove(ROOM_ID, HOST_ID)).await;

    host.expect_error("CANNOT_REMOVE_SELF").await;
    host.assert_quiet().await;
    guest.assert_quiet().await;
    assert_eq!(harness.registry().await, before);
    assert_eq!(harness.store.calls(StoreOperation::SetParticipantLeftAt), 0);
}

#[tokio::test]
async fn test_mute_broadcasts_without_target_presence() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    guest.disconnect().await;
    host.drain().await;

    host.send(host_mute(ROOM_ID, GUEST_ID)).await;

    assert_eq!(
        host.next_event().await,
        ServerEvent::ParticipantMutedByHost {
            target_user_id: GUEST_ID.to_string(),
            muted_by: HOST_ID.to_string(),
        }
    );
    // No presence entry is created for the absent target
    let registry = harness.registry().await;
    assert_eq!(registry[ROOM_ID].len(), 1);
}

#[tokio::test]
async fn test_mute_sets_target_presence() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    host.send(host_mute(ROOM_ID, GUEST_ID)).await;
    guest.expect_event("participant-muted-by-host").await;

    let registry = harness.registry().await;
    let entry = registry[ROOM_ID]
        .iter()
        .find(|e| e.user_id == GUEST_ID)
        .unwrap();
    assert!(entry.muted);
}

#[tokio::test]
async fn test_non_host_moderation_is_forbidden() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    guest.send(host_mute(ROOM_ID, HOST_ID)).await;
    guest.expect_error("FORBIDDEN").await;
    guest.send(host_remove(ROOM_ID, HOST_ID)).await;
    guest.expect_error("FORBIDDEN").await;
    guest.send(approve_waiting(ROOM_ID, WAITING_ID)).await;
    guest.expect_error("FORBIDDEN").await;

    host.assert_quiet().await;
    assert!(harness.store.participant_records(HOST_ID, ROOM_ID)[0].is_active());
    assert_eq!(
        harness.store.waiting_status(WAITING_ID, ROOM_ID),
        Some(WaitingStatus::Pending)
    );
}

#[tokio::test]
async fn test_remove_reaches_every_live_connection_of_target() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut laptop = harness.connect(GUEST_ID, GUEST_NAME).await;
    let mut phone = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    laptop.send(join_room(ROOM_ID)).await;
    host.drain().await;
    laptop.drain().await;

    host.send(host_remove(ROOM_ID, GUEST_ID)).await;

    // The phone never joined the room but still learns of the removal
    phone.expect_event("you-were-removed").await;
    laptop.expect_event("participant-removed-by-host").await;
    laptop.expect_event("you-were-removed").await;
}

#[tokio::test]
async fn test_remove_store_failure_changes_nothing() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    harness.store.fail_on(StoreOperation::SetParticipantLeftAt);
    host.send(host_remove(ROOM_ID, GUEST_ID)).await;

    host.expect_error("STORE_FAILURE").await;
    guest.assert_quiet().await;
    assert_eq!(harness.registry().await[ROOM_ID].len(), 2);
}

#[tokio::test]
async fn test_approve_waiting_participant() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut waiting = harness.connect(WAITING_ID, "Wren").await;

    // Not yet approved
    waiting.send(join_room(ROOM_ID)).await;
    waiting.expect_error("NOT_A_PARTICIPANT").await;

    host.send(join_room(ROOM_ID)).await;
    host.drain().await;

    host.send(approve_waiting(ROOM_ID, WAITING_ID)).await;
    assert_eq!(
        host.next_event().await,
        ServerEvent::WaitingRoomApproved {
            user_id: WAITING_ID.to_string()
        }
    );
    assert_eq!(
        harness.store.waiting_status(WAITING_ID, ROOM_ID),
        Some(WaitingStatus::Approved)
    );
    let records = harness.store.participant_records(WAITING_ID, ROOM_ID);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].role, Role::Guest);

    waiting.send(join_room(ROOM_ID)).await;
    waiting.expect_event("room-joined").await;
}

#[tokio::test]
async fn test_reject_waiting_participant() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    host.drain().await;

    host.send(reject_waiting(ROOM_ID, WAITING_ID)).await;
    host.expect_event("waiting-room-rejected").await;
    assert_eq!(
        harness.store.waiting_status(WAITING_ID, ROOM_ID),
        Some(WaitingStatus::Rejected)
    );
    assert!(harness.store.participant_records(WAITING_ID, ROOM_ID).is_empty());

    host.send(reject_waiting(ROOM_ID, "user-nobody")).await;
    host.expect_error("WAITING_ENTRY_NOT_FOUND").await;
}

#[tokio::test]
async fn test_stale_removal_does_not_strand_presence_after_rejoin() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;
    host.drain().await;
    guest.drain().await;

    host.send(host_remove(ROOM_ID, GUEST_ID)).await;
    guest.expect_event("participant-removed-by-host").await;
    guest.expect_event("you-were-removed").await;

    // Re-admitted and rejoined before the session sees the removal
    harness.store.insert_participant(ParticipantRecord {
        user_id: GUEST_ID.to_string(),
        room_id: ROOM_ID.to_string(),
        role: Role::Guest,
        joined_at: Utc::now(),
        left_at: None,
    });
    guest.send(join_room(ROOM_ID)).await;
    guest.expect_event("room-joined").await;

    guest.process_signal().await;
    assert!(guest.joined_rooms().contains(ROOM_ID));

    guest.disconnect().await;
    let registry = harness.registry().await;
    assert_eq!(registry[ROOM_ID].len(), 1);
    assert_eq!(registry[ROOM_ID][0].user_id, HOST_ID);
}
