//! End-to-end tests over a real WebSocket: the socket read loop, the
//! writer sink and disconnect cleanup.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::secret::SecretString;
use futures_util::{SinkExt, StreamExt};
use rc_test_utils::*;
use room_coordinator::auth::ConnectionAuthenticator;
use room_coordinator::presence::RegistrySnapshot;
use room_coordinator::server::{ws_router, ServerState};
use room_coordinator::session::{ClientCommand, ServerEvent};
use room_coordinator::store::Role;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve `/ws` for `harness` on an ephemeral port.
async fn spawn_server(harness: &TestHarness) -> SocketAddr {
    let authenticator = Arc::new(ConnectionAuthenticator::new(
        &SecretString::from(TEST_JWT_SECRET.to_string()),
        harness.store.clone(),
        Duration::from_secs(300),
    ));
    let state = Arc::new(ServerState::new(
        harness.coordinator.clone(),
        authenticator,
        16,
        Arc::clone(&harness.metrics),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, ws_router(state)).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, user_id: &str) -> Client {
    let token = TestToken::new(user_id).build();
    let (socket, _response) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .unwrap();
    socket
}

async fn send(client: &mut Client, command: ClientCommand) {
    let frame = serde_json::to_string(&command).unwrap();
    client.send(Message::Text(frame.into())).await.unwrap();
}

/// Next JSON event frame, skipping control frames.
async fn next_event(client: &mut Client) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(FRAME_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();

        if let Message::Text(text) = &message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
        assert!(
            matches!(message, Message::Ping(_) | Message::Pong(_)),
            "unexpected frame: {message:?}"
        );
    }
}

fn error_code(event: &ServerEvent) -> Option<&str> {
    match event {
        ServerEvent::Error { code, .. } => Some(code.as_str()),
        _ => None,
    }
}

/// Poll the registry until `check` holds or the timeout passes.
async fn registry_settles(
    harness: &TestHarness,
    check: impl Fn(&RegistrySnapshot) -> bool,
) -> bool {
    for _ in 0..100 {
        if check(&harness.registry().await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_dropped_socket_prunes_presence() {
    let harness = TestHarness::new(scenario_store());
    let addr = spawn_server(&harness).await;

    let mut host = connect(addr, HOST_ID).await;
    send(&mut host, join_room(ROOM_ID)).await;
    assert_eq!(next_event(&mut host).await.name(), "room-joined");
    assert_eq!(harness.registry().await[ROOM_ID].len(), 1);

    drop(host);

    assert!(registry_settles(&harness, RegistrySnapshot::is_empty).await);
    assert!(registry_settles(&harness, |_| harness.metrics.connection_count() == 0).await);
}

#[tokio::test]
async fn test_binary_frame_is_rejected_and_socket_stays_open() {
    let harness = TestHarness::new(scenario_store());
    let addr = spawn_server(&harness).await;
    let mut host = connect(addr, HOST_ID).await;

    host.send(Message::Binary(vec![0x01, 0x02].into()))
        .await
        .unwrap();
    assert_eq!(error_code(&next_event(&mut host).await), Some("BAD_REQUEST"));

    host.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(error_code(&next_event(&mut host).await), Some("BAD_REQUEST"));

    send(&mut host, join_room(ROOM_ID)).await;
    assert_eq!(next_event(&mut host).await.name(), "room-joined");
}

#[tokio::test]
async fn test_room_events_arrive_as_json_frames() {
    let harness = TestHarness::new(scenario_store());
    let addr = spawn_server(&harness).await;
    let mut host = connect(addr, HOST_ID).await;
    let mut guest = connect(addr, GUEST_ID).await;

    send(&mut host, join_room(ROOM_ID)).await;
    next_event(&mut host).await;

    send(&mut guest, join_room(ROOM_ID)).await;
    let joined = next_event(&mut guest).await;
    assert_eq!(joined.name(), "room-joined");
    if let ServerEvent::RoomJoined {
        room_id,
        participants,
        ..
    } = joined
    {
        assert_eq!(room_id, ROOM_ID);
        assert_eq!(participants.len(), 2);
    }
    assert_eq!(
        next_event(&mut host).await,
        ServerEvent::ParticipantJoined {
            user_id: GUEST_ID.to_string(),
            name: GUEST_NAME.to_string(),
            role: Role::Guest,
        }
    );

    send(&mut guest, chat(ROOM_ID, "  hello there  ")).await;
    for client in [&mut host, &mut guest] {
        let event = next_event(client).await;
        assert_eq!(event.name(), "chat-message");
        if let ServerEvent::ChatMessage(message) = event {
            assert_eq!(message.message, "hello there");
            assert_eq!(message.user_name, GUEST_NAME);
        }
    }
}

#[tokio::test]
async fn test_removal_reaches_socket_and_connection_survives() {
    let harness = TestHarness::new(scenario_store());
    let addr = spawn_server(&harness).await;
    let mut host = connect(addr, HOST_ID).await;
    let mut guest = connect(addr, GUEST_ID).await;

    send(&mut host, join_room(ROOM_ID)).await;
    next_event(&mut host).await;
    send(&mut guest, join_room(ROOM_ID)).await;
    next_event(&mut guest).await;
    next_event(&mut host).await;

    send(&mut host, host_remove(ROOM_ID, GUEST_ID)).await;
    assert_eq!(next_event(&mut host).await.name(), "participant-removed-by-host");
    assert_eq!(next_event(&mut guest).await.name(), "participant-removed-by-host");
    assert_eq!(
        next_event(&mut guest).await,
        ServerEvent::YouWereRemoved {
            room_id: ROOM_ID.to_string()
        }
    );

    // Still connected, but no longer a participant of record
    send(&mut guest, join_room(ROOM_ID)).await;
    assert_eq!(
        error_code(&next_event(&mut guest).await),
        Some("NOT_A_PARTICIPANT")
    );

    drop(guest);
    assert!(
        registry_settles(&harness, |registry| {
            registry.get(ROOM_ID).is_some_and(|entries| {
                entries.len() == 1 && entries.iter().all(|e| e.user_id == HOST_ID)
            })
        })
        .await
    );
    assert!(registry_settles(&harness, |_| harness.metrics.connection_count() == 1).await);
}
