//! In-process client connection.
//!
//! `TestConnection` runs a real `ConnectionActor` over a channel sink and
//! a real `Session`, so tests exercise the same code paths as a socket
//! without any network.

use room_coordinator::actors::{ActorMetrics, ChannelEventSink, ConnectionActor, ConnectionSignal};
use room_coordinator::auth::Identity;
use room_coordinator::session::{ClientCommand, ServerEvent, Session, SessionCoordinator};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `next_event` waits before failing the test.
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `assert_quiet` listens for stray events.
const QUIET_WINDOW: Duration = Duration::from_millis(50);

/// A connected, authenticated test client.
pub struct TestConnection {
    coordinator: SessionCoordinator,
    session: Option<Session>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    signals: mpsc::Receiver<ConnectionSignal>,
}

impl TestConnection {
    /// Open a session for `user_id` with connection id `conn-<user_id>-<n>`.
    pub async fn open(
        coordinator: &SessionCoordinator,
        connection_id: String,
        user_id: &str,
        name: &str,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let (handle, _task, signals) = ConnectionActor::spawn(
            connection_id,
            user_id.to_string(),
            ChannelEventSink::new(tx),
            coordinator.controller().child_token(),
            metrics,
        );
        let session = coordinator
            .open_session(
                Identity {
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                },
                handle,
            )
            .await
            .expect("session registration should succeed");

        Self {
            coordinator: coordinator.clone(),
            session: Some(session),
            events,
            signals,
        }
    }

    fn session_mut(&mut self) -> &mut Session {
        self.session.as_mut().expect("connection already closed")
    }

    pub fn user_id(&self) -> &str {
        self.session
            .as_ref()
            .expect("connection already closed")
            .user_id()
    }

    pub fn joined_rooms(&self) -> HashSet<String> {
        self.session
            .as_ref()
            .map(|s| s.joined_rooms().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Send a command and wait for it to be handled.
    pub async fn send(&mut self, command: ClientCommand) {
        let coordinator = self.coordinator.clone();
        coordinator.handle_command(self.session_mut(), command).await;
    }

    /// Send a raw text frame.
    pub async fn send_frame(&mut self, frame: &str) {
        let coordinator = self.coordinator.clone();
        coordinator.handle_frame(self.session_mut(), frame).await;
    }

    /// Next event delivered to this connection.
    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Next event, asserting its name.
    pub async fn expect_event(&mut self, name: &str) -> ServerEvent {
        let event = self.next_event().await;
        assert_eq!(event.name(), name, "unexpected event: {event:?}");
        event
    }

    /// Next event, asserting it is an `error` with `code`.
    pub async fn expect_error(&mut self, code: &str) {
        match self.next_event().await {
            ServerEvent::Error { code: actual, .. } => assert_eq!(actual, code),
            other => panic!("expected error {code}, got {other:?}"),
        }
    }

    /// Assert nothing arrives within a short window.
    pub async fn assert_quiet(&mut self) {
        tokio::time::sleep(QUIET_WINDOW).await;
        if let Ok(event) = self.events.try_recv() {
            panic!("expected no events, got {event:?}");
        }
    }

    /// Discard everything received so far.
    pub async fn drain(&mut self) {
        tokio::time::sleep(QUIET_WINDOW).await;
        while self.events.try_recv().is_ok() {}
    }

    /// Wait for the next connection signal and apply it to the session.
    pub async fn process_signal(&mut self) -> ConnectionSignal {
        let signal = tokio::time::timeout(EVENT_TIMEOUT, self.signals.recv())
            .await
            .expect("timed out waiting for signal")
            .expect("signal channel closed");
        let coordinator = self.coordinator.clone();
        coordinator.handle_signal(self.session_mut(), signal.clone());
        signal
    }

    /// Close the session as a socket disconnect would.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.coordinator.close_session(session).await;
        }
    }
}
