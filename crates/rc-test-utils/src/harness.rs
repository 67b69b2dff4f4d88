//! Test harness wiring a store, controller and session coordinator.

use crate::connection::TestConnection;
use room_coordinator::actors::{ActorMetrics, RoomControllerHandle};
use room_coordinator::presence::RegistrySnapshot;
use room_coordinator::session::SessionCoordinator;
use room_coordinator::store::InMemoryRoomStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Chat length limit used by the harness.
pub const TEST_MAX_CHAT_LENGTH: usize = 2000;

/// In-process Room Coordinator.
pub struct TestHarness {
    pub store: Arc<InMemoryRoomStore>,
    pub controller: RoomControllerHandle,
    pub coordinator: SessionCoordinator,
    pub metrics: Arc<ActorMetrics>,
    next_connection: AtomicUsize,
}

impl TestHarness {
    pub fn new(store: InMemoryRoomStore) -> Self {
        let store = Arc::new(store);
        let metrics = ActorMetrics::new();
        let controller = RoomControllerHandle::new("rc-test".to_string(), Arc::clone(&metrics));
        let coordinator =
            SessionCoordinator::new(controller.clone(), store.clone(), TEST_MAX_CHAT_LENGTH);
        Self {
            store,
            controller,
            coordinator,
            metrics,
            next_connection: AtomicUsize::new(0),
        }
    }

    /// Open a new connection for `user_id`.
    pub async fn connect(&self, user_id: &str, name: &str) -> TestConnection {
        let n = self.next_connection.fetch_add(1, Ordering::Relaxed);
        TestConnection::open(
            &self.coordinator,
            format!("conn-{user_id}-{n}"),
            user_id,
            name,
            Arc::clone(&self.metrics),
        )
        .await
    }

    /// Current Presence Registry view.
    pub async fn registry(&self) -> RegistrySnapshot {
        self.coordinator
            .registry_snapshot()
            .await
            .expect("controller should answer snapshot")
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.controller.cancel();
    }
}
