//! Broadcast group: the live connections associated with one room.
//!
//! Owned by the room's `RoomActor`. Delivery is best-effort and never
//! waits on a slow receiver; ordering per receiver follows the order in
//! which the room actor enqueues.

use crate::actors::connection::ConnectionHandle;
use crate::session::protocol::ServerEvent;
use std::collections::HashMap;

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Connections subscribed to a room, keyed by connection id.
#[derive(Debug, Default)]
pub struct BroadcastGroup {
    members: HashMap<String, ConnectionHandle>,
}

impl BroadcastGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns false if it was already a member.
    pub fn add(&mut self, handle: ConnectionHandle) -> bool {
        self.members
            .insert(handle.connection_id().to_string(), handle)
            .is_none()
    }

    pub fn remove(&mut self, connection_id: &str) -> Option<ConnectionHandle> {
        self.members.remove(connection_id)
    }

    /// Remove every connection belonging to `user_id`.
    pub fn remove_user(&mut self, user_id: &str) -> Vec<ConnectionHandle> {
        let ids: Vec<String> = self
            .members
            .values()
            .filter(|h| h.user_id() == user_id)
            .map(|h| h.connection_id().to_string())
            .collect();
        ids.iter()
            .filter_map(|id| self.members.remove(id))
            .collect()
    }

    /// Drop members whose connection actor has stopped.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.members.len();
        self.members.retain(|_, h| !h.is_closed());
        before - self.members.len()
    }

    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Send `event` to one member.
    pub fn unicast(&self, connection_id: &str, event: ServerEvent) -> bool {
        self.members
            .get(connection_id)
            .is_some_and(|h| h.deliver(event))
    }

    /// Send `event` to every member, optionally skipping one connection.
    pub fn broadcast(&self, event: &ServerEvent, except: Option<&str>) -> Delivery {
        let mut delivery = Delivery::default();
        for (id, handle) in &self.members {
            if except == Some(id.as_str()) {
                continue;
            }
            if handle.deliver(event.clone()) {
                delivery.delivered += 1;
            } else {
                delivery.dropped += 1;
            }
        }
        delivery
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::{ChannelEventSink, ConnectionActor};
    use crate::actors::metrics::ActorMetrics;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn member(
        connection_id: &str,
        user_id: &str,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, _task, _signals) = ConnectionActor::spawn(
            connection_id.to_string(),
            user_id.to_string(),
            ChannelEventSink::new(tx),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        (handle, rx)
    }

    fn left() -> ServerEvent {
        ServerEvent::ParticipantLeft {
            user_id: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_connection() {
        let mut group = BroadcastGroup::new();
        let (a, mut rx_a) = member("c-a", "alice");
        let (b, mut rx_b) = member("c-b", "bob");
        group.add(a);
        group.add(b);

        let delivery = group.broadcast(&left(), Some("c-a"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.dropped, 0);

        assert_eq!(rx_b.recv().await.unwrap(), left());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_user_takes_all_of_their_connections() {
        let mut group = BroadcastGroup::new();
        let (a1, _r1) = member("c-1", "alice");
        let (a2, _r2) = member("c-2", "alice");
        let (b, _r3) = member("c-3", "bob");
        group.add(a1);
        group.add(a2);
        group.add(b);

        let removed = group.remove_user("alice");
        assert_eq!(removed.len(), 2);
        assert_eq!(group.len(), 1);
        assert!(group.contains("c-3"));
    }

    #[tokio::test]
    async fn test_add_is_idempotent_per_connection() {
        let mut group = BroadcastGroup::new();
        let (a, _rx) = member("c-a", "alice");
        assert!(group.add(a.clone()));
        assert!(!group.add(a));
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_counts_dead_members_as_dropped() {
        let mut group = BroadcastGroup::new();
        let (a, _rx) = member("c-a", "alice");
        a.cancel();
        group.add(a.clone());

        // Wait for the actor to stop
        while !a.is_closed() {
            tokio::task::yield_now().await;
        }

        let delivery = group.broadcast(&left(), None);
        assert_eq!(delivery.dropped, 1);
        assert_eq!(group.prune_closed(), 1);
        assert!(group.is_empty());
    }
}
