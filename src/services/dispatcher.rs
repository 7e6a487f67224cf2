use crate::domain::event::ServerEvent;
use crate::services::presence::{ConnId, PresenceRegistry};
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, UpDownCounter},
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
struct Metrics {
    outbound_dropped_total: Counter<u64>,
    active_connections: UpDownCounter<i64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            outbound_dropped_total: meter
                .u64_counter("parley_outbound_dropped_total")
                .with_description("Events dropped due to a full outbound buffer")
                .build(),
            active_connections: meter
                .i64_up_down_counter("parley_active_connections")
                .with_description("Number of registered gateway connections")
                .build(),
        }
    }
}

/// Fans `ServerEvent`s out to connections: room-scoped, global, or directed.
/// Each connection gets a bounded outbound queue; an event that cannot be
/// enqueued is dropped and counted. Offline users simply miss directed
/// events — the persisted message and room state cover catch-up.
#[derive(Debug)]
pub struct Dispatcher {
    presence: Arc<PresenceRegistry>,
    conns: DashMap<ConnId, mpsc::Sender<ServerEvent>>,
    rooms: DashMap<String, HashSet<ConnId>>,
    buffer_size: usize,
    metrics: Metrics,
}

impl Dispatcher {
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>, buffer_size: usize) -> Self {
        Self { presence, conns: DashMap::new(), rooms: DashMap::new(), buffer_size, metrics: Metrics::new() }
    }

    /// Registers a connection and returns the receiving end of its outbound
    /// queue for the session task to pump into the socket.
    #[must_use]
    pub fn register(&self, conn_id: ConnId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.conns.insert(conn_id, tx);
        self.metrics.active_connections.add(1, &[]);
        rx
    }

    /// Drops the connection's queue and leaves every room channel.
    pub fn unregister(&self, conn_id: ConnId) {
        if self.conns.remove(&conn_id).is_some() {
            self.metrics.active_connections.add(-1, &[]);
        }
        self.rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Channel membership is explicit and independent of login.
    pub fn join_room(&self, room_id: &str, conn_id: ConnId) {
        self.rooms.entry(room_id.to_owned()).or_default().insert(conn_id);
    }

    pub fn leave_room(&self, room_id: &str, conn_id: ConnId) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(&conn_id);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms.remove_if(room_id, |_, members| members.is_empty());
            }
        }
    }

    pub fn broadcast_room(&self, room_id: &str, event: &ServerEvent) {
        self.fan_out_room(room_id, None, event);
    }

    /// Room broadcast excluding one connection, for typing indicators where
    /// the sender must not hear their own signal.
    pub fn broadcast_room_except(&self, room_id: &str, skip: ConnId, event: &ServerEvent) {
        self.fan_out_room(room_id, Some(skip), event);
    }

    /// Sends to every registered connection, room membership regardless.
    pub fn broadcast_all(&self, event: &ServerEvent) {
        for entry in &self.conns {
            self.enqueue(*entry.key(), entry.value(), event);
        }
    }

    /// Directed send, resolved through the presence registry. Dropped when
    /// the user is offline; there is no queued delivery.
    pub fn send_to_user(&self, username: &str, event: &ServerEvent) -> bool {
        let Some(conn_id) = self.presence.lookup(username) else {
            tracing::debug!(%username, "Directed event dropped, user offline");
            return false;
        };
        self.send_to_conn(conn_id, event)
    }

    pub fn send_to_conn(&self, conn_id: ConnId, event: &ServerEvent) -> bool {
        let Some(tx) = self.conns.get(&conn_id) else {
            return false;
        };
        self.enqueue(conn_id, tx.value(), event)
    }

    fn fan_out_room(&self, room_id: &str, skip: Option<ConnId>, event: &ServerEvent) {
        // Copy the member set out so the map guard is not held across sends.
        let members: Vec<ConnId> = match self.rooms.get(room_id) {
            Some(members) => members.iter().copied().collect(),
            None => return,
        };
        for conn_id in members {
            if Some(conn_id) == skip {
                continue;
            }
            if let Some(tx) = self.conns.get(&conn_id) {
                self.enqueue(conn_id, tx.value(), event);
            }
        }
    }

    fn enqueue(&self, conn_id: ConnId, tx: &mpsc::Sender<ServerEvent>, event: &ServerEvent) -> bool {
        match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.outbound_dropped_total.add(1, &[KeyValue::new("reason", "full")]);
                tracing::warn!(%conn_id, "Outbound buffer full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.outbound_dropped_total.add(1, &[KeyValue::new("reason", "closed")]);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use uuid::Uuid;

    fn dispatcher() -> (Dispatcher, Arc<PresenceRegistry>) {
        let presence = Arc::new(PresenceRegistry::new(Arc::new(MemoryStore::new())));
        (Dispatcher::new(Arc::clone(&presence), 8), presence)
    }

    fn typing_event() -> ServerEvent {
        ServerEvent::Typing { room_id: "room".into(), sender: "alice".into() }
    }

    #[tokio::test]
    async fn room_broadcast_reaches_members_only() {
        crate::telemetry::init_test_telemetry();

        let (dispatcher, _) = dispatcher();
        let in_room = Uuid::new_v4();
        let outside = Uuid::new_v4();
        let mut in_rx = dispatcher.register(in_room);
        let mut out_rx = dispatcher.register(outside);
        dispatcher.join_room("room", in_room);

        dispatcher.broadcast_room("room", &typing_event());

        assert!(in_rx.try_recv().is_ok());
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn except_variant_skips_the_sender() {
        let (dispatcher, _) = dispatcher();
        let sender = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut sender_rx = dispatcher.register(sender);
        let mut peer_rx = dispatcher.register(peer);
        dispatcher.join_room("room", sender);
        dispatcher.join_room("room", peer);

        dispatcher.broadcast_room_except("room", sender, &typing_event());

        assert!(peer_rx.try_recv().is_ok());
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn directed_send_requires_presence() {
        let (dispatcher, presence) = dispatcher();
        let conn = Uuid::new_v4();
        let mut rx = dispatcher.register(conn);

        assert!(!dispatcher.send_to_user("alice", &typing_event()));

        presence.join("alice", conn).await.expect("join");
        assert!(dispatcher.send_to_user("alice", &typing_event()));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let (dispatcher, _) = dispatcher();
        let conn = Uuid::new_v4();
        let _rx = dispatcher.register(conn);

        for _ in 0..8 {
            assert!(dispatcher.send_to_conn(conn, &typing_event()));
        }
        assert!(!dispatcher.send_to_conn(conn, &typing_event()));
    }

    #[tokio::test]
    async fn unregister_leaves_all_rooms() {
        let (dispatcher, _) = dispatcher();
        let conn = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let _rx = dispatcher.register(conn);
        let mut peer_rx = dispatcher.register(peer);
        dispatcher.join_room("room", conn);
        dispatcher.join_room("room", peer);

        dispatcher.unregister(conn);
        dispatcher.broadcast_room("room", &typing_event());

        assert!(peer_rx.try_recv().is_ok());
    }
}
