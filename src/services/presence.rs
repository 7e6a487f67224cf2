use crate::error::Result;
use crate::storage::ChatStore;
use dashmap::DashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Connection handle identity. Assigned per accepted socket.
pub type ConnId = Uuid;

/// In-memory map between usernames and their single active connection; the
/// source of truth for "who is online". Both directions are kept so
/// disconnect resolution is O(1) rather than a reverse scan.
///
/// Process-local: a multi-instance deployment needs a shared presence store
/// behind this same interface.
#[derive(Debug)]
pub struct PresenceRegistry {
    store: Arc<dyn ChatStore>,
    by_user: DashMap<String, ConnId>,
    by_conn: DashMap<ConnId, String>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store, by_user: DashMap::new(), by_conn: DashMap::new() }
    }

    /// Records `username` ⇄ `conn_id` and marks the user online in the
    /// store. A later join for the same username overwrites the earlier
    /// mapping (last-writer-wins; no multi-device fan-out). Returns the
    /// connection that was displaced, if any.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the online upsert fails; the
    /// in-memory mapping is still updated.
    #[tracing::instrument(skip(self), fields(username = %username, conn_id = %conn_id))]
    pub async fn join(&self, username: &str, conn_id: ConnId) -> Result<Option<ConnId>> {
        let displaced = self.by_user.insert(username.to_owned(), conn_id);
        if let Some(old_conn) = displaced {
            self.by_conn.remove(&old_conn);
            tracing::info!(%old_conn, "Connection takeover: earlier mapping displaced");
        }
        self.by_conn.insert(conn_id, username.to_owned());

        self.store.upsert_user_online(username, OffsetDateTime::now_utc()).await?;
        Ok(displaced)
    }

    #[must_use]
    pub fn lookup(&self, username: &str) -> Option<ConnId> {
        self.by_user.get(username).map(|entry| *entry.value())
    }

    /// Tears down the mapping owned by `conn_id` and marks the user offline
    /// with a last-seen timestamp. A stale connection that lost a takeover
    /// no longer owns a mapping, so its disconnect is inert and never
    /// clobbers the newer session.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the offline write fails.
    #[tracing::instrument(skip(self), fields(conn_id = %conn_id))]
    pub async fn disconnect(&self, conn_id: ConnId) -> Result<Option<(String, OffsetDateTime)>> {
        let Some((_, username)) = self.by_conn.remove(&conn_id) else {
            return Ok(None);
        };

        // Guard: only the current owner of the username mapping removes it.
        let owned = self.by_user.get(&username).is_some_and(|entry| *entry.value() == conn_id);
        if !owned {
            tracing::debug!(%username, "Stale disconnect, username already re-registered");
            return Ok(None);
        }
        self.by_user.remove(&username);

        let last_seen = OffsetDateTime::now_utc();
        self.store.mark_user_offline(&username, last_seen).await?;
        tracing::info!(%username, "User went offline");
        Ok(Some((username, last_seen)))
    }

    /// The username a connection joined as, if it joined at all.
    #[must_use]
    pub fn username_of(&self, conn_id: ConnId) -> Option<String> {
        self.by_conn.get(&conn_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn online_users(&self) -> Vec<String> {
        self.by_user.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn registry() -> (PresenceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (PresenceRegistry::new(Arc::<MemoryStore>::clone(&store)), store)
    }

    #[tokio::test]
    async fn join_marks_online_and_disconnect_marks_offline() {
        let (registry, store) = registry();
        let conn = Uuid::new_v4();

        registry.join("alice", conn).await.expect("join");
        assert_eq!(registry.lookup("alice"), Some(conn));
        assert_eq!(registry.online_users(), vec!["alice"]);
        assert!(store.user("alice").expect("user row").is_online);

        let (username, _) = registry.disconnect(conn).await.expect("disconnect").expect("owned");
        assert_eq!(username, "alice");
        assert_eq!(registry.lookup("alice"), None);
        assert!(!store.user("alice").expect("user row").is_online);
    }

    #[tokio::test]
    async fn rejoin_overwrites_and_stale_disconnect_is_inert() {
        let (registry, store) = registry();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        registry.join("alice", first).await.expect("join");
        let displaced = registry.join("alice", second).await.expect("rejoin");
        assert_eq!(displaced, Some(first));
        assert_eq!(registry.lookup("alice"), Some(second));

        // The displaced connection's teardown must not touch the new mapping.
        let result = registry.disconnect(first).await.expect("disconnect");
        assert!(result.is_none());
        assert_eq!(registry.lookup("alice"), Some(second));
        assert!(store.user("alice").expect("user row").is_online);
    }

    #[tokio::test]
    async fn disconnect_of_unknown_connection_is_a_no_op() {
        let (registry, _) = registry();
        assert!(registry.disconnect(Uuid::new_v4()).await.expect("disconnect").is_none());
    }
}
