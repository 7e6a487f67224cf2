use dashmap::DashMap;
use std::collections::HashSet;

/// Per-room set of currently-typing usernames. Purely a liveness signal:
/// never persisted, gone on restart.
#[derive(Debug, Default)]
pub struct TypingTracker {
    rooms: DashMap<String, HashSet<String>>,
}

impl TypingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the user to the room's typing set. Returns false when they were
    /// already typing there.
    pub fn start(&self, room_id: &str, username: &str) -> bool {
        self.rooms.entry(room_id.to_owned()).or_default().insert(username.to_owned())
    }

    /// Removes the user from the room's typing set, pruning the room entry
    /// when it empties. Returns false when they were not typing there.
    pub fn stop(&self, room_id: &str, username: &str) -> bool {
        let Some(mut entry) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = entry.remove(username);
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.rooms.remove_if(room_id, |_, typists| typists.is_empty());
        }
        removed
    }

    /// Removes the user from every room's typing set and returns the rooms
    /// they were typing in. Runs on disconnect so a user who drops
    /// mid-typing does not leave a stale indicator behind.
    pub fn clear_user(&self, username: &str) -> Vec<String> {
        let mut affected = Vec::new();
        self.rooms.retain(|room_id, typists| {
            if typists.remove(username) {
                affected.push(room_id.clone());
            }
            !typists.is_empty()
        });
        affected
    }

    #[must_use]
    pub fn is_typing(&self, room_id: &str, username: &str) -> bool {
        self.rooms.get(room_id).is_some_and(|typists| typists.contains(username))
    }
}
