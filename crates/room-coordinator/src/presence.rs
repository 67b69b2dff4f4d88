//! Presence table for a single room.
//!
//! Owned exclusively by that room's `RoomActor`, so every read-modify-write
//! on it is serialized by the actor mailbox. Entries are keyed by user id: a
//! user has at most one entry per room no matter how many connections they
//! join from, and a repeated join overwrites the previous entry.

use crate::store::Role;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Live state of one user in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub name: String,
    #[serde(rename = "isMuted")]
    pub muted: bool,
    #[serde(rename = "isVideoOff")]
    pub video_off: bool,
    pub role: Role,
}

impl PresenceEntry {
    /// Fresh entry with the room defaults: unmuted, video off only when the
    /// room has video disabled.
    #[must_use]
    pub fn joined(user_id: &str, name: &str, role: Role, video_enabled: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            muted: false,
            video_off: !video_enabled,
            role,
        }
    }
}

/// Registry view: room id to the entries currently present in it.
///
/// Only rooms with at least one entry appear.
pub type RegistrySnapshot = BTreeMap<String, Vec<PresenceEntry>>;

#[derive(Debug, Clone)]
struct Slot {
    entry: PresenceEntry,
    // Join order, for stable snapshots
    seq: u64,
}

/// Per-room presence table.
#[derive(Debug, Default)]
pub struct RoomPresence {
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

impl RoomPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `entry.user_id`.
    ///
    /// Returns true if an entry for that user already existed.
    pub fn upsert(&mut self, entry: PresenceEntry) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(entry.user_id.clone(), Slot { entry, seq })
            .is_some()
    }

    /// Remove a user's entry.
    pub fn remove(&mut self, user_id: &str) -> Option<PresenceEntry> {
        self.entries.remove(user_id).map(|slot| slot.entry)
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id).map(|slot| &slot.entry)
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Set the muted flag. Returns false if the user has no entry.
    pub fn set_muted(&mut self, user_id: &str, muted: bool) -> bool {
        match self.entries.get_mut(user_id) {
            Some(slot) => {
                slot.entry.muted = muted;
                true
            }
            None => false,
        }
    }

    /// Set the video-off flag. Returns false if the user has no entry.
    pub fn set_video_off(&mut self, user_id: &str, video_off: bool) -> bool {
        match self.entries.get_mut(user_id) {
            Some(slot) => {
                slot.entry.video_off = video_off;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in join order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut slots: Vec<&Slot> = self.entries.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.entry.clone()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_defaults_follow_room_video_setting() {
        let with_video = PresenceEntry::joined("u1", "Ana", Role::Guest, true);
        assert!(!with_video.muted);
        assert!(!with_video.video_off);

        let without_video = PresenceEntry::joined("u1", "Ana", Role::Guest, false);
        assert!(without_video.video_off);
    }

    #[test]
    fn test_upsert_overwrites_and_resets_flags() {
        let mut presence = RoomPresence::new();
        assert!(!presence.upsert(PresenceEntry::joined("u1", "Ana", Role::Guest, true)));
        presence.set_muted("u1", true);
        presence.set_video_off("u1", true);

        assert!(presence.upsert(PresenceEntry::joined("u1", "Ana", Role::Guest, true)));

        assert_eq!(presence.len(), 1);
        let entry = presence.get("u1").unwrap();
        assert!(!entry.muted);
        assert!(!entry.video_off);
    }

    #[test]
    fn test_flag_updates_on_missing_user_are_noops() {
        let mut presence = RoomPresence::new();
        assert!(!presence.set_muted("ghost", true));
        assert!(!presence.set_video_off("ghost", true));
        assert!(presence.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut presence = RoomPresence::new();
        presence.upsert(PresenceEntry::joined("u1", "Ana", Role::Host, true));

        let removed = presence.remove("u1").unwrap();
        assert_eq!(removed.role, Role::Host);
        assert!(presence.is_empty());
        assert!(presence.remove("u1").is_none());
    }

    #[test]
    fn test_snapshot_in_join_order() {
        let mut presence = RoomPresence::new();
        presence.upsert(PresenceEntry::joined("zed", "Zed", Role::Host, true));
        presence.upsert(PresenceEntry::joined("amy", "Amy", Role::Guest, true));
        presence.upsert(PresenceEntry::joined("bob", "Bob", Role::Guest, true));

        let ids: Vec<String> = presence.snapshot().into_iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec!["zed", "amy", "bob"]);
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = PresenceEntry::joined("u1", "Ana", Role::Host, true);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["userId"], "u1");
        assert_eq!(json["name"], "Ana");
        assert_eq!(json["isMuted"], false);
        assert_eq!(json["isVideoOff"], false);
        assert_eq!(json["role"], "HOST");
    }
}
