//! Per-account conversation state, injected into the desk.

use crate::types::{Location, PendingInput, User, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user on first contact. Returns `true` if the user is new.
    pub fn touch(&self, user_id: UserId) -> bool {
        let mut users = self.users.write();
        if users.contains_key(&user_id) {
            return false;
        }
        users.insert(user_id, User::new(user_id));
        true
    }

    pub fn get(&self, user_id: UserId) -> Option<User> {
        self.users.read().get(&user_id).cloned()
    }

    pub fn location(&self, user_id: UserId) -> Option<Location> {
        self.users.read().get(&user_id).and_then(|u| u.location)
    }

    pub fn set_location(&self, user_id: UserId, location: Location) {
        self.users
            .write()
            .entry(user_id)
            .or_insert_with(|| User::new(user_id))
            .location = Some(location);
    }

    pub fn pending(&self, user_id: UserId) -> Option<PendingInput> {
        self.users.read().get(&user_id).and_then(|u| u.pending)
    }

    pub fn set_pending(&self, user_id: UserId, pending: Option<PendingInput>) {
        self.users
            .write()
            .entry(user_id)
            .or_insert_with(|| User::new(user_id))
            .pending = pending;
    }

    /// Drops a user (gateway reported them unreachable).
    pub fn remove(&self, user_id: UserId) -> Option<User> {
        self.users.write().remove(&user_id)
    }

    /// Known user ids, sorted.
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All users ordered by id, for the external store.
    pub fn snapshot(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    /// Replaces the store contents.
    pub fn load(&self, users: impl IntoIterator<Item = User>) {
        let mut map = self.users.write();
        map.clear();
        map.extend(users.into_iter().map(|u| (u.user_id, u)));
    }

    pub fn clear(&self) {
        self.users.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[test]
    fn touch_creates_once() {
        let store = UserStore::new();
        assert!(store.touch(UserId(1)));
        assert!(!store.touch(UserId(1)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(UserId(1)), Some(User::new(UserId(1))));
    }

    #[test]
    fn location_and_pending_round_trip_through_snapshot() {
        let store = UserStore::new();
        store.set_location(UserId(2), Location::new(1.0, 2.0));
        store.set_pending(UserId(1), Some(PendingInput::BidAsset(Side::Sell)));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user_id, UserId(1));

        let restored = UserStore::new();
        restored.load(snapshot);
        assert_eq!(restored.location(UserId(2)), Some(Location::new(1.0, 2.0)));
        assert_eq!(restored.pending(UserId(1)), Some(PendingInput::BidAsset(Side::Sell)));
        restored.clear();
        assert!(restored.is_empty());
    }

    #[test]
    fn remove_forgets_user() {
        let store = UserStore::new();
        store.touch(UserId(5));
        assert!(store.remove(UserId(5)).is_some());
        assert!(store.remove(UserId(5)).is_none());
        assert!(store.user_ids().is_empty());
    }
}
