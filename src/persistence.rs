//! Desk state on disk: users plus open bids in one JSON document.
//!
//! Writes go to a sibling `.tmp` file that is then renamed over the target, so
//! a reader sees either the old document or the new one. All writers sharing a
//! [`FilePersistence`] (and its clones) are serialized by one lock, and
//! [`FilePersistence::sync`] takes its snapshot while holding it, so an older
//! snapshot can never land after a newer one.

use crate::types::{Bid, User};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistedState {
    pub users: Vec<User>,
    pub bids: Vec<Bid>,
}

#[derive(Clone, Debug)]
pub struct FilePersistence {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FilePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes a snapshot under the write lock and stores it; `None` removes the file.
    pub fn sync(&self, snapshot: impl FnOnce() -> Option<PersistedState>) -> Result<(), String> {
        let _guard = self.write_lock.lock();
        match snapshot() {
            Some(state) => self.replace(&state),
            None => self.remove(),
        }
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), String> {
        let _guard = self.write_lock.lock();
        self.replace(state)
    }

    /// `Ok(None)` when no state has been written yet.
    pub fn load(&self) -> Result<Option<PersistedState>, String> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("read {}: {}", self.path.display(), e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| format!("parse {}: {}", self.path.display(), e))
    }

    pub fn clear(&self) -> Result<(), String> {
        let _guard = self.write_lock.lock();
        self.remove()
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn replace(&self, state: &PersistedState) -> Result<(), String> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| format!("create {}: {}", dir.display(), e))?;
        }
        let body = serde_json::to_vec_pretty(state).map_err(|e| e.to_string())?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, body).map_err(|e| format!("write {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| format!("rename to {}: {}", self.path.display(), e))
    }

    fn remove(&self) -> Result<(), String> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(format!("remove {}: {}", self.path.display(), e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BidId, BidStatus, Location, Side, UserId};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("otc_desk_{}_{}", std::process::id(), name))
            .join("state.json")
    }

    fn state_with_users(n: i64) -> PersistedState {
        PersistedState {
            users: (1..=n)
                .map(|id| User {
                    user_id: UserId(id),
                    location: Some(Location::new(1.5, 2.5)),
                    pending: None,
                })
                .collect(),
            bids: Vec::new(),
        }
    }

    #[test]
    fn save_then_load_returns_same_state() {
        let store = FilePersistence::new(temp_path("roundtrip"));
        let mut state = state_with_users(1);
        state.bids.push(Bid {
            bid_id: BidId(1),
            owner: UserId(1),
            side: Side::Sell,
            asset: "BTC".into(),
            location: Location::new(1.5, 2.5),
            status: BidStatus::Open,
            created_at: 10,
        });
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!store.tmp_path().exists());
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn load_missing_file_is_none() {
        let store = FilePersistence::new(temp_path("missing"));
        assert_eq!(store.load().unwrap(), None);
        assert!(store.clear().is_ok());
    }

    #[test]
    fn load_corrupt_file_is_err() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(FilePersistence::new(&path).load().is_err());
    }

    #[test]
    fn sync_none_removes_file() {
        let store = FilePersistence::new(temp_path("sync_none"));
        store.sync(|| Some(state_with_users(2))).unwrap();
        assert_eq!(store.load().unwrap().map(|s| s.users.len()), Some(2));
        store.sync(|| None).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn concurrent_syncs_keep_the_newest_snapshot_and_valid_json() {
        let store = FilePersistence::new(temp_path("concurrent"));
        let version = Arc::new(Mutex::new(0i64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let version = Arc::clone(&version);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        // Mutate, then persist whatever is current at write time.
                        *version.lock() += 1;
                        store.sync(|| Some(state_with_users(*version.lock()))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let saved = store.load().unwrap().expect("file present");
        assert_eq!(saved.users.len(), 200);
        store.clear().unwrap();
    }
}
