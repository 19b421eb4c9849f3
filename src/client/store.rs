//! Injectable per-resource cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::domain::Record;

/// Cached list of one resource's records.
///
/// Every change bumps a version counter published through a `watch`
/// channel; consumers re-read `snapshot()` when it moves. At most one fetch
/// per store is in flight at a time (see [`ResourceStore::try_begin_fetch`]).
pub struct ResourceStore<T> {
    records: RwLock<Vec<T>>,
    version: watch::Sender<u64>,
    fetching: AtomicBool,
    loaded: AtomicBool,
}

impl<T: Record> Default for ResourceStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> ResourceStore<T> {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            version,
            fetching: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
        }
    }

    /// Seed the store, e.g. from an earlier session or a test fixture.
    pub fn with_records(records: Vec<T>) -> Self {
        let store = Self::new();
        *store.write() = records;
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.read().iter().find(|r| r.id() == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().iter().any(|r| r.id() == id)
    }

    /// Replace the whole cache with a fresh server listing.
    pub fn replace_all(&self, records: Vec<T>) {
        *self.write() = records;
        self.loaded.store(true, Ordering::SeqCst);
        self.bump();
    }

    /// Whether a listing has been loaded at least once.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Append a record.
    pub fn insert(&self, record: T) {
        self.write().push(record);
        self.bump();
    }

    /// Replace the record with the same id. Returns the previous value, or
    /// `None` (and changes nothing) if no such record is cached.
    pub fn replace(&self, record: T) -> Option<T> {
        let previous = {
            let mut records = self.write();
            let slot = records.iter_mut().find(|r| r.id() == record.id())?;
            std::mem::replace(slot, record)
        };
        self.bump();
        Some(previous)
    }

    /// Remove a record, returning its position and value.
    pub fn remove(&self, id: &str) -> Option<(usize, T)> {
        let removed = {
            let mut records = self.write();
            let index = records.iter().position(|r| r.id() == id)?;
            (index, records.remove(index))
        };
        self.bump();
        Some(removed)
    }

    /// Put a removed record back at (or near) its old position, unless a
    /// refresh already brought it back.
    pub fn reinsert(&self, index: usize, record: T) {
        {
            let mut records = self.write();
            if records.iter().any(|r| r.id() == record.id()) {
                return;
            }
            let index = index.min(records.len());
            records.insert(index, record);
        }
        self.bump();
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Claim the fetch slot. Returns `None` while another fetch holds it.
    pub fn try_begin_fetch(&self) -> Option<FetchGuard<'_>> {
        self.fetching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FetchGuard {
                flag: &self.fetching,
            })
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }
}

/// Releases the fetch slot when dropped.
pub struct FetchGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobWork;

    fn jw(id: &str) -> JobWork {
        JobWork {
            id: id.into(),
            name: format!("Job {}", id),
            vendor: String::new(),
            contact: String::new(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_mutations_bump_version() {
        let store = ResourceStore::new();
        let rx = store.subscribe();
        assert_eq!(store.version(), 0);

        store.insert(jw("a"));
        store.insert(jw("b"));
        assert_eq!(store.version(), 2);
        assert_eq!(*rx.borrow(), 2);

        let mut renamed = jw("a");
        renamed.name = "Dyeing".into();
        let previous = store.replace(renamed).unwrap();
        assert_eq!(previous.name, "Job a");
        assert_eq!(store.get("a").unwrap().name, "Dyeing");
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_replace_missing_is_noop() {
        let store = ResourceStore::with_records(vec![jw("a")]);
        assert!(store.replace(jw("zzz")).is_none());
        assert_eq!(store.version(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_and_reinsert_keeps_position() {
        let store = ResourceStore::with_records(vec![jw("a"), jw("b"), jw("c")]);
        let (index, record) = store.remove("b").unwrap();
        assert_eq!(index, 1);
        assert!(!store.contains("b"));

        store.reinsert(index, record.clone());
        let ids: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        // Already present: no duplicate.
        store.reinsert(0, record);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_fetch_guard_is_exclusive() {
        let store: ResourceStore<JobWork> = ResourceStore::new();
        let guard = store.try_begin_fetch().unwrap();
        assert!(store.is_fetching());
        assert!(store.try_begin_fetch().is_none());
        drop(guard);
        assert!(!store.is_fetching());
        assert!(store.try_begin_fetch().is_some());
    }

    #[test]
    fn test_replace_all_marks_loaded() {
        let store = ResourceStore::new();
        assert!(!store.is_loaded());
        store.replace_all(vec![jw("x")]);
        assert!(store.is_loaded());
        assert_eq!(store.snapshot(), vec![jw("x")]);
        assert!(!store.is_empty());
    }
}
