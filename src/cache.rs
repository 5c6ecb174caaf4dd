//! Corpus cache: articles keyed by identity with absolute (non-sliding) TTL.
//!
//! - Lazy expiry: a read past `expires_at` behaves as a miss and drops the entry.
//! - `sweep` removes every expired entry proactively.
//! - Each identity has its own slot lock, so writers on different identities
//!   never wait on each other; writers on the same identity are serialized.
//! - File IO runs under the slot lock only, never under the map lock.
//! - Optional write-through to one JSON file per identity (temp file + rename).

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::model::{Article, ArticleId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub article: Article,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(article: Article, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            article,
            inserted_at: now,
            expires_at,
        }
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    // Set once the slot has left the map; a writer holding a stale handle retries.
    retired: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

pub struct CorpusCache {
    slots: RwLock<HashMap<ArticleId, SlotRef>>,
    store: Option<FileStore>,
}

impl Default for CorpusCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CorpusCache {
    pub fn in_memory() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Open a write-through cache under `dir`, loading entries still live at `now`.
    pub fn open(dir: impl Into<PathBuf>, now: DateTime<Utc>) -> io::Result<Self> {
        let store = FileStore::new(dir.into())?;
        let mut map = HashMap::new();
        let mut expired = 0usize;
        for entry in store.load_all() {
            if entry.is_live_at(now) {
                let id = entry.article.identity.clone();
                let slot = Slot {
                    entry: Some(entry),
                    retired: false,
                };
                map.insert(id, Arc::new(Mutex::new(slot)));
            } else {
                store.remove(&entry.article.identity);
                expired += 1;
            }
        }
        debug!(dir = %store.dir.display(), loaded = map.len(), expired, "cache opened");
        Ok(Self {
            slots: RwLock::new(map),
            store: Some(store),
        })
    }

    pub fn get(&self, id: &ArticleId) -> Option<Article> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: &ArticleId, now: DateTime<Utc>) -> Option<Article> {
        let Some(slot) = self.slot(id) else {
            counter!("cache_misses_total").increment(1);
            return None;
        };

        let expired = {
            let mut guard = slot.lock();
            match guard.entry.as_ref().map(|e| e.is_live_at(now)) {
                Some(true) => {
                    counter!("cache_hits_total").increment(1);
                    return guard.entry.as_ref().map(|e| e.article.clone());
                }
                Some(false) => {
                    guard.entry = None;
                    self.remove_file(id);
                    true
                }
                None => false,
            }
        };

        counter!("cache_misses_total").increment(1);
        if expired {
            counter!("cache_expired_total").increment(1);
            self.retire_empty(std::slice::from_ref(id));
        }
        None
    }

    pub fn put(&self, article: Article, ttl: Duration) -> Result<(), CacheError> {
        self.put_at(article, ttl, Utc::now())
    }

    /// Insert or overwrite. The in-memory entry is always stored; an error
    /// means only the write-through failed.
    pub fn put_at(&self, article: Article, ttl: Duration, now: DateTime<Utc>) -> Result<(), CacheError> {
        let entry = CacheEntry::new(article, ttl, now);
        loop {
            let slot = self.slot_or_insert(&entry.article.identity);
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            // File and memory change together under the slot lock only.
            let persisted = match &self.store {
                Some(store) => store.write(&entry),
                None => Ok(()),
            };
            guard.entry = Some(entry);
            if persisted.is_err() {
                counter!("cache_write_failures_total").increment(1);
            }
            return persisted;
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Slots busy with a reader or writer are left for the next sweep.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0usize;
        let mut emptied = Vec::new();
        for (id, slot) in self.snapshot() {
            let Some(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.entry.as_ref().is_some_and(|e| !e.is_live_at(now)) {
                guard.entry = None;
                self.remove_file(&id);
                removed += 1;
            }
            if guard.entry.is_none() {
                emptied.push(id);
            }
        }
        self.retire_empty(&emptied);

        if removed > 0 {
            counter!("cache_expired_total").increment(removed as u64);
            debug!(removed, "cache sweep");
        }
        removed
    }

    /// Explicit eviction. Returns whether a live or expired entry was present.
    pub fn evict(&self, id: &ArticleId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let present = {
            let mut guard = slot.lock();
            let present = guard.entry.take().is_some();
            self.remove_file(id);
            present
        };
        self.retire_empty(std::slice::from_ref(id));
        present
    }

    /// Entries physically held, expired or not.
    pub fn len(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|(_, slot)| slot.lock().entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &ArticleId) -> Option<SlotRef> {
        self.slots.read().get(id).cloned()
    }

    fn slot_or_insert(&self, id: &ArticleId) -> SlotRef {
        if let Some(slot) = self.slot(id) {
            return slot;
        }
        self.slots.write().entry(id.clone()).or_default().clone()
    }

    fn snapshot(&self) -> Vec<(ArticleId, SlotRef)> {
        self.slots
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect()
    }

    /// Drop idle, empty slots from the map. Never blocks on a slot and does no IO.
    fn retire_empty(&self, ids: &[ArticleId]) {
        if ids.is_empty() {
            return;
        }
        let mut map = self.slots.write();
        for id in ids {
            let idle_and_empty = map
                .get(id)
                .and_then(|slot| slot.try_lock())
                .is_some_and(|mut guard| {
                    let empty = guard.entry.is_none();
                    if empty {
                        guard.retired = true;
                    }
                    empty
                });
            if idle_and_empty {
                map.remove(id);
            }
        }
    }

    fn remove_file(&self, id: &ArticleId) {
        if let Some(store) = &self.store {
            store.remove(id);
        }
    }
}

// ------------------------------------------------------------
// File persistence helpers
// ------------------------------------------------------------

struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: &ArticleId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let id = &entry.article.identity;
        let json = serde_json::to_vec(entry).map_err(|source| CacheError::Encode {
            identity: id.clone(),
            source,
        })?;
        write_atomic(&self.path(id), &json).map_err(|source| CacheError::Write {
            identity: id.clone(),
            source,
        })
    }

    fn remove(&self, id: &ArticleId) {
        let p = self.path(id);
        if let Err(e) = fs::remove_file(&p) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %p.display(), error = %e, "cache file removal failed");
            }
        }
    }

    fn load_all(&self) -> Vec<CacheEntry> {
        let Ok(rd) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for e in rd.flatten() {
            let path = e.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map(|b| serde_json::from_slice::<CacheEntry>(&b)) {
                Ok(Ok(entry)) => out.push(entry),
                Ok(Err(err)) => warn!(path = %path.display(), error = %err, "unreadable cache file skipped"),
                Err(err) => warn!(path = %path.display(), error = %err, "cache file read failed"),
            }
        }
        out
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}
