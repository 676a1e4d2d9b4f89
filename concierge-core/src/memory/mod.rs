//! Session memory store.
//!
//! Holds every live [`Session`] behind its own lock so stages of one run
//! serialize their updates without blocking other sessions. When a
//! persistence directory is configured, sessions are written on pause and
//! close and transparently reloaded after eviction. Eviction marks a slot
//! under its session lock; every later access through that slot sees the
//! mark and goes back to the store for a fresh copy.

pub mod session;

pub use session::{
    SNAPSHOT_FORMAT_VERSION, Session, SessionDelta, SessionInfo, SessionSnapshot, SessionStatus,
};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::{FatalError, MemoryError};
use crate::persistence::SessionFiles;

/// Upper bound for the configured session age, in seconds.
const MAX_AGE_CAP_SECS: u64 = 1 << 40;

struct SessionSlot {
    session: Mutex<Session>,
    running: AtomicBool,
    /// Set once the slot has left the map. Only written under `session`.
    evicted: AtomicBool,
}

impl SessionSlot {
    fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            running: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }
}

pub struct MemoryStore {
    slots: RwLock<HashMap<Uuid, Arc<SessionSlot>>>,
    files: Option<SessionFiles>,
    max_age: chrono::Duration,
    persist_on_close: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            files: config.persist_dir.as_deref().map(SessionFiles::new),
            max_age: chrono::Duration::seconds(config.max_session_age_secs.min(MAX_AGE_CAP_SECS) as i64),
            persist_on_close: config.persist_on_close,
        }
    }

    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn is_persistent(&self) -> bool {
        self.files.is_some()
    }

    /// Create an active session and return its id.
    pub fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        self.write_slots().insert(id, SessionSlot::new(session));
        debug!(session_id = %id, "Session created");
        id
    }

    pub fn get(&self, id: Uuid) -> Result<Session, MemoryError> {
        self.with_session(id, |_, session| session.clone())
            .map(|(session, _)| session)
    }

    /// Apply `delta` to the session. Collections append; scalars replace.
    pub fn update(&self, id: Uuid, delta: SessionDelta) -> Result<(), MemoryError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.with_session(id, |_, session| session.apply(delta))?.0
    }

    pub fn snapshot(&self, id: Uuid) -> Result<SessionSnapshot, MemoryError> {
        self.with_session(id, |_, session| session.snapshot())
            .map(|(snapshot, _)| snapshot)
    }

    /// Load a snapshot as a live session, replacing any in-memory copy.
    pub fn restore(&self, snapshot: SessionSnapshot) -> Result<Uuid, MemoryError> {
        let session = Session::from_snapshot(snapshot)?;
        let id = session.id;
        self.write_slots().insert(id, SessionSlot::new(session));
        info!(session_id = %id, "Session restored from snapshot");
        Ok(id)
    }

    /// Mark the session closed. Closing twice is a no-op.
    pub fn close(&self, id: Uuid) -> Result<(), MemoryError> {
        let (snapshot, _) = self.with_session(id, |_, session| {
            if session.is_closed() {
                return None;
            }
            session.status = SessionStatus::Closed;
            session.updated_at = Utc::now();
            Some(session.snapshot())
        })?;
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        info!(session_id = %id, "Session closed");
        if self.persist_on_close {
            self.save(&snapshot)?;
        }
        Ok(())
    }

    pub fn pause(&self, id: Uuid) -> Result<(), MemoryError> {
        let snapshot = self.transition(id, SessionStatus::Active, SessionStatus::Paused)?;
        if let Some(snapshot) = snapshot {
            self.save(&snapshot)?;
        }
        Ok(())
    }

    pub fn resume(&self, id: Uuid) -> Result<(), MemoryError> {
        self.transition(id, SessionStatus::Paused, SessionStatus::Active)
            .map(|_| ())
    }

    fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<Option<SessionSnapshot>, MemoryError> {
        self.with_session(id, |_, session| {
            if session.is_closed() {
                return Err(MemoryError::SessionClosed { id });
            }
            if session.status != from {
                return Ok(None);
            }
            session.status = to;
            session.updated_at = Utc::now();
            debug!(session_id = %id, status = ?to, "Session status changed");
            Ok(Some(session.snapshot()))
        })?
        .0
    }

    /// Write the session to disk. Returns `None` for an in-memory store.
    pub fn persist(&self, id: Uuid) -> Result<Option<PathBuf>, MemoryError> {
        let snapshot = self.snapshot(id)?;
        match &self.files {
            Some(files) => files.save(&snapshot).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), MemoryError> {
        if let Some(files) = &self.files {
            let path = files.save(snapshot)?;
            debug!(session_id = %snapshot.session.id, path = %path.display(), "Session persisted");
        }
        Ok(())
    }

    /// Drop active sessions older than the configured age. Persisted stores
    /// write each session first so it can be reloaded later.
    pub fn evict_stale(&self) -> Vec<Uuid> {
        self.evict_stale_at(Utc::now())
    }

    pub fn evict_stale_at(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let candidates: Vec<(Uuid, Arc<SessionSlot>)> = self
            .read_slots()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut evicted = Vec::new();
        for (id, slot) in candidates {
            {
                let session = slot.lock();
                if slot.is_evicted() || slot.running.load(Ordering::Acquire) {
                    continue;
                }
                let stale = session.status == SessionStatus::Active
                    && now.signed_duration_since(session.created_at) > self.max_age;
                if !stale {
                    continue;
                }
                // Saved under the lock so no update can slip in between.
                if let Err(e) = self.save(&session.snapshot()) {
                    warn!(session_id = %id, error = %e, "Keeping stale session, persistence failed");
                    continue;
                }
                slot.evicted.store(true, Ordering::Release);
            }
            let mut slots = self.write_slots();
            if slots.get(&id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(&id);
            }
            drop(slots);
            evicted.push(id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted stale sessions");
        }
        evicted
    }

    /// Every known session, live ones first, then persisted-only ones.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .read_slots()
            .values()
            .map(|slot| slot.lock().info())
            .collect();
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        if let Some(files) = &self.files {
            let ids = files.list_ids().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to list persisted sessions");
                Vec::new()
            });
            for id in ids {
                if infos.iter().any(|i| i.id == id) {
                    continue;
                }
                match files.load(id) {
                    Ok(Some(snapshot)) => infos.push(snapshot.session.info()),
                    Ok(None) => {}
                    Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable session"),
                }
            }
        }
        infos
    }

    /// Forget a session, including its file.
    pub fn remove(&self, id: Uuid) -> Result<bool, MemoryError> {
        let in_memory = self.write_slots().remove(&id).is_some();
        let on_disk = match &self.files {
            Some(files) => files.remove(id)?,
            None => false,
        };
        Ok(in_memory || on_disk)
    }

    /// Number of sessions held in memory.
    pub fn live_count(&self) -> usize {
        self.read_slots().len()
    }

    /// Claim the session for one pipeline run. A second claim while the
    /// first guard is alive fails with [`FatalError::SessionBusy`].
    pub fn begin_run(&self, id: Uuid) -> Result<RunGuard, FatalError> {
        let (claimed, slot) = self.with_session(id, |slot, session| {
            if session.is_closed() {
                return Err(FatalError::from(MemoryError::SessionClosed { id }));
            }
            if !claim(slot) {
                return Err(FatalError::SessionBusy { session_id: id });
            }
            Ok(())
        })?;
        claimed?;
        Ok(RunGuard { id, slot })
    }

    /// Run `f` with the session locked, on a slot that is still live.
    fn with_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&SessionSlot, &mut Session) -> R,
    ) -> Result<(R, Arc<SessionSlot>), MemoryError> {
        loop {
            let slot = self.slot(id)?;
            let mut session = slot.lock();
            if slot.is_evicted() {
                continue;
            }
            let out = f(slot.as_ref(), &mut session);
            drop(session);
            return Ok((out, slot));
        }
    }

    fn slot(&self, id: Uuid) -> Result<Arc<SessionSlot>, MemoryError> {
        if let Some(slot) = self.read_slots().get(&id) {
            if !slot.is_evicted() {
                return Ok(Arc::clone(slot));
            }
        }
        let files = self.files.as_ref().ok_or(MemoryError::SessionNotFound { id })?;
        let snapshot = files.load(id)?.ok_or(MemoryError::SessionNotFound { id })?;
        let session = Session::from_snapshot(snapshot)?;
        let mut slots = self.write_slots();
        if let Some(current) = slots.get(&id) {
            if !current.is_evicted() {
                return Ok(Arc::clone(current));
            }
        }
        info!(session_id = %id, "Session reloaded from disk");
        let slot = SessionSlot::new(session);
        slots.insert(id, Arc::clone(&slot));
        Ok(slot)
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<SessionSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<SessionSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mark the slot as running. Callers hold the session lock.
fn claim(slot: &SessionSlot) -> bool {
    slot.running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Exclusive claim on a session for the duration of one run.
pub struct RunGuard {
    id: Uuid,
    slot: Arc<SessionSlot>,
}

impl RunGuard {
    pub fn session_id(&self) -> Uuid {
        self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.slot.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceOrigin, SourceRecord, Stage};
    use tempfile::TempDir;

    fn persistent(dir: &TempDir, max_age_secs: u64) -> MemoryStore {
        MemoryStore::new(&MemoryConfig {
            persist_dir: Some(dir.path().to_path_buf()),
            max_session_age_secs: max_age_secs,
            persist_on_close: true,
        })
    }

    fn source_delta() -> SessionDelta {
        SessionDelta {
            sources: vec![SourceRecord::new(SourceOrigin::Web, "https://a.example", "text")],
            ..SessionDelta::default()
        }
    }

    #[test]
    fn test_get_unknown_session() {
        let store = MemoryStore::in_memory();
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, MemoryError::SessionNotFound { .. }));
    }

    #[test]
    fn test_update_and_get() {
        let store = MemoryStore::in_memory();
        let id = store.create();
        store.update(id, source_delta()).unwrap();
        let mut delta = SessionDelta::default();
        delta.warn(Stage::Gathering, "document branch timed out");
        store.update(id, delta).unwrap();

        let session = store.get(id).unwrap();
        assert_eq!(session.sources.len(), 1);
        assert_eq!(session.warnings.len(), 1);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn test_close_blocks_updates_and_is_idempotent() {
        let store = MemoryStore::in_memory();
        let id = store.create();
        store.close(id).unwrap();
        store.close(id).unwrap();
        assert!(matches!(
            store.update(id, source_delta()),
            Err(MemoryError::SessionClosed { .. })
        ));
    }

    #[test]
    fn test_pause_and_resume() {
        let store = MemoryStore::in_memory();
        let id = store.create();
        store.pause(id).unwrap();
        assert_eq!(store.get(id).unwrap().status, SessionStatus::Paused);
        store.resume(id).unwrap();
        assert_eq!(store.get(id).unwrap().status, SessionStatus::Active);
        store.close(id).unwrap();
        assert!(store.resume(id).is_err());
    }

    #[test]
    fn test_run_guard_is_exclusive() {
        let store = MemoryStore::in_memory();
        let id = store.create();
        let guard = store.begin_run(id).unwrap();
        let err = store.begin_run(id).err().unwrap();
        assert_eq!(err.code(), "SESSION_BUSY");
        drop(guard);
        assert!(store.begin_run(id).is_ok());
    }

    #[test]
    fn test_eviction_without_persistence_drops_session() {
        let store = MemoryStore::new(&MemoryConfig {
            max_session_age_secs: 10,
            ..MemoryConfig::default()
        });
        let id = store.create();
        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(store.evict_stale_at(later), vec![id]);
        assert!(store.get(id).is_err());
    }

    #[test]
    fn test_eviction_skips_running_and_closed_sessions() {
        let store = MemoryStore::new(&MemoryConfig {
            max_session_age_secs: 10,
            ..MemoryConfig::default()
        });
        let running = store.create();
        let closed = store.create();
        let _guard = store.begin_run(running).unwrap();
        store.close(closed).unwrap();
        let later = Utc::now() + chrono::Duration::seconds(60);
        assert!(store.evict_stale_at(later).is_empty());
        assert_eq!(store.live_count(), 2);
    }

    #[test]
    fn test_evicted_session_reloads_from_disk() {
        let dir = TempDir::new().unwrap();
        let store = persistent(&dir, 10);
        let id = store.create();
        store.update(id, source_delta()).unwrap();
        let before = store.get(id).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(store.evict_stale_at(later), vec![id]);
        assert_eq!(store.live_count(), 0);

        let reloaded = store.get(id).unwrap();
        assert_eq!(reloaded, before);
    }

    #[test]
    fn test_run_claimed_after_eviction_lands_in_live_slot() {
        let dir = TempDir::new().unwrap();
        let store = persistent(&dir, 10);
        let id = store.create();
        // A caller that resolved the slot just before eviction.
        let stale_slot = store.slot(id).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(store.evict_stale_at(later), vec![id]);
        assert!(stale_slot.is_evicted());

        let guard = store.begin_run(id).unwrap();
        assert!(!stale_slot.running.load(Ordering::Acquire));
        store.update(id, source_delta()).unwrap();
        store.close(id).unwrap();
        drop(guard);

        assert_eq!(store.get(id).unwrap().sources.len(), 1);
        let other = persistent(&dir, 10);
        let reloaded = other.get(id).unwrap();
        assert_eq!(reloaded.sources.len(), 1);
        assert!(reloaded.is_closed());
    }

    #[test]
    fn test_eviction_and_claims_race_without_losing_runs() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(persistent(&dir, 0));
        let later = Utc::now() + chrono::Duration::seconds(60);
        for _ in 0..50 {
            let id = store.create();
            let evictor = {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.evict_stale_at(later))
            };
            let guard = store.begin_run(id).unwrap();
            store.update(id, source_delta()).unwrap();
            drop(guard);
            assert_eq!(store.get(id).unwrap().sources.len(), 1);
            evictor.join().unwrap();
        }
    }

    #[test]
    fn test_close_persists_and_lists() {
        let dir = TempDir::new().unwrap();
        let store = persistent(&dir, 3600);
        let id = store.create();
        store.update(id, source_delta()).unwrap();
        store.close(id).unwrap();

        let other = persistent(&dir, 3600);
        let infos = other.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, id);
        assert_eq!(infos[0].status, SessionStatus::Closed);
        assert_eq!(infos[0].sources, 1);
        assert!(other.remove(id).unwrap());
        assert!(other.list().is_empty());
    }

    #[test]
    fn test_restore_from_snapshot() {
        let store = MemoryStore::in_memory();
        let id = store.create();
        store.update(id, source_delta()).unwrap();
        let snapshot = store.snapshot(id).unwrap();

        let fresh = MemoryStore::in_memory();
        assert_eq!(fresh.restore(snapshot).unwrap(), id);
        assert_eq!(fresh.get(id).unwrap(), store.get(id).unwrap());
    }
}
