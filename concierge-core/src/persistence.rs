//! On-disk session files.
//!
//! Each session lives at `<dir>/sessions/<id>.json`. Writes go to a `.tmp`
//! sibling first and are renamed into place, so a crash never leaves a
//! half-written snapshot behind.

use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::memory::SessionSnapshot;

fn persistence_error(action: &str, path: &Path, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::Persistence {
        message: format!("Failed to {} {}: {}", action, path.display(), e),
    }
}

/// Atomically write bytes: `.tmp` sibling, then rename.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Directory of persisted session snapshots.
#[derive(Debug, Clone)]
pub struct SessionFiles {
    sessions_dir: PathBuf,
}

impl SessionFiles {
    /// Sessions are stored under `<root>/sessions`.
    pub fn new(root: &Path) -> Self {
        Self {
            sessions_dir: root.join("sessions"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", id))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<PathBuf, MemoryError> {
        let path = self.path_for(snapshot.session.id);
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| persistence_error("serialize", &path, e))?;
        atomic_write(&path, &json).map_err(|e| persistence_error("write", &path, e))?;
        Ok(path)
    }

    /// Returns `Ok(None)` when no file exists for `id`.
    pub fn load(&self, id: Uuid) -> Result<Option<SessionSnapshot>, MemoryError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path).map_err(|e| persistence_error("read", &path, e))?;
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| persistence_error("parse", &path, e))
    }

    pub fn remove(&self, id: Uuid) -> Result<bool, MemoryError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(persistence_error("remove", &path, e)),
        }
    }

    /// Ids of every persisted session, sorted.
    pub fn list_ids(&self) -> Result<Vec<Uuid>, MemoryError> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.sessions_dir)
            .map_err(|e| persistence_error("list", &self.sessions_dir, e))?;
        let mut ids: Vec<Uuid> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Session;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = TempDir::new().unwrap();
        let files = SessionFiles::new(dir.path());
        let snapshot = Session::new().snapshot();

        let path = files.save(&snapshot).unwrap();
        assert!(path.starts_with(dir.path().join("sessions")));
        assert_eq!(files.load(snapshot.session.id).unwrap(), Some(snapshot));
    }

    #[test]
    fn test_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let files = SessionFiles::new(dir.path());
        let snapshot = Session::new().snapshot();
        let path = files.save(&snapshot).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let files = SessionFiles::new(dir.path());
        assert!(files.load(Uuid::new_v4()).unwrap().is_none());
        assert!(!files.remove(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let files = SessionFiles::new(dir.path());
        let id = Uuid::new_v4();
        std::fs::create_dir_all(files.dir()).unwrap();
        std::fs::write(files.path_for(id), b"{not json").unwrap();
        assert!(matches!(files.load(id), Err(MemoryError::Persistence { .. })));
    }

    #[test]
    fn test_list_ids_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let files = SessionFiles::new(dir.path());
        let a = Session::new().snapshot();
        let b = Session::new().snapshot();
        files.save(&a).unwrap();
        files.save(&b).unwrap();
        std::fs::write(files.dir().join("notes.txt"), b"x").unwrap();

        let mut expected = vec![a.session.id, b.session.id];
        expected.sort();
        assert_eq!(files.list_ids().unwrap(), expected);
    }
}
