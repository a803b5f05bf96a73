use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::types::PersistedState;

/// Durable storage for the configuration that is still owed a restoration
///
/// `save` must not return before the record is on stable storage, so a
/// crash right after it still leaves a recoverable record behind.
pub trait PersistenceStore: Send {
    fn save(&mut self, state: &PersistedState) -> Result<(), PersistenceError>;
    fn load(&self) -> Result<Option<PersistedState>, PersistenceError>;
    /// Removing a record that does not exist succeeds
    fn clear(&mut self) -> Result<(), PersistenceError>;

    /// Get an undecodable record out of the way so startup can go on
    fn set_aside_corrupt(&mut self) -> Result<(), PersistenceError> {
        self.clear()
    }
}

/// JSON file store
/// Writes go to a temporary sibling which is fsynced and renamed over the
/// target, so readers see either the old or the new record, never a torn one
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_local_dir>/display-session/persisted_state.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::persistence::STATE_FILENAME);
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path
            .with_extension(crate::constants::persistence::TEMP_SUFFIX)
    }

    /// Where an undecodable record is moved, next to the state file
    pub fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(crate::constants::persistence::CORRUPT_SUFFIX);
        PathBuf::from(name)
    }

    fn sync_parent(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Directory fsync makes the rename itself durable
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(|e| PersistenceError::io(parent, e))?;
        }
        Ok(())
    }
}

impl PersistenceStore for FileStore {
    fn save(&mut self, state: &PersistedState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|e| PersistenceError::io(&temp, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| PersistenceError::io(&temp, e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        self.sync_parent()?;

        info!(path = %self.path.display(), client = ?state.client, "Persisted prior display state");
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted display state");
                return Ok(None);
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                self.sync_parent()?;
                info!(path = %self.path.display(), "Cleared persisted display state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }

    fn set_aside_corrupt(&mut self) -> Result<(), PersistenceError> {
        let aside = self.corrupt_path();
        match fs::rename(&self.path, &aside) {
            Ok(()) => {
                self.sync_parent()?;
                warn!(path = %self.path.display(), moved_to = %aside.display(), "Moved unreadable display state aside");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }
}

/// In-process store
///
/// Clones share the same slot, which lets a test keep a handle to the
/// record after handing the store to a session manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<PersistedState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record without going through the trait
    pub fn snapshot(&self) -> Option<PersistedState> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistenceStore for MemoryStore {
    fn save(&mut self, state: &PersistedState) -> Result<(), PersistenceError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        Ok(self.snapshot())
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
