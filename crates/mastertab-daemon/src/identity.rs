//! Identity store kept in a JSON file owned by one peer.
//!
//! Lets a restarted daemon come back with the same peer id, which is what a
//! reloaded peer looks like to the rest of the election.

use mastertab_core::identity::{IdentityError, IdentityStore, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct FileIdentityStore {
    path: PathBuf,
    /// Serializes read-modify-write of the file.
    lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            // An unreadable file is treated as empty and rewritten on the next set.
            Ok(contents) => Ok(serde_json::from_str(&contents).unwrap_or_default()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(IdentityError::Io(e.to_string())),
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn probe(&self) -> Result<()> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        fs::create_dir_all(parent).map_err(|e| IdentityError::Unavailable(e.to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IdentityError::Io(e.to_string()))?;
        }
        let contents =
            serde_json::to_string_pretty(&values).map_err(|e| IdentityError::Io(e.to_string()))?;
        fs::write(&self.path, contents).map_err(|e| IdentityError::Io(e.to_string()))
    }
}
