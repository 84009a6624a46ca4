//! Named-value persistent configuration store.
//!
//! On-disk format is `key = decimal_integer`, one entry per line, matching
//! the schema the control system's persistent-configuration file uses (see
//! `spec.md` §6 "Persistent config"). Lines starting with `#` and blank
//! lines are ignored so the file can be hand-edited.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Malformed { line: usize, text: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "{e}"),
            StoreError::Malformed { line, text } => {
                write!(f, "malformed entry at line {line}: {text:?}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// A flat `key = value` map, loaded from and saved back to a single file.
///
/// Keys not present in the file simply don't appear in the map; callers are
/// expected to apply their own defaults via [`PersistentStore::get_or`].
pub struct PersistentStore {
    path: PathBuf,
    values: BTreeMap<String, i64>,
    dirty: bool,
}

impl PersistentStore {
    /// Loads a store from `path`. A missing file is not an error: the store
    /// starts empty, matching first-boot behaviour (no persisted state yet).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut values = BTreeMap::new();

        match fs::read_to_string(&path) {
            Ok(text) => {
                for (lineno, line) in text.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let (key, value) = line.split_once('=').ok_or_else(|| StoreError::Malformed {
                        line: lineno + 1,
                        text: line.to_string(),
                    })?;
                    let key = key.trim().to_string();
                    let value: i64 = value.trim().parse().map_err(|_| StoreError::Malformed {
                        line: lineno + 1,
                        text: line.to_string(),
                    })?;
                    values.insert(key, value);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(PersistentStore {
            path,
            values,
            dirty: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).unwrap_or(default)
    }

    /// Sets `key`, marking the store dirty if the value actually changed.
    pub fn put(&mut self, key: &str, value: i64) {
        if self.values.get(key) != Some(&value) {
            self.values.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the whole map back to `path`, sorted by key for a stable diff.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let mut text = String::new();
        for (key, value) in &self.values {
            text.push_str(key);
            text.push_str(" = ");
            text.push_str(&value.to_string());
            text.push('\n');
        }
        fs::write(&self.path, text)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.conf");

        let mut store = PersistentStore::load(&path).unwrap();
        assert_eq!(store.get("ATTEN"), None);
        store.put("ATTEN", 42);
        store.put("A0", 45_000_000);
        store.save().unwrap();

        let reloaded = PersistentStore::load(&path).unwrap();
        assert_eq!(reloaded.get("ATTEN"), Some(42));
        assert_eq!(reloaded.get("A0"), Some(45_000_000));
    }

    #[test]
    fn missing_file_starts_empty_not_error() {
        let store = PersistentStore::load("/nonexistent/path/to/state.conf").unwrap();
        assert_eq!(store.get_or("XOFFSET", 0), 0);
    }

    #[test]
    fn unset_put_does_not_mark_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.conf");
        let mut store = PersistentStore::load(&path).unwrap();
        store.put("ATTEN", 0);
        store.save().unwrap();
        assert!(!store.is_dirty());

        store.put("ATTEN", 0);
        assert!(!store.is_dirty());
        store.put("ATTEN", 1);
        assert!(store.is_dirty());
    }

    #[test]
    fn rejects_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.conf");
        fs::write(&path, "not a valid line\n").unwrap();
        assert!(matches!(
            PersistentStore::load(&path),
            Err(StoreError::Malformed { line: 1, .. })
        ));
    }
}
