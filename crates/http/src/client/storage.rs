//! Key/value storage backing the session store

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Minimal storage capability used to persist credentials
pub trait CredentialStorage: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> io::Result<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> io::Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Storage that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Storage persisted as a JSON object on disk
///
/// Every write replaces the whole file through a sibling temp file, which is
/// fine for the handful of keys a session needs. On unix the file is readable
/// by its owner only.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file, starting empty if it does not exist yet
    ///
    /// A file that cannot be parsed is treated as an empty session and is
    /// replaced on the next write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let values: BTreeMap<String, String> = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable session storage");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        debug!(path = %path.display(), keys = values.len(), "Opened session storage");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let content = serde_json::to_vec_pretty(values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Readers only ever see the old file or the complete new one
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&content)?;
        file.as_file().sync_all()?;

        // On Unix, set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut values = lock(&self.values);
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("token"), None);

        storage.set("token", "abc").unwrap();
        assert_eq!(storage.get("token").as_deref(), Some("abc"));

        storage.remove("token").unwrap();
        storage.remove("token").unwrap();
        assert_eq!(storage.get("token"), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set("token", "abc").unwrap();
        storage.set("refresh_token", "xyz").unwrap();
        storage.remove("refresh_token").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("token").as_deref(), Some("abc"));
        assert_eq!(reopened.get("refresh_token"), None);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn test_file_storage_recovers_from_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{\n  \"token\": \"abc").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get("token"), None);

        storage.set("token", "fresh").unwrap();
        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("token").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_file_storage_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set("token", "abc").unwrap();
        storage.set("token", "def").unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("session.json")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        // A file left behind with default permissions is tightened on write
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let storage = FileStorage::open(&path).unwrap();
        storage.set("token", "secret").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
