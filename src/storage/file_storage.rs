use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, error, info};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::{RecordReader, RecordStorage};

pub const RECORDS_DIR_ENV: &str = "CRS_OFFLINE_RECORDS_DIR";

pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| {
            error!("Failed to create records dir {}: {}", base_path.display(), e);
            StorageError::ConnectionFailed
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    /// Records directory from `CRS_OFFLINE_RECORDS_DIR` if set, otherwise the
    /// current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var(RECORDS_DIR_ENV) {
            info!("Using FileStorage from {}: {}", RECORDS_DIR_ENV, dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| {
            error!("Failed to get current dir: {}", e);
            StorageError::ReadFailed
        })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    /// Records directory from the environment if set, otherwise `configured`.
    pub fn from_env_or<P: AsRef<Path>>(configured: P) -> Result<Self, StorageError> {
        match std::env::var(RECORDS_DIR_ENV) {
            Ok(dir) => {
                info!("Using FileStorage from {}: {}", RECORDS_DIR_ENV, dir);
                Self::new(PathBuf::from(dir))
            }
            Err(_) => Self::new(configured),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    fn collect(&self, dir: &Path, keys: &mut Vec<String>) -> Result<(), StorageError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            error!("Failed to read records dir {}: {}", dir.display(), e);
            StorageError::ReadFailed
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed
            })?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| {
                error!("Failed to stat {}: {}", path.display(), e);
                StorageError::ReadFailed
            })?;
            if file_type.is_dir() {
                self.collect(&path, keys)?;
            } else if !file_type.is_file() {
                debug!("Skipping non-regular entry {}", path.display());
            } else if let Ok(relative) = path.strip_prefix(&self.base_path) {
                let key: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                keys.push(key.join("/"));
            }
        }
        Ok(())
    }
}

impl RecordStorage for FileStorage {
    fn open_record(&self, key: &str) -> Result<RecordReader, StorageError> {
        let path = self.record_path(key)?;
        let path = match path.canonicalize() {
            Ok(resolved) if resolved.is_file() => resolved,
            _ => {
                debug!("Record {} not found at {}", key, path.display());
                return Err(StorageError::NotFound(key.to_string()));
            }
        };
        let base = self.base_path.canonicalize().map_err(|e| {
            error!("Failed to resolve records dir {}: {}", self.base_path.display(), e);
            StorageError::ReadFailed
        })?;
        if !path.starts_with(&base) {
            debug!("Record {} resolves outside {}", key, base.display());
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let file = fs::File::open(&path).map_err(|e| {
            error!("Failed to open record {}: {}", path.display(), e);
            StorageError::ReadFailed
        })?;
        debug!("Opened record {}", path.display());
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    fn list_records(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        self.collect(&self.base_path, &mut keys)?;
        keys.sort();
        debug!("Listed {} record(s) in {}", keys.len(), self.base_path.display());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn storage_with(files: &[(&str, &[u8])]) -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let storage = FileStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_open_record_streams_content() {
        let (_dir, storage) =
            storage_with(&[("2024/05/a.http", b"GET / HTTP/1.1\r\n\r\n")]);
        let mut reader = storage.open_record("2024/05/a.http").unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_list_records_sorted_with_subdirs() {
        let (_dir, storage) =
            storage_with(&[("b.http", b"x"), ("a/c.http", b"y"), ("a.http", b"z")]);
        assert_eq!(
            storage.list_records().unwrap(),
            vec!["a.http", "a/c.http", "b.http"]
        );
    }

    #[test]
    fn test_missing_and_invalid_keys() {
        let (_dir, storage) = storage_with(&[("a.http", b"x")]);
        assert!(matches!(storage.open_record("nope.http"), Err(StorageError::NotFound(_))));
        assert!(matches!(storage.open_record("a"), Err(StorageError::NotFound(_))));
        for key in ["", "../etc/passwd", "a/../../b", "/etc/passwd", "./a.http", "a\\b"] {
            assert!(
                matches!(storage.open_record(key), Err(StorageError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_stay_inside_base() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.http"), b"x").unwrap();
        let (dir, storage) = storage_with(&[("a/c.http", b"y")]);
        symlink(dir.path(), dir.path().join("a/loop")).unwrap();
        symlink(outside.path().join("secret.http"), dir.path().join("leak.http")).unwrap();
        symlink(dir.path().join("a/c.http"), dir.path().join("alias.http")).unwrap();

        assert_eq!(storage.list_records().unwrap(), vec!["a/c.http"]);
        assert!(matches!(
            storage.open_record("leak.http"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.open_record("alias.http").is_ok());
    }

    #[test]
    #[serial]
    fn test_new_default_uses_env() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(RECORDS_DIR_ENV, dir.path());
        let storage = FileStorage::new_default().unwrap();
        assert_eq!(storage.base_path(), dir.path());

        let other = TempDir::new().unwrap();
        let storage = FileStorage::from_env_or(other.path()).unwrap();
        assert_eq!(storage.base_path(), dir.path());
        std::env::remove_var(RECORDS_DIR_ENV);

        let storage = FileStorage::from_env_or(other.path()).unwrap();
        assert_eq!(storage.base_path(), other.path());
    }
}
