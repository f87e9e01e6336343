//! On-disk persistence of the single credential record.

use crate::error::Result;
use crate::models::CredentialRecord;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. A missing or unreadable file is "not authenticated", never an error.
    pub fn load(&self) -> Option<CredentialRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No token cache file found");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Error reading token cache");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Error parsing token cache");
                None
            }
        }
    }

    /// Replace the record on disk.
    ///
    /// The JSON goes to a uniquely named 0600 temp file in the same directory,
    /// is synced, then persisted over the target, so readers see either the
    /// old record or the new one and concurrent saves never share a temp file.
    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        let dir = match self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir
            }
            None => Path::new("."),
        };

        let content = serde_json::to_string_pretty(record)?;

        // Removed on drop if anything below fails
        let mut tmp = NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(path = %self.path.display(), "Tokens saved");
        Ok(())
    }

    pub fn delete(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Token cache removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> CredentialRecord {
        CredentialRecord {
            access_token: "access-123".into(),
            refresh_token: Some("refresh-456".into()),
            expires_at: 1_700_000_000,
            scope: Some("offline_access Mail.Read".into()),
        }
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));

        store.save(&record()).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.access_token, "access-123");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-456"));
        assert_eq!(loaded.expires_at, 1_700_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tokens.json");
        let store = TokenStore::new(&path);
        store.save(&record()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_tightens_existing_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tokens.json");
        fs::write(&path, "{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        TokenStore::new(&path).save(&record()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_overwrites_rather_than_merges() {
        let tmp = TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        store.save(&record()).unwrap();

        let replacement = CredentialRecord {
            access_token: "new".into(),
            refresh_token: None,
            expires_at: 5,
            scope: None,
        };
        store.save(&replacement).unwrap();

        assert_eq!(store.load().unwrap(), replacement);
        assert_eq!(dir_entries(tmp.path()), vec!["tokens.json"]);
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let tmp = TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("nested/dir/tokens.json"));
        store.save(&record()).unwrap();
        assert!(store.load().is_some());
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("absent.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_corrupt_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tokens.json");
        fs::write(&path, "{not json").unwrap();
        assert!(TokenStore::new(path).load().is_none());
    }

    #[test]
    fn test_save_failure_is_error_and_keeps_prior_file() {
        let tmp = TempDir::new().unwrap();
        // Target is a directory, so the rename cannot replace it
        let path = tmp.path().join("tokens.json");
        fs::create_dir(&path).unwrap();

        let store = TokenStore::new(&path);
        assert!(store.save(&record()).is_err());
        assert!(path.is_dir());
        assert_eq!(dir_entries(tmp.path()), vec!["tokens.json"]);
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        assert!(!store.delete().unwrap());

        store.save(&record()).unwrap();
        assert!(store.delete().unwrap());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_concurrent_saves_never_tear_the_file() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let tmp = TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("tokens.json"));
        store.save(&record()).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut torn = 0;
                while !done.load(Ordering::Relaxed) {
                    if store.load().is_none() {
                        torn += 1;
                    }
                }
                torn
            })
        };

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let big = CredentialRecord {
                            access_token: format!("{w}-{i}-{}", "x".repeat(64 * 1024)),
                            refresh_token: Some(format!("refresh-{w}-{i}")),
                            expires_at: i,
                            scope: None,
                        };
                        store.save(&big).unwrap();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);

        assert_eq!(reader.join().unwrap(), 0);
        let last = store.load().unwrap();
        assert!(last.refresh_token.unwrap().starts_with("refresh-"));
        assert_eq!(dir_entries(tmp.path()), vec!["tokens.json"]);
    }
}
