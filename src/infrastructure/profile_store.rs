use crate::domain::browser::StoredCookie;
use crate::domain::errors::ProfileError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Storage state written on close and replayed on open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub profile: String,
    pub saved_at: DateTime<Utc>,
    pub cookies: Vec<StoredCookie>,
}

/// Directory of `<profile>.json` files, one per caller-chosen profile name.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Take exclusive ownership of `profile` for this process.
    ///
    /// A second acquire, from this or any other process, fails with
    /// `ProfileError::InUse` until the returned lease is dropped.
    pub fn acquire(&self, profile: &str) -> Result<ProfileLease, ProfileError> {
        validate_name(profile)?;
        fs::create_dir_all(&self.dir)?;

        let state_path = self.dir.join(format!("{}.json", profile));
        let lock_path = self.dir.join(format!("{}.lock", profile));

        let mut lock = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ProfileError::InUse {
                    profile: profile.to_string(),
                    lock_path,
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(lock, "{}", std::process::id())?;

        info!("Acquired profile {} ({:?})", profile, state_path);
        Ok(ProfileLease {
            profile: profile.to_string(),
            state_path,
            lock_path,
        })
    }
}

fn validate_name(profile: &str) -> Result<(), ProfileError> {
    let valid = !profile.is_empty()
        && profile.len() <= 64
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !profile.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ProfileError::InvalidName(profile.to_string()))
    }
}

/// Exclusive hold on one profile. Releasing it (drop) removes the lock file.
#[derive(Debug)]
pub struct ProfileLease {
    profile: String,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl ProfileLease {
    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn load(&self) -> Result<Option<StoredSession>, ProfileError> {
        let content = match fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session: StoredSession = serde_json::from_str(&content)?;
        info!(
            "Loaded {} cookie(s) for profile {} saved at {}",
            session.cookies.len(),
            self.profile,
            session.saved_at
        );
        Ok(Some(session))
    }

    pub fn save(&self, cookies: &[StoredCookie]) -> Result<(), ProfileError> {
        let session = StoredSession {
            profile: self.profile.clone(),
            saved_at: Utc::now(),
            cookies: cookies.to_vec(),
        };
        let content = serde_json::to_string_pretty(&session)?;

        // Atomic write: write to temp file then rename
        let temp_path = self.state_path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.state_path)?;

        info!(
            "Saved {} cookie(s) for profile {}",
            cookies.len(),
            self.profile
        );
        Ok(())
    }
}

impl Drop for ProfileLease {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!("Failed to release profile lock {:?}: {}", self.lock_path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn cookie(name: &str) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: ".chase.com".to_string(),
            path: "/".to_string(),
            expires: Some(1_900_000_000.0),
            http_only: true,
            secure: true,
            same_site: Some("Lax".to_string()),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let lease = assert_ok!(store.acquire("main"));

        assert!(assert_ok!(lease.load()).is_none());
        assert_ok!(lease.save(&[cookie("a"), cookie("b")]));

        let loaded = assert_ok!(lease.load()).unwrap();
        assert_eq!(loaded.profile, "main");
        assert_eq!(loaded.cookies.len(), 2);
        assert!(dir.path().join("main.json").exists());
    }

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());

        let first = assert_ok!(store.acquire("main"));
        let err = assert_err!(store.acquire("main"));
        assert!(matches!(err, ProfileError::InUse { ref profile, .. } if profile == "main"));

        // Other profiles are independent
        let _other = store.acquire("other").unwrap();

        drop(first);
        assert!(store.acquire("main").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        for name in ["", "../evil", ".hidden", "a/b", "with space"] {
            assert!(
                matches!(store.acquire(name), Err(ProfileError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.json"), "not json").unwrap();
        let lease = ProfileStore::new(dir.path()).acquire("main").unwrap();
        assert!(matches!(lease.load(), Err(ProfileError::Serde(_))));
    }
}
