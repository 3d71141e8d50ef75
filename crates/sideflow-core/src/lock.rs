//! Durable TTL locks over the filesystem.
//!
//! Each lock key is represented by two sibling files under the configured
//! root: a zero-byte marker `<key>.lock` and a JSON info file
//! `<key>.lock.json`. The marker is created with exclusive-create semantics
//! (`O_EXCL`), which is the cross-process ordering authority; the info file
//! carries the owner token and expiry. An info file whose `expires_at` has
//! passed is treated as absent and cleaned lazily.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a marker may exist without an info file before it is treated as
/// the residue of a crashed acquirer rather than an acquisition in flight.
const ORPHAN_GRACE: Duration = Duration::from_millis(50);

/// A held lock as recorded on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    #[serde(skip, default)]
    pub lock_key: String,
    /// Owner token, 32 hex characters.
    pub uuid: String,
    /// Acquisition time, epoch seconds.
    pub acquired_at: u64,
    pub ttl_seconds: u64,
    /// `acquired_at + ttl_seconds`.
    pub expires_at: u64,
}

impl LockInfo {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug)]
pub struct LockRepository {
    root: PathBuf,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Keys may be arbitrary strings; path separators become underscores so
/// every key maps to a flat file name.
fn safe_key(key: &str) -> String {
    key.replace(['/', '\\'], "_")
}

impl LockRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock", safe_key(key)))
    }

    fn info_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock.json", safe_key(key)))
    }

    fn read_info(&self, key: &str) -> Option<LockInfo> {
        let content = fs::read_to_string(self.info_path(key)).ok()?;
        let mut info: LockInfo = serde_json::from_str(&content).ok()?;
        info.lock_key = key.to_string();
        Some(info)
    }

    /// The current live record, cleaning an expired one in passing.
    fn read_live_info(&self, key: &str) -> Option<LockInfo> {
        let info = self.read_info(key)?;
        if info.is_expired(now_epoch()) {
            self.remove_lock_files(key);
            return None;
        }
        Some(info)
    }

    /// Info first, then marker; both removals tolerate absence.
    fn remove_lock_files(&self, key: &str) {
        if let Err(err) = fs::remove_file(self.info_path(key)) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(key, error = %err, "failed to remove lock info file");
            }
        }
        if let Err(err) = fs::remove_file(self.marker_path(key)) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(key, error = %err, "failed to remove lock marker");
            }
        }
    }

    fn try_create_marker(&self, key: &str) -> std::io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.marker_path(key))
            .map(|_| ())
    }

    fn write_info(&self, key: &str, info: &LockInfo) -> Result<()> {
        let payload = serde_json::to_string(info)?;
        fs::write(self.info_path(key), payload)?;
        Ok(())
    }

    /// Atomic test-and-set acquisition.
    ///
    /// Returns the owner token and the recorded lock state, or `AlreadyHeld`
    /// when a live record exists for `key`.
    pub fn acquire(&self, key: &str, ttl_seconds: u64) -> Result<(String, LockInfo)> {
        let mut recovery_attempted = false;

        loop {
            if self.read_live_info(key).is_some() {
                return Err(CoreError::AlreadyHeld(key.to_string()));
            }

            match self.try_create_marker(key) {
                Ok(()) => {
                    let acquired_at = now_epoch();
                    let token = Uuid::new_v4().simple().to_string();
                    let info = LockInfo {
                        lock_key: key.to_string(),
                        uuid: token.clone(),
                        acquired_at,
                        ttl_seconds,
                        expires_at: acquired_at + ttl_seconds,
                    };
                    self.write_info(key, &info)?;
                    tracing::debug!(key, ttl_seconds, "lock acquired");
                    return Ok((token, info));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    // A concurrent acquirer may sit between marker creation
                    // and the info write; give it a beat before treating the
                    // marker as crash residue.
                    std::thread::sleep(ORPHAN_GRACE);
                    if self.read_live_info(key).is_some() {
                        return Err(CoreError::AlreadyHeld(key.to_string()));
                    }
                    // Marker without a live info file: the previous holder
                    // crashed mid-acquire. Clean up and retry once.
                    if recovery_attempted {
                        return Err(CoreError::AlreadyHeld(key.to_string()));
                    }
                    recovery_attempted = true;
                    tracing::warn!(key, "recovering orphaned lock marker");
                    self.remove_lock_files(key);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Blocking acquisition bound to a scope guard.
    ///
    /// Polls until the lock frees up or `wait_timeout` elapses. A zero
    /// timeout makes a single attempt. The returned guard releases on every
    /// exit path.
    pub async fn acquire_scoped(
        self: &Arc<Self>,
        key: &str,
        ttl_seconds: u64,
        wait_timeout: Duration,
    ) -> Result<LockGuard> {
        let started = Instant::now();
        loop {
            match self.acquire(key, ttl_seconds) {
                Ok((token, info)) => {
                    return Ok(LockGuard {
                        repo: Arc::clone(self),
                        info,
                        token,
                        released: false,
                    });
                }
                Err(CoreError::AlreadyHeld(_)) => {
                    if started.elapsed() >= wait_timeout {
                        return Err(CoreError::Timeout(key.to_string()));
                    }
                    tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Release a held lock.
    ///
    /// Idempotent when no record exists. Fails with `NotOwner` when a live
    /// record exists and its token does not match.
    pub fn release(&self, key: &str, token: &str) -> Result<()> {
        match self.read_live_info(key) {
            None => {
                // Nothing live; clear any stale marker in passing.
                self.remove_lock_files(key);
                Ok(())
            }
            Some(info) => {
                if info.uuid != token {
                    return Err(CoreError::NotOwner(key.to_string()));
                }
                self.remove_lock_files(key);
                tracing::debug!(key, "lock released");
                Ok(())
            }
        }
    }

    /// The live record for `key`, if any.
    pub fn info(&self, key: &str) -> Option<LockInfo> {
        self.read_live_info(key)
    }

    /// True iff a non-expired record exists.
    pub fn is_held(&self, key: &str) -> bool {
        self.read_live_info(key).is_some()
    }

    /// The subset of `keys` not held, evaluated as of a single pass.
    ///
    /// Not linearizable with concurrent acquisition: a returned key may be
    /// taken by the time the caller acts, so follow up with a real
    /// [`acquire`](Self::acquire).
    pub fn filter_idle(&self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .filter(|key| !self.is_held(key))
            .cloned()
            .collect()
    }
}

/// RAII handle for a scoped lock. Dropping the guard releases the lock;
/// explicit [`release`](Self::release) surfaces release errors instead.
#[derive(Debug)]
pub struct LockGuard {
    repo: Arc<LockRepository>,
    info: LockInfo,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.info.lock_key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.repo.release(&self.info.lock_key, &self.token)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.repo.release(&self.info.lock_key, &self.token) {
                tracing::warn!(key = %self.info.lock_key, error = %err, "lock release on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();

        assert!(!repo.is_held("s1"));
        let (token, info) = repo.acquire("s1", 60).unwrap();
        assert_eq!(info.expires_at, info.acquired_at + 60);
        assert_eq!(token.len(), 32);
        assert!(repo.is_held("s1"));

        repo.release("s1", &token).unwrap();
        assert!(!repo.is_held("s1"));
        assert!(repo.info("s1").is_none());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();
        let (_token, _) = repo.acquire("s1", 60).unwrap();
        assert!(matches!(
            repo.acquire("s1", 60).unwrap_err(),
            CoreError::AlreadyHeld(_)
        ));
    }

    #[test]
    fn concurrent_acquirers_admit_exactly_one() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(LockRepository::new(dir.path()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(std::thread::spawn(move || repo.acquire("shared", 60).is_ok()));
        }
        let wins: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn release_with_wrong_token_is_not_owner() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();
        let (token, _) = repo.acquire("s1", 60).unwrap();

        assert!(matches!(
            repo.release("s1", "feedfacefeedfacefeedfacefeedface").unwrap_err(),
            CoreError::NotOwner(_)
        ));
        // State unchanged: the rightful owner can still release.
        assert!(repo.is_held("s1"));
        repo.release("s1", &token).unwrap();
    }

    #[test]
    fn release_of_missing_lock_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();
        repo.release("never-held", "cafebabe").unwrap();
    }

    #[test]
    fn expired_record_reads_as_free_and_reacquires() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();

        let (stale_token, _) = repo.acquire("s1", 0).unwrap();
        // ttl=0 expires immediately.
        assert!(!repo.is_held("s1"));

        let (fresh_token, _) = repo.acquire("s1", 60).unwrap();
        assert_ne!(stale_token, fresh_token);
        assert!(matches!(
            repo.release("s1", &stale_token).unwrap_err(),
            CoreError::NotOwner(_)
        ));
        repo.release("s1", &fresh_token).unwrap();
    }

    #[test]
    fn orphaned_marker_is_recovered() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();

        // Simulate a holder that crashed between marker and info writes.
        std::fs::write(dir.path().join("s1.lock"), b"").unwrap();
        assert!(!repo.is_held("s1"));

        let (_token, _) = repo.acquire("s1", 60).unwrap();
        assert!(repo.is_held("s1"));
    }

    #[test]
    fn filter_idle_returns_unheld_subset() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();
        let (_token, _) = repo.acquire("s1", 60).unwrap();

        let keys = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        assert_eq!(repo.filter_idle(&keys), vec!["s2", "s3"]);
    }

    #[test]
    fn keys_with_separators_map_to_flat_files() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();
        let (token, _) = repo.acquire("session/1", 60).unwrap();
        assert!(dir.path().join("session_1.lock").exists());
        assert!(dir.path().join("session_1.lock.json").exists());
        repo.release("session/1", &token).unwrap();
    }

    #[test]
    fn info_file_layout_matches_contract() {
        let dir = tempdir().unwrap();
        let repo = LockRepository::new(dir.path()).unwrap();
        let (token, _) = repo.acquire("s1", 60).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("s1.lock.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["uuid"].as_str().unwrap(), token);
        assert_eq!(
            value["expires_at"].as_u64().unwrap(),
            value["acquired_at"].as_u64().unwrap() + value["ttl_seconds"].as_u64().unwrap()
        );
        // Marker is zero bytes.
        let marker = std::fs::metadata(dir.path().join("s1.lock")).unwrap();
        assert_eq!(marker.len(), 0);
    }

    #[tokio::test]
    async fn scoped_guard_releases_on_drop() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(LockRepository::new(dir.path()).unwrap());

        {
            let guard = repo
                .acquire_scoped("s1", 60, Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(guard.key(), "s1");
            assert!(repo.is_held("s1"));
        }
        assert!(!repo.is_held("s1"));
    }

    #[tokio::test]
    async fn scoped_zero_wait_times_out_immediately_on_busy_key() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(LockRepository::new(dir.path()).unwrap());
        let (_token, _) = repo.acquire("s1", 60).unwrap();

        let err = repo
            .acquire_scoped("s1", 60, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn scoped_wait_succeeds_once_holder_releases() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(LockRepository::new(dir.path()).unwrap());
        let (token, _) = repo.acquire("s1", 60).unwrap();

        let waiter = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                repo.acquire_scoped("s1", 60, Duration::from_secs(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        repo.release("s1", &token).unwrap();

        let guard = waiter.await.unwrap().unwrap();
        assert!(repo.is_held("s1"));
        guard.release().unwrap();
        assert!(!repo.is_held("s1"));
    }
}
