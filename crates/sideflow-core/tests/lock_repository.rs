//! Integration scenarios for the filesystem lock repository.

use sideflow_core::error::CoreError;
use sideflow_core::lock::LockRepository;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

// ─── Idle scan ──────────────────────────────────────────────────────────

#[test]
fn idle_scan_skips_held_sessions_and_recovers_after_release() {
    let dir = tempdir().unwrap();
    let repo = LockRepository::new(dir.path()).unwrap();
    let keys = vec!["s1".to_string(), "s2".to_string()];

    let (token, _) = repo.acquire("s1", 600).unwrap();
    assert_eq!(repo.filter_idle(&keys), vec!["s2"]);

    repo.release("s1", &token).unwrap();
    assert_eq!(repo.filter_idle(&keys), keys);
}

// ─── TTL reclaim ────────────────────────────────────────────────────────

#[test]
fn ttl_reclaim_frees_the_key_and_invalidates_the_stale_token() {
    let dir = tempdir().unwrap();
    let repo = LockRepository::new(dir.path()).unwrap();

    let (stale_token, _) = repo.acquire("s1", 1).unwrap();
    assert!(repo.is_held("s1"));

    std::thread::sleep(Duration::from_secs(2));
    assert!(!repo.is_held("s1"));

    let (fresh_token, info) = repo.acquire("s1", 60).unwrap();
    assert_eq!(info.ttl_seconds, 60);

    assert!(matches!(
        repo.release("s1", &stale_token).unwrap_err(),
        CoreError::NotOwner(_)
    ));
    repo.release("s1", &fresh_token).unwrap();
}

// ─── Restart durability ─────────────────────────────────────────────────

#[test]
fn locks_survive_a_repository_reopen() {
    let dir = tempdir().unwrap();
    let token = {
        let repo = LockRepository::new(dir.path()).unwrap();
        repo.acquire("s1", 600).unwrap().0
    };

    // A fresh repository over the same root sees the same lock state.
    let reopened = LockRepository::new(dir.path()).unwrap();
    assert!(reopened.is_held("s1"));
    let info = reopened.info("s1").unwrap();
    assert_eq!(info.uuid, token);
    assert_eq!(info.lock_key, "s1");

    reopened.release("s1", &token).unwrap();
    assert!(!reopened.is_held("s1"));
}

// ─── Waiters ────────────────────────────────────────────────────────────

#[tokio::test]
async fn contended_scoped_acquisitions_serialize() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(LockRepository::new(dir.path()).unwrap());

    let first = repo
        .acquire_scoped("s1", 600, Duration::ZERO)
        .await
        .unwrap();

    let waiter = {
        let repo = Arc::clone(&repo);
        tokio::spawn(async move {
            let guard = repo
                .acquire_scoped("s1", 600, Duration::from_secs(5))
                .await
                .unwrap();
            guard.token().to_string()
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    let first_token = first.token().to_string();
    first.release().unwrap();

    let second_token = waiter.await.unwrap();
    assert_ne!(first_token, second_token);
    // The waiter's guard has dropped by now; the key is free again.
    assert!(!repo.is_held("s1"));
}

#[tokio::test]
async fn scoped_guard_releases_when_the_task_errors_out() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(LockRepository::new(dir.path()).unwrap());

    let result: Result<(), &str> = async {
        let _guard = repo
            .acquire_scoped("s1", 600, Duration::ZERO)
            .await
            .unwrap();
        Err("command exploded")
    }
    .await;

    assert!(result.is_err());
    assert!(!repo.is_held("s1"));
}
