//! Distributed lock contract and the in-process backend.
//!
//! The lock is a second line of defense behind the store's atomic claim,
//! used only for jobs with `skip_if_running` set. Failing to acquire it is a
//! normal "someone else has it" outcome, reported as `Ok(None)` — never an
//! error. Dropping the returned guard releases the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::store::to_chrono;

/// Cross-instance mutual exclusion primitive.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Attempt to acquire the lock named `key` for at most `ttl`.
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere. `Err` is reserved
    /// for provider failures (transport, protocol), not contention.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>>;
}

/// Held lock; releasing happens on drop.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Wrap a release action. Providers call this with whatever undoes the
    /// acquisition on their side.
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// In-process lock provider for development and tests.
///
/// Each held lock stores a fencing token and an expiry; an expired entry is
/// treated as free, and a guard only removes the entry if its own token is
/// still the holder.
#[derive(Debug, Default)]
pub struct InProcessLockProvider {
    held: Arc<DashMap<String, (Uuid, DateTime<Utc>)>>,
}

impl InProcessLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of locks currently held (including expired entries not yet
    /// reclaimed).
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[async_trait]
impl LockProvider for InProcessLockProvider {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let now = Utc::now();
        let token = Uuid::new_v4();
        let expires = now + to_chrono(ttl);

        let acquired = match self.held.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().1 <= now {
                    // Previous holder expired; take over.
                    entry.insert((token, expires));
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert((token, expires));
                true
            }
        };

        if !acquired {
            return Ok(None);
        }

        let held = Arc::clone(&self.held);
        let guard_key = key.to_string();
        Ok(Some(LockGuard::new(key, move || {
            held.remove_if(&guard_key, |_, (holder, _)| *holder == token);
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_acquire_and_release_on_drop() {
        let provider = InProcessLockProvider::new();
        let guard = assert_ok!(
            provider
                .try_acquire("job:report", Duration::from_secs(60))
                .await
        );
        assert!(guard.is_some());
        assert_eq!(provider.held_count(), 1);

        drop(guard);
        assert_eq!(provider.held_count(), 0);

        // Free again after release.
        assert!(provider
            .try_acquire("job:report", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_contention_is_not_an_error() {
        let provider = InProcessLockProvider::new();
        let _held = provider
            .try_acquire("job:report", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let second = provider
            .try_acquire("job:report", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken_over() {
        let provider = InProcessLockProvider::new();
        let stale = provider
            .try_acquire("job:report", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        let taken = provider
            .try_acquire("job:report", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(taken.is_some());

        // The stale guard must not release the new holder's lock.
        drop(stale);
        assert_eq!(provider.held_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let provider = InProcessLockProvider::new();
        let _a = provider
            .try_acquire("job:a", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let b = provider
            .try_acquire("job:b", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(b.is_some());
    }
}
