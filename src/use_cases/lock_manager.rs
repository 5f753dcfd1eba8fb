// LockManager: named mutual-exclusion leases with TTL, used to serialize
// match finalization. Acquire returns a handle or `None` -- not a throwing
// lock. Release is idempotent. An in-memory implementation is acceptable
// for single-process deployments per spec §4.6.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

struct Lease {
    token: Uuid,
    expires_at_ms: u64,
}

pub struct LockHandle {
    pub key: String,
    token: Uuid,
}

pub struct LockManager {
    leases: Mutex<HashMap<String, Lease>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
        }
    }

    // Attempts to acquire `key` for `ttl`, returning `None` when another
    // live lease holds it.
    pub async fn acquire(&self, key: &str, ttl: Duration, now_ms: u64) -> Option<LockHandle> {
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(key) {
            if existing.expires_at_ms > now_ms {
                return None;
            }
        }
        let token = Uuid::new_v4();
        leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at_ms: now_ms + ttl.as_millis() as u64,
            },
        );
        Some(LockHandle {
            key: key.to_string(),
            token,
        })
    }

    // Idempotent: releasing a lock you don't hold (already expired, or
    // taken over by someone else) is a no-op.
    pub async fn release(&self, handle: &LockHandle) {
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(&handle.key) {
            if existing.token == handle.token {
                leases.remove(&handle.key);
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedLockManager = Arc<LockManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_first_is_live() {
        let lm = LockManager::new();
        let h1 = lm.acquire("match:1", Duration::from_secs(30), 0).await;
        assert!(h1.is_some());
        let h2 = lm.acquire("match:1", Duration::from_secs(30), 1_000).await;
        assert!(h2.is_none());
    }

    #[tokio::test]
    async fn release_then_acquire_succeeds() {
        let lm = LockManager::new();
        let h1 = lm.acquire("match:1", Duration::from_secs(30), 0).await.unwrap();
        lm.release(&h1).await;
        let h2 = lm.acquire("match:1", Duration::from_secs(30), 1_000).await;
        assert!(h2.is_some());
    }

    #[tokio::test]
    async fn acquire_succeeds_after_ttl_expiry() {
        let lm = LockManager::new();
        let _h1 = lm.acquire("match:1", Duration::from_millis(10), 0).await.unwrap();
        let h2 = lm.acquire("match:1", Duration::from_secs(30), 20).await;
        assert!(h2.is_some());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let lm = LockManager::new();
        let h1 = lm.acquire("match:1", Duration::from_secs(30), 0).await.unwrap();
        lm.release(&h1).await;
        lm.release(&h1).await;
    }
}
