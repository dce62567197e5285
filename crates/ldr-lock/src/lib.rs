//! Execution Lock Service (spec §4.7, C8).
//!
//! Collapses the spec's `TryAcquire`/`Release`/`ReclaimStale` contract into
//! a small trait (per spec §9's "small interface sets" redesign note) so
//! `ldr-engine` depends on a `dyn LockService` rather than `ldr-db`
//! directly. The default implementation is a thin wrapper over
//! `ldr-db::lock`, which owns the actual `SELECT ... FOR UPDATE` sentinel
//! transaction (see that module's header for why option (b) was chosen over
//! (a)/(c)).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

/// An acquired lease, returned by [`LockService::try_acquire`]. Opaque to
/// callers beyond its identity — release it via [`LockService::release`] or
/// let a [`LockGuard`] do it for you.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHandle(pub i64);

#[async_trait]
pub trait LockService: Send + Sync {
    /// Non-blocking attempt to acquire an execution lease for `loader_code`.
    /// Returns `None` (not `Err`) when the loader is already at
    /// `max_parallel` concurrent executions — spec's `LOCK_UNAVAILABLE` is
    /// an expected outcome, not an error (§7).
    async fn try_acquire(
        &self,
        loader_code: &str,
        max_parallel: i32,
        replica_name: &str,
    ) -> Result<Option<LockHandle>>;

    async fn release(&self, handle: LockHandle) -> Result<()>;

    /// Marks all unreleased leases older than `max_age_seconds` as released.
    /// Returns the count reclaimed.
    async fn reclaim_stale(&self, max_age_seconds: i64) -> Result<u64>;

    /// Whether `loader_code` currently has any unreleased lease — used by
    /// C11's hung-RUNNING detection (§4.10).
    async fn has_unreleased_lease(&self, loader_code: &str) -> Result<bool>;
}

pub struct PgLockService {
    pool: PgPool,
}

impl PgLockService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockService for PgLockService {
    async fn try_acquire(
        &self,
        loader_code: &str,
        max_parallel: i32,
        replica_name: &str,
    ) -> Result<Option<LockHandle>> {
        let lock_id = ldr_db::lock::try_acquire(&self.pool, loader_code, max_parallel, replica_name).await?;
        Ok(lock_id.map(LockHandle))
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        ldr_db::lock::release(&self.pool, handle.0).await
    }

    async fn reclaim_stale(&self, max_age_seconds: i64) -> Result<u64> {
        ldr_db::lock::reclaim_stale(&self.pool, max_age_seconds).await
    }

    async fn has_unreleased_lease(&self, loader_code: &str) -> Result<bool> {
        ldr_db::lock::has_unreleased_lease(&self.pool, loader_code).await
    }
}

/// RAII guard that releases its lease in the background on drop, so a lease
/// is reclaimed even if the guarded execution panics before calling
/// [`release`](LockService::release) explicitly — the "guaranteed-on-exit"
/// requirement of spec §4.9 step 4. Normal control flow should still call
/// [`LockGuard::release`] directly so release happens promptly and any
/// error surfaces to the caller; the drop path is a backstop, not the
/// primary release mechanism.
pub struct LockGuard {
    service: Arc<dyn LockService>,
    handle: Option<LockHandle>,
    loader_code: String,
}

impl LockGuard {
    pub fn new(service: Arc<dyn LockService>, handle: LockHandle, loader_code: impl Into<String>) -> Self {
        Self {
            service,
            handle: Some(handle),
            loader_code: loader_code.into(),
        }
    }

    /// Release promptly and observe any error. A no-op if already released
    /// (including via drop).
    pub async fn release(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            self.service.release(handle).await?;
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let service = self.service.clone();
            let loader_code = self.loader_code.clone();
            tokio::spawn(async move {
                if let Err(e) = service.release(handle).await {
                    warn!(loader_code, error = %e, "backstop lock release failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory lock service for fast unit tests of [`LockGuard`] itself;
    /// `ldr-db/tests` covers the real Postgres-backed concurrency property.
    #[derive(Default)]
    struct FakeLockService {
        held: Mutex<HashMap<String, i64>>,
        next_id: Mutex<i64>,
        released: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl LockService for FakeLockService {
        async fn try_acquire(
            &self,
            loader_code: &str,
            max_parallel: i32,
            _replica_name: &str,
        ) -> Result<Option<LockHandle>> {
            let mut held = self.held.lock().unwrap();
            let count = *held.get(loader_code).unwrap_or(&0);
            if count >= max_parallel as i64 {
                return Ok(None);
            }
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            held.insert(loader_code.to_string(), count + 1);
            Ok(Some(LockHandle(*next_id)))
        }

        async fn release(&self, handle: LockHandle) -> Result<()> {
            self.released.lock().unwrap().push(handle.0);
            Ok(())
        }

        async fn reclaim_stale(&self, _max_age_seconds: i64) -> Result<u64> {
            Ok(0)
        }

        async fn has_unreleased_lease(&self, _loader_code: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn explicit_release_records_handle() {
        let service: Arc<dyn LockService> = Arc::new(FakeLockService::default());
        let handle = service.try_acquire("L", 1, "r1").await.unwrap().unwrap();
        let guard = LockGuard::new(service.clone(), handle, "L");
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let service = Arc::new(FakeLockService::default());
        let handle = service.try_acquire("L", 1, "r1").await.unwrap().unwrap();
        {
            let _guard = LockGuard::new(service.clone() as Arc<dyn LockService>, handle, "L");
        }
        // Give the spawned release task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*service.released.lock().unwrap(), vec![handle.0]);
    }
}
