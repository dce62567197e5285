//! Scheduler (spec §4.9, C10).
//!
//! Three independent `tokio::time::interval` ticks — several timers in one
//! process, no central event loop — covering the dispatch, recovery, and
//! stale-lock cadences this system needs.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ldr_db::entities::Loader;
use ldr_lock::{LockGuard, LockService};
use ldr_schemas::{ApprovalStatus, LoadStatus};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::executor::LoadExecutor;
use crate::recovery;

pub struct SchedulerConfig {
    pub dispatch_period: Duration,
    pub recovery_period: Duration,
    pub stalelock_period: Duration,
    pub worker_pool_size: usize,
    pub lock_max_age_seconds: i64,
    pub failed_threshold_seconds: i64,
    pub hung_threshold_seconds: i64,
}

pub struct Scheduler {
    central: PgPool,
    executor: Arc<LoadExecutor>,
    lock_service: Arc<dyn LockService>,
    replica_name: String,
    replica_ordinal: u32,
    config: SchedulerConfig,
    worker_slots: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        central: PgPool,
        executor: Arc<LoadExecutor>,
        lock_service: Arc<dyn LockService>,
        replica_name: String,
        replica_ordinal: u32,
        config: SchedulerConfig,
    ) -> Self {
        let worker_slots = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            central,
            executor,
            lock_service,
            replica_name,
            replica_ordinal,
            config,
            worker_slots,
        }
    }

    /// Spawn the three ticks. Returns their join handles so a caller (the
    /// daemon's `main`) can await or abort them on shutdown.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let dispatch = self.clone();
        let recovery = self.clone();
        let stalelock = self.clone();

        vec![
            tokio::spawn(async move { dispatch.run_dispatch_loop().await }),
            tokio::spawn(async move { recovery.run_recovery_loop().await }),
            tokio::spawn(async move { stalelock.run_stalelock_loop().await }),
        ]
    }

    async fn run_dispatch_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.dispatch_period);
        loop {
            ticker.tick().await;
            if let Err(e) = self.dispatch_tick().await {
                error!(error = %e, "dispatch tick failed");
            }
        }
    }

    async fn run_recovery_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.recovery_period);
        loop {
            ticker.tick().await;
            if let Err(e) = recovery::run_recovery_tick(
                &self.central,
                self.lock_service.as_ref(),
                self.config.failed_threshold_seconds,
                self.config.hung_threshold_seconds,
            )
            .await
            {
                error!(error = %e, "recovery tick failed");
            }
        }
    }

    async fn run_stalelock_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.stalelock_period);
        loop {
            ticker.tick().await;
            match self.lock_service.reclaim_stale(self.config.lock_max_age_seconds).await {
                Ok(count) if count > 0 => info!(count, "reclaimed stale execution leases"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "stale-lock reclamation failed"),
            }
        }
    }

    /// One dispatch tick (spec §4.9 steps 1-5). Returns the number of
    /// loaders dispatched, mostly useful for tests.
    pub async fn dispatch_tick(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let candidates = select_candidates(&ldr_db::entities::list_enabled(&self.central).await?, now);

        let mut dispatched = 0;
        for loader in candidates {
            let Some(handle) = self
                .lock_service
                .try_acquire(&loader.loader_code, loader.max_parallel_executions, &self.replica_name)
                .await?
            else {
                continue;
            };

            let permit = self.worker_slots.clone().acquire_owned().await;
            let Ok(permit) = permit else { continue };

            let executor = self.executor.clone();
            let lock_service = self.lock_service.clone();
            let replica_name = self.replica_name.clone();
            let replica_ordinal = self.replica_ordinal;
            let loader_code = loader.loader_code.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let guard = LockGuard::new(lock_service, handle, loader_code.clone());
                match executor.execute(&loader, &replica_name, replica_ordinal).await {
                    Ok(outcome) => {
                        if !outcome.succeeded {
                            warn!(loader_code = %loader_code, "execution completed with failure, see history");
                        }
                    }
                    Err(e) => error!(loader_code = %loader_code, error = %e, "execution worker errored"),
                }
                if let Err(e) = guard.release().await {
                    warn!(loader_code = %loader_code, error = %e, "explicit lock release failed");
                }
            });

            dispatched += 1;
        }

        Ok(dispatched)
    }
}

/// Filter + priority-order candidates per spec §4.9 steps 2-3 and 5's
/// `maxIntervalSeconds` "must run now" promotion. A FAILED loader is never a
/// candidate here — per spec §4.9 step 2 the scheduler leaves it alone until
/// the recovery tick flips it back to IDLE.
fn select_candidates(loaders: &[Loader], now: chrono::DateTime<Utc>) -> Vec<Loader> {
    let mut candidates: Vec<Loader> = loaders
        .iter()
        .filter(|l| l.approval_status == ApprovalStatus::Approved)
        .filter(|l| l.load_status == LoadStatus::Idle)
        .filter(|l| is_interval_elapsed(l, now))
        .cloned()
        .collect();

    candidates.sort_by(|a, b| priority_key(a, now).cmp(&priority_key(b, now)));
    candidates
}

fn is_interval_elapsed(loader: &Loader, now: chrono::DateTime<Utc>) -> bool {
    match loader.last_load_timestamp {
        None => true,
        Some(ts) => (now - ts).num_seconds() >= loader.min_interval_seconds as i64,
    }
}

/// Sort key: overdue-past-`maxIntervalSeconds` loaders first, then by
/// `lastLoadTimestamp` ascending (nil first).
fn priority_key(loader: &Loader, now: chrono::DateTime<Utc>) -> (i32, i64) {
    let overdue = must_run_now(loader, now);
    let watermark_rank = match loader.last_load_timestamp {
        None => i64::MIN,
        Some(ts) => ts.timestamp(),
    };
    (if overdue { 0 } else { 1 }, watermark_rank)
}

fn must_run_now(loader: &Loader, now: chrono::DateTime<Utc>) -> bool {
    match loader.last_load_timestamp {
        None => false,
        Some(ts) => (now - ts).num_seconds() >= loader.max_interval_seconds as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use ldr_schemas::PurgeStrategy;

    fn loader(code: &str, status: LoadStatus, last: Option<chrono::DateTime<Utc>>) -> Loader {
        Loader {
            id: 1,
            loader_code: code.to_string(),
            loader_sql_encrypted: String::new(),
            source_database_code: "DB1".to_string(),
            load_status: status,
            enabled: true,
            approval_status: ApprovalStatus::Approved,
            min_interval_seconds: 60,
            max_interval_seconds: 3600,
            max_query_period_seconds: 3600,
            max_parallel_executions: 1,
            last_load_timestamp: last,
            source_timezone_offset_hours: 0,
            aggregation_period_seconds: None,
            purge_strategy: PurgeStrategy::SkipDuplicates,
            failed_since: None,
            consecutive_zero_record_runs: 0,
        }
    }

    #[test]
    fn filters_out_running_and_paused() {
        let now = Utc::now();
        let loaders = vec![
            loader("RUNNING1", LoadStatus::Running, None),
            loader("PAUSED1", LoadStatus::Paused, None),
            loader("IDLE1", LoadStatus::Idle, None),
        ];
        let candidates = select_candidates(&loaders, now);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].loader_code, "IDLE1");
    }

    #[test]
    fn filters_out_rejected_approval() {
        let now = Utc::now();
        let mut l = loader("L1", LoadStatus::Idle, None);
        l.approval_status = ApprovalStatus::PendingApproval;
        assert!(select_candidates(&[l], now).is_empty());
    }

    #[test]
    fn respects_min_interval_seconds() {
        let now = Utc::now();
        let recent = now - ChronoDuration::seconds(10);
        let l = loader("L1", LoadStatus::Idle, Some(recent));
        assert!(select_candidates(&[l], now).is_empty());
    }

    #[test]
    fn nil_watermark_is_always_eligible() {
        let now = Utc::now();
        let l = loader("L1", LoadStatus::Idle, None);
        assert_eq!(select_candidates(&[l], now).len(), 1);
    }

    #[test]
    fn failed_loaders_are_never_candidates() {
        let now = Utc::now();
        let old = now - ChronoDuration::seconds(7200);
        let loaders = vec![
            loader("FAILED1", LoadStatus::Failed, Some(old)),
            loader("IDLE1", LoadStatus::Idle, Some(old)),
        ];
        let candidates = select_candidates(&loaders, now);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].loader_code, "IDLE1");
    }

    #[test]
    fn overdue_past_max_interval_is_promoted_above_everything() {
        let now = Utc::now();
        let barely_due = now - ChronoDuration::seconds(61);
        let very_overdue = now - ChronoDuration::seconds(4000);

        let mut overdue_idle = loader("IDLE_OVERDUE", LoadStatus::Idle, Some(very_overdue));
        overdue_idle.max_interval_seconds = 3600;

        let idle_normal = loader("IDLE_NORMAL", LoadStatus::Idle, Some(barely_due));

        let candidates = select_candidates(&[idle_normal, overdue_idle], now);
        assert_eq!(candidates[0].loader_code, "IDLE_OVERDUE");
    }

    #[test]
    fn nil_watermark_sorts_before_any_timestamp_within_same_priority() {
        let now = Utc::now();
        let old = now - ChronoDuration::seconds(7200);
        let loaders = vec![
            loader("HAS_TS", LoadStatus::Idle, Some(old)),
            loader("NO_TS", LoadStatus::Idle, None),
        ];
        let candidates = select_candidates(&loaders, now);
        assert_eq!(candidates[0].loader_code, "NO_TS");
    }
}
