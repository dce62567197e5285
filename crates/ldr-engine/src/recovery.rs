//! Failure Recovery (spec §4.10, C11).
//!
//! Runs on the scheduler's recovery tick. Two independent resets; stale lock
//! reclamation itself lives on its own tick and is driven straight off
//! [`ldr_lock::LockService::reclaim_stale`] from `scheduler.rs`.

use anyhow::Result;
use ldr_lock::LockService;
use sqlx::PgPool;
use tracing::{info, warn};

const HUNG_ERROR_MESSAGE: &str = "execution timed out; replica dead";

pub async fn run_recovery_tick(
    pool: &PgPool,
    lock_service: &dyn LockService,
    failed_threshold_seconds: i64,
    hung_threshold_seconds: i64,
) -> Result<()> {
    let recovered = ldr_db::entities::recover_failed_loaders(pool, failed_threshold_seconds).await?;
    if recovered > 0 {
        info!(recovered, "reset long-FAILED loaders back to IDLE");
    }

    reset_hung_running(pool, lock_service, hung_threshold_seconds).await?;

    Ok(())
}

/// Loaders stuck RUNNING whose lock is gone and whose latest RUNNING history
/// predates `hung_threshold_seconds` are forced to FAILED so the next
/// recovery tick can reclaim them normally.
async fn reset_hung_running(
    pool: &PgPool,
    lock_service: &dyn LockService,
    hung_threshold_seconds: i64,
) -> Result<()> {
    let running = ldr_db::entities::list_by_status(pool, ldr_schemas::LoadStatus::Running).await?;

    for loader in running {
        if lock_service.has_unreleased_lease(&loader.loader_code).await? {
            continue;
        }

        let Some(latest) = ldr_db::history::latest_running(pool, &loader.loader_code).await? else {
            continue;
        };

        let age_seconds = (chrono::Utc::now() - latest.start_time).num_seconds();
        if age_seconds < hung_threshold_seconds {
            continue;
        }

        ldr_db::entities::reset_hung_running(pool, &loader.loader_code).await?;
        ldr_db::history::finalize_failed(pool, latest.id, chrono::Utc::now(), HUNG_ERROR_MESSAGE).await?;

        warn!(
            loader_code = %loader.loader_code,
            age_seconds,
            "forced hung RUNNING loader to FAILED"
        );
    }

    Ok(())
}
