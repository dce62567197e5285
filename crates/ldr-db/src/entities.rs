//! `loader.loader` persistence (spec §3 Loader, §6.4 admin boundary).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use ldr_schemas::{ApprovalStatus, LoadStatus, PurgeStrategy};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct Loader {
    pub id: i64,
    pub loader_code: String,
    pub loader_sql_encrypted: String,
    pub source_database_code: String,
    pub load_status: LoadStatus,
    pub enabled: bool,
    pub approval_status: ApprovalStatus,
    pub min_interval_seconds: i32,
    pub max_interval_seconds: i32,
    pub max_query_period_seconds: i32,
    pub max_parallel_executions: i32,
    pub last_load_timestamp: Option<DateTime<Utc>>,
    pub source_timezone_offset_hours: i32,
    pub aggregation_period_seconds: Option<i32>,
    pub purge_strategy: PurgeStrategy,
    pub failed_since: Option<DateTime<Utc>>,
    pub consecutive_zero_record_runs: i64,
}

fn row_to_loader(row: sqlx::postgres::PgRow) -> Result<Loader> {
    Ok(Loader {
        id: row.try_get("id")?,
        loader_code: row.try_get("loader_code")?,
        loader_sql_encrypted: row.try_get("loader_sql")?,
        source_database_code: row.try_get("source_database_code")?,
        load_status: LoadStatus::parse(&row.try_get::<String, _>("load_status")?)
            .ok_or_else(|| anyhow!("invalid load_status in row"))?,
        enabled: row.try_get("enabled")?,
        approval_status: ApprovalStatus::parse(&row.try_get::<String, _>("approval_status")?)
            .ok_or_else(|| anyhow!("invalid approval_status in row"))?,
        min_interval_seconds: row.try_get("min_interval_seconds")?,
        max_interval_seconds: row.try_get("max_interval_seconds")?,
        max_query_period_seconds: row.try_get("max_query_period_seconds")?,
        max_parallel_executions: row.try_get("max_parallel_executions")?,
        last_load_timestamp: row.try_get("last_load_timestamp")?,
        source_timezone_offset_hours: row.try_get("source_timezone_offset_hours")?,
        aggregation_period_seconds: row.try_get("aggregation_period_seconds")?,
        purge_strategy: PurgeStrategy::parse(&row.try_get::<String, _>("purge_strategy")?)
            .ok_or_else(|| anyhow!("invalid purge_strategy in row"))?,
        failed_since: row.try_get("failed_since")?,
        consecutive_zero_record_runs: row.try_get("consecutive_zero_record_runs")?,
    })
}

const SELECT_COLUMNS: &str = r#"
    id, loader_code, loader_sql, source_database_code, load_status, enabled,
    approval_status, min_interval_seconds, max_interval_seconds,
    max_query_period_seconds, max_parallel_executions, last_load_timestamp,
    source_timezone_offset_hours, aggregation_period_seconds, purge_strategy,
    failed_since, consecutive_zero_record_runs
"#;

pub async fn fetch_by_code(pool: &PgPool, loader_code: &str) -> Result<Option<Loader>> {
    let row = sqlx::query(&format!(
        "select {SELECT_COLUMNS} from loader.loader where loader_code = $1"
    ))
    .bind(loader_code)
    .fetch_optional(pool)
    .await
    .context("fetch_by_code failed")?;

    row.map(row_to_loader).transpose()
}

/// Lock the loader row for the duration of the caller's transaction (§6.4:
/// admin writes and executor status transitions must not race each other).
pub async fn fetch_for_update(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    loader_code: &str,
) -> Result<Option<Loader>> {
    let row = sqlx::query(&format!(
        "select {SELECT_COLUMNS} from loader.loader where loader_code = $1 for update"
    ))
    .bind(loader_code)
    .fetch_optional(&mut **tx)
    .await
    .context("fetch_for_update failed")?;

    row.map(row_to_loader).transpose()
}

/// Scheduler's candidate fetch (§4.9 step 1): all enabled loaders. Further
/// filtering (approval, status, interval) happens in `ldr-engine` so this
/// crate stays a thin persistence layer.
pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Loader>> {
    let rows = sqlx::query(&format!(
        "select {SELECT_COLUMNS} from loader.loader where enabled = true"
    ))
    .fetch_all(pool)
    .await
    .context("list_enabled failed")?;

    rows.into_iter().map(row_to_loader).collect()
}

pub async fn list_by_status(pool: &PgPool, status: LoadStatus) -> Result<Vec<Loader>> {
    let rows = sqlx::query(&format!(
        "select {SELECT_COLUMNS} from loader.loader where load_status = $1"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await
    .context("list_by_status failed")?;

    rows.into_iter().map(row_to_loader).collect()
}

/// Executor transition: IDLE|FAILED -> RUNNING.
pub async fn mark_running(pool: &PgPool, loader_code: &str) -> Result<()> {
    sqlx::query(
        r#"
        update loader.loader
        set load_status = 'RUNNING', updated_at = now()
        where loader_code = $1
        "#,
    )
    .bind(loader_code)
    .execute(pool)
    .await
    .context("mark_running failed")?;
    Ok(())
}

/// Executor transition: RUNNING -> IDLE, on successful execution.
#[allow(clippy::too_many_arguments)]
pub async fn mark_success(
    pool: &PgPool,
    loader_code: &str,
    new_watermark: DateTime<Utc>,
    signals_empty: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        update loader.loader
        set load_status = 'IDLE',
            failed_since = null,
            last_load_timestamp = $2,
            consecutive_zero_record_runs = case when $3 then consecutive_zero_record_runs + 1 else 0 end,
            updated_at = now()
        where loader_code = $1
        "#,
    )
    .bind(loader_code)
    .bind(new_watermark)
    .bind(signals_empty)
    .execute(pool)
    .await
    .context("mark_success failed")?;
    Ok(())
}

/// Executor transition: RUNNING -> FAILED. `failed_since` is set only if not
/// already set, so repeated failures don't reset the recovery clock.
pub async fn mark_failed(pool: &PgPool, loader_code: &str) -> Result<()> {
    sqlx::query(
        r#"
        update loader.loader
        set load_status = 'FAILED',
            failed_since = coalesce(failed_since, now()),
            updated_at = now()
        where loader_code = $1
        "#,
    )
    .bind(loader_code)
    .execute(pool)
    .await
    .context("mark_failed failed")?;
    Ok(())
}

/// Recovery (C11): FAILED -> IDLE after `failedThresholdSeconds`.
pub async fn recover_failed_loaders(pool: &PgPool, threshold_seconds: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update loader.loader
        set load_status = 'IDLE', failed_since = null, updated_at = now()
        where load_status = 'FAILED'
          and failed_since is not null
          and now() - failed_since >= make_interval(secs => $1)
        "#,
    )
    .bind(threshold_seconds as f64)
    .execute(pool)
    .await
    .context("recover_failed_loaders failed")?;
    Ok(result.rows_affected())
}

/// Recovery (C11): force RUNNING -> FAILED for loaders whose lock is gone and
/// whose latest RUNNING history predates `hung_threshold_seconds`.
pub async fn reset_hung_running(pool: &PgPool, loader_code: &str) -> Result<()> {
    sqlx::query(
        r#"
        update loader.loader
        set load_status = 'FAILED', failed_since = coalesce(failed_since, now()), updated_at = now()
        where loader_code = $1 and load_status = 'RUNNING'
        "#,
    )
    .bind(loader_code)
    .execute(pool)
    .await
    .context("reset_hung_running failed")?;
    Ok(())
}

/// Admin `pause(loaderCode)` (§6.4): takes a row lock, sets PAUSED
/// unconditionally of current status (pausing is always allowed).
pub async fn pause(pool: &PgPool, loader_code: &str) -> Result<()> {
    let mut tx = pool.begin().await.context("pause: begin tx failed")?;
    let existing = fetch_for_update(&mut tx, loader_code)
        .await?
        .ok_or_else(|| anyhow!("loader not found: {loader_code}"))?;
    let _ = existing;

    sqlx::query("update loader.loader set load_status = 'PAUSED', updated_at = now() where loader_code = $1")
        .bind(loader_code)
        .execute(&mut *tx)
        .await
        .context("pause update failed")?;

    tx.commit().await.context("pause: commit failed")?;
    Ok(())
}

/// Admin `resume(loaderCode)` (§6.4): rejects if current status isn't PAUSED.
pub async fn resume(pool: &PgPool, loader_code: &str) -> Result<()> {
    let mut tx = pool.begin().await.context("resume: begin tx failed")?;
    let existing = fetch_for_update(&mut tx, loader_code)
        .await?
        .ok_or_else(|| anyhow!("loader not found: {loader_code}"))?;

    if existing.load_status != LoadStatus::Paused {
        return Err(anyhow!(
            "resume rejected: loader {loader_code} is {:?}, not PAUSED",
            existing.load_status
        ));
    }

    sqlx::query("update loader.loader set load_status = 'IDLE', updated_at = now() where loader_code = $1")
        .bind(loader_code)
        .execute(&mut *tx)
        .await
        .context("resume update failed")?;

    tx.commit().await.context("resume: commit failed")?;
    Ok(())
}

/// Non-runtime fields an admin caller may update via `PATCH /v1/loaders/:code`
/// (§6.4). Every field is optional; absent fields keep their current value.
/// `loader_sql_encrypted` is already ciphertext — the daemon encrypts the
/// plaintext SQL it received before calling this, so this crate never
/// handles a loader SQL plaintext itself.
#[derive(Debug, Clone, Default)]
pub struct LoaderDefinitionPatch {
    pub loader_sql_encrypted: Option<String>,
    pub min_interval_seconds: Option<i32>,
    pub max_interval_seconds: Option<i32>,
    pub max_query_period_seconds: Option<i32>,
    pub max_parallel_executions: Option<i32>,
    pub source_timezone_offset_hours: Option<i32>,
    pub aggregation_period_seconds: Option<i32>,
    pub purge_strategy: Option<PurgeStrategy>,
}

/// Admin `update(loaderCode, ...)` (§6.4): updates non-runtime fields only
/// (scheduling, windowing, SQL text, purge policy) — never `loadStatus`,
/// `approvalStatus`, or `lastLoadTimestamp`, which are owned by the executor
/// or the (out-of-scope) approval workflow respectively. Takes the same
/// short row lock as `pause`/`resume` so it cannot race a concurrent
/// executor status transition.
pub async fn update_definition(pool: &PgPool, loader_code: &str, patch: &LoaderDefinitionPatch) -> Result<()> {
    let mut tx = pool.begin().await.context("update_definition: begin tx failed")?;
    fetch_for_update(&mut tx, loader_code)
        .await?
        .ok_or_else(|| anyhow!("loader not found: {loader_code}"))?;

    sqlx::query(
        r#"
        update loader.loader
        set loader_sql = coalesce($2, loader_sql),
            min_interval_seconds = coalesce($3, min_interval_seconds),
            max_interval_seconds = coalesce($4, max_interval_seconds),
            max_query_period_seconds = coalesce($5, max_query_period_seconds),
            max_parallel_executions = coalesce($6, max_parallel_executions),
            source_timezone_offset_hours = coalesce($7, source_timezone_offset_hours),
            aggregation_period_seconds = coalesce($8, aggregation_period_seconds),
            purge_strategy = coalesce($9, purge_strategy),
            updated_at = now()
        where loader_code = $1
        "#,
    )
    .bind(loader_code)
    .bind(&patch.loader_sql_encrypted)
    .bind(patch.min_interval_seconds)
    .bind(patch.max_interval_seconds)
    .bind(patch.max_query_period_seconds)
    .bind(patch.max_parallel_executions)
    .bind(patch.source_timezone_offset_hours)
    .bind(patch.aggregation_period_seconds)
    .bind(patch.purge_strategy.map(|p| p.as_str()))
    .execute(&mut *tx)
    .await
    .context("update_definition: update failed")?;

    tx.commit().await.context("update_definition: commit failed")?;
    Ok(())
}

/// Admin `adjustTimestamp(loaderCode, newTimestamp?)` (§6.4): re-seed or
/// reprocess by moving the watermark, or clearing it with `None`.
pub async fn adjust_timestamp(
    pool: &PgPool,
    loader_code: &str,
    new_timestamp: Option<DateTime<Utc>>,
) -> Result<()> {
    let mut tx = pool.begin().await.context("adjust_timestamp: begin tx failed")?;
    fetch_for_update(&mut tx, loader_code)
        .await?
        .ok_or_else(|| anyhow!("loader not found: {loader_code}"))?;

    sqlx::query("update loader.loader set last_load_timestamp = $2, updated_at = now() where loader_code = $1")
        .bind(loader_code)
        .bind(new_timestamp)
        .execute(&mut *tx)
        .await
        .context("adjust_timestamp update failed")?;

    tx.commit().await.context("adjust_timestamp: commit failed")?;
    Ok(())
}
