//! Load Executor (spec §4.8, C9).
//!
//! Runs the nine-step per-loader execution algorithm. The outer
//! [`LoadExecutor::execute`] never propagates a business-logic failure past
//! its own boundary: every error from decryption, the read-only guard,
//! placeholder substitution, the source query, or the transform is caught,
//! classified (`ldr-engine::errors`), and turned into a FAILED history row
//! instead of an `Err` — the top-level worker loop logs and continues
//! rather than letting one bad job take the process down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use ldr_crypto::EncryptionService;
use ldr_db::entities::Loader;
use ldr_schemas::PurgeStrategy;
use ldr_transform::SegmentDictionary;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::errors::ExecutionError;

pub struct LoadExecutor {
    central: PgPool,
    source_pool: Arc<ldr_db::sourcepool::SourcePool>,
    encryption: Arc<EncryptionService>,
    segment_dict: Arc<dyn SegmentDictionary>,
    lookback_hours: i64,
    query_timeout: Duration,
}

/// What happened, for the scheduler's logging — the executor itself always
/// returns `Ok`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub loader_code: String,
    pub history_id: i64,
    pub succeeded: bool,
    pub records_loaded: i64,
    pub skipped_degenerate_window: bool,
}

impl LoadExecutor {
    pub fn new(
        central: PgPool,
        source_pool: Arc<ldr_db::sourcepool::SourcePool>,
        encryption: Arc<EncryptionService>,
        segment_dict: Arc<dyn SegmentDictionary>,
        lookback_hours: i64,
        query_timeout: Duration,
    ) -> Self {
        Self {
            central,
            source_pool,
            encryption,
            segment_dict,
            lookback_hours,
            query_timeout,
        }
    }

    /// Run one execution attempt for `loader` under an already-acquired
    /// execution lease. `replica_ordinal` is the `:replicaId` substitution
    /// value (spec §4.5), distinct from `replica_name` (the `LoadHistory`
    /// attribution / lease owner).
    pub async fn execute(
        &self,
        loader: &Loader,
        replica_name: &str,
        replica_ordinal: u32,
    ) -> Result<ExecutionOutcome> {
        let start_time = Utc::now();

        // Step 1: persist the preliminary RUNNING record. A failure here is
        // a genuine infrastructure problem — it propagates, unlike every
        // later step.
        let history_id = ldr_db::history::start(
            &self.central,
            &loader.loader_code,
            &loader.source_database_code,
            replica_name,
            start_time,
        )
        .await
        .context("execute: failed to persist initial history row")?;

        // Step 2: IDLE|FAILED -> RUNNING.
        ldr_db::entities::mark_running(&self.central, &loader.loader_code)
            .await
            .context("execute: mark_running failed")?;

        match self.run_window(loader, replica_ordinal).await {
            Ok(RunResult::Executed { window, records_loaded, signals_empty }) => {
                let end_time = Utc::now();

                ldr_db::entities::mark_success(
                    &self.central,
                    &loader.loader_code,
                    window.to,
                    signals_empty,
                )
                .await
                .context("execute: mark_success failed")?;

                ldr_db::history::finalize_success(
                    &self.central,
                    history_id,
                    end_time,
                    window.from,
                    window.to,
                    records_loaded,
                    records_loaded,
                )
                .await
                .context("execute: finalize_success failed")?;

                info!(
                    loader_code = %loader.loader_code,
                    records_loaded,
                    "load execution succeeded"
                );

                Ok(ExecutionOutcome {
                    loader_code: loader.loader_code.clone(),
                    history_id,
                    succeeded: true,
                    records_loaded,
                    skipped_degenerate_window: false,
                })
            }
            Ok(RunResult::DegenerateWindow) => {
                // Step 7 edge case: nothing to do this tick. Treat as a
                // trivial success with zero records so the watermark and
                // status still settle back to IDLE.
                let end_time = Utc::now();
                ldr_db::entities::mark_success(&self.central, &loader.loader_code, start_time, true)
                    .await
                    .context("execute: mark_success (degenerate) failed")?;
                ldr_db::history::finalize_success(
                    &self.central,
                    history_id,
                    end_time,
                    start_time,
                    start_time,
                    0,
                    0,
                )
                .await
                .context("execute: finalize_success (degenerate) failed")?;

                Ok(ExecutionOutcome {
                    loader_code: loader.loader_code.clone(),
                    history_id,
                    succeeded: true,
                    records_loaded: 0,
                    skipped_degenerate_window: true,
                })
            }
            Err(err) => {
                let classified = ExecutionError::classify(&err);
                let end_time = Utc::now();

                warn!(
                    loader_code = %loader.loader_code,
                    error = %classified,
                    "load execution failed"
                );

                ldr_db::entities::mark_failed(&self.central, &loader.loader_code)
                    .await
                    .context("execute: mark_failed failed")?;

                ldr_db::history::finalize_failed(&self.central, history_id, end_time, &classified.render())
                    .await
                    .context("execute: finalize_failed failed")?;

                Ok(ExecutionOutcome {
                    loader_code: loader.loader_code.clone(),
                    history_id,
                    succeeded: false,
                    records_loaded: 0,
                    skipped_degenerate_window: false,
                })
            }
        }
    }

    /// Steps 3-7: everything that can fail with a business-logic error.
    /// Isolated from `execute` so that function's `Ok`/`Err` split maps
    /// directly onto "persisted successfully" vs. "classify and record".
    async fn run_window(&self, loader: &Loader, replica_ordinal: u32) -> Result<RunResult> {
        let now = Utc::now();

        let window = ldr_window::calculate(
            now,
            loader.last_load_timestamp,
            loader.max_query_period_seconds as i64,
            self.lookback_hours,
        )
        .context("execute: window calculation failed")?;

        if window.is_degenerate() {
            return Ok(RunResult::DegenerateWindow);
        }

        let sql = self
            .encryption
            .decrypt(&loader.loader_sql_encrypted)
            .context("execute: loader SQL decrypt failed")?;

        ldr_sql::ensure_read_only(&sql)?;

        let rendered_sql = ldr_sql::replace(
            &sql,
            &window,
            replica_ordinal,
            loader.source_timezone_offset_hours,
        )?;

        let rows = self
            .source_pool
            .run_query(&loader.source_database_code, &rendered_sql, Some(self.query_timeout))
            .await?;

        let signals_empty = rows.is_empty();

        let (records, report) =
            ldr_transform::transform(&loader.loader_code, &rows, self.segment_dict.as_ref()).await?;

        if report.rows_with_degraded_fields > 0 {
            warn!(
                loader_code = %loader.loader_code,
                degraded = report.rows_with_degraded_fields,
                "some rows had non-fatal field coercion failures"
            );
        }

        match loader.purge_strategy {
            PurgeStrategy::FailOnDuplicate => {
                ldr_db::signals::insert_fail_on_duplicate(&self.central, &records).await?
            }
            PurgeStrategy::PurgeAndReload => {
                ldr_db::signals::purge_and_reload(
                    &self.central,
                    &loader.loader_code,
                    window.from,
                    window.to,
                    &records,
                )
                .await?
            }
            PurgeStrategy::SkipDuplicates => {
                ldr_db::signals::insert_skip_duplicates(&self.central, &records).await?
            }
        }

        Ok(RunResult::Executed {
            window,
            records_loaded: records.len() as i64,
            signals_empty,
        })
    }
}

enum RunResult {
    Executed {
        window: ldr_schemas::TimeWindow,
        records_loaded: i64,
        signals_empty: bool,
    },
    DegenerateWindow,
}
