//! `loader.signals_history` persistence (spec §4.8 step 7).
//!
//! One function per `purgeStrategy`, mirroring the executor's three-way
//! branch exactly so the branch in `ldr-engine` is a straight dispatch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ldr_schemas::SignalRecord;
use sqlx::PgPool;

use crate::is_unique_violation;

/// `FAIL_ON_DUPLICATE`: straight insert; a duplicate key aborts the whole
/// batch (caller's transaction rolls back, whole execution fails).
pub async fn insert_fail_on_duplicate(pool: &PgPool, records: &[SignalRecord]) -> Result<()> {
    let mut tx = pool.begin().await.context("insert_fail_on_duplicate: begin tx failed")?;
    for r in records {
        let result = insert_one(&mut tx, r).await;
        if let Err(err) = &result {
            if is_unique_violation(err, "uq_signals_history_key") {
                tx.rollback().await.ok();
                anyhow::bail!(
                    "SINK_DUPLICATE: signal ({}, {}, {}) already exists",
                    r.loader_code,
                    r.load_timestamp,
                    r.segment_code
                );
            }
        }
        result.context("insert_fail_on_duplicate: insert failed")?;
    }
    tx.commit().await.context("insert_fail_on_duplicate: commit failed")?;
    Ok(())
}

/// `PURGE_AND_RELOAD`: delete existing rows of this loader within the
/// execution's window, then insert — all in one transaction.
pub async fn purge_and_reload(
    pool: &PgPool,
    loader_code: &str,
    window_from: DateTime<Utc>,
    window_to: DateTime<Utc>,
    records: &[SignalRecord],
) -> Result<()> {
    let mut tx = pool.begin().await.context("purge_and_reload: begin tx failed")?;

    sqlx::query(
        r#"
        delete from loader.signals_history
        where loader_code = $1
          and load_time_stamp >= $2 and load_time_stamp < $3
        "#,
    )
    .bind(loader_code)
    .bind(window_from.timestamp())
    .bind(window_to.timestamp())
    .execute(&mut *tx)
    .await
    .context("purge_and_reload: delete failed")?;

    for r in records {
        insert_one(&mut tx, r)
            .await
            .context("purge_and_reload: insert failed")?;
    }

    tx.commit().await.context("purge_and_reload: commit failed")?;
    Ok(())
}

/// `SKIP_DUPLICATES`: insert with duplicate-key ignore.
pub async fn insert_skip_duplicates(pool: &PgPool, records: &[SignalRecord]) -> Result<()> {
    let mut tx = pool.begin().await.context("insert_skip_duplicates: begin tx failed")?;
    for r in records {
        sqlx::query(
            r#"
            insert into loader.signals_history
                (loader_code, load_time_stamp, segment_code, rec_count, max_val, min_val, avg_val, sum_val)
            values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict on constraint uq_signals_history_key do nothing
            "#,
        )
        .bind(&r.loader_code)
        .bind(r.load_timestamp)
        .bind(r.segment_code.to_string())
        .bind(r.rec_count)
        .bind(r.max_val)
        .bind(r.min_val)
        .bind(r.avg_val)
        .bind(r.sum_val)
        .execute(&mut *tx)
        .await
        .context("insert_skip_duplicates: insert failed")?;
    }
    tx.commit().await.context("insert_skip_duplicates: commit failed")?;
    Ok(())
}

async fn insert_one(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    r: &SignalRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into loader.signals_history
            (loader_code, load_time_stamp, segment_code, rec_count, max_val, min_val, avg_val, sum_val)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&r.loader_code)
    .bind(r.load_timestamp)
    .bind(r.segment_code.to_string())
    .bind(r.rec_count)
    .bind(r.max_val)
    .bind(r.min_val)
    .bind(r.avg_val)
    .bind(r.sum_val)
    .execute(&mut **tx)
    .await
    .map(|_| ())
}
