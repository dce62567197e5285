//! `loader.loader_execution_lock` persistence (spec §4.7, C8).
//!
//! The acquisition algorithm is the spec's pseudocode realised with option
//! (b): a `SELECT ... FOR UPDATE` on a per-loader sentinel row. Option (c)
//! — a unique partial index capping unreleased rows — cannot express an
//! arbitrary `maxParallel`, only `maxParallel = 1`; option (a), an advisory
//! lock keyed by a hash of `loaderCode`, is vulnerable to hash collisions
//! silently merging two unrelated loaders' serialisation domains. The
//! sentinel row is inserted lazily (`ON CONFLICT DO NOTHING`) so no admin
//! provisioning step is required before a loader's first execution attempt.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Attempt to acquire an execution lease for `loader_code`. Non-blocking:
/// the held-count check and the insert happen inside one transaction
/// serialised by the sentinel row, so no caller can observe a stale count.
pub async fn try_acquire(
    pool: &PgPool,
    loader_code: &str,
    max_parallel: i32,
    replica_name: &str,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await.context("try_acquire: begin tx failed")?;

    sqlx::query(
        "insert into loader.loader_lock_sentinel (loader_code) values ($1) on conflict do nothing",
    )
    .bind(loader_code)
    .execute(&mut *tx)
    .await
    .context("try_acquire: sentinel insert failed")?;

    sqlx::query("select loader_code from loader.loader_lock_sentinel where loader_code = $1 for update")
        .bind(loader_code)
        .fetch_one(&mut *tx)
        .await
        .context("try_acquire: sentinel row lock failed")?;

    let (held,): (i64,) = sqlx::query_as(
        "select count(*) from loader.loader_execution_lock where loader_code = $1 and released = false",
    )
    .bind(loader_code)
    .fetch_one(&mut *tx)
    .await
    .context("try_acquire: held-count query failed")?;

    if held >= max_parallel as i64 {
        tx.rollback().await.ok();
        return Ok(None);
    }

    let (lock_id,): (i64,) = sqlx::query_as(
        r#"
        insert into loader.loader_execution_lock (loader_code, replica_name, acquired_at, released)
        values ($1, $2, now(), false)
        returning id
        "#,
    )
    .bind(loader_code)
    .bind(replica_name)
    .fetch_one(&mut *tx)
    .await
    .context("try_acquire: lease insert failed")?;

    tx.commit().await.context("try_acquire: commit failed")?;
    Ok(Some(lock_id))
}

pub async fn release(pool: &PgPool, lock_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        update loader.loader_execution_lock
        set released = true, released_at = now()
        where id = $1 and released = false
        "#,
    )
    .bind(lock_id)
    .execute(pool)
    .await
    .context("release failed")?;
    Ok(())
}

/// Marks all unreleased leases older than `max_age` as released. Returns the
/// count reclaimed.
pub async fn reclaim_stale(pool: &PgPool, max_age_seconds: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update loader.loader_execution_lock
        set released = true, released_at = now()
        where released = false
          and now() - acquired_at >= make_interval(secs => $1)
        "#,
    )
    .bind(max_age_seconds as f64)
    .execute(pool)
    .await
    .context("reclaim_stale failed")?;

    Ok(result.rows_affected())
}

/// Whether `loader_code` currently has any unreleased lease — used by C11's
/// hung-RUNNING detection ("most recent lock has been released or
/// reclaimed", §4.10).
pub async fn has_unreleased_lease(pool: &PgPool, loader_code: &str) -> Result<bool> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from loader.loader_execution_lock where loader_code = $1 and released = false",
    )
    .bind(loader_code)
    .fetch_one(pool)
    .await
    .context("has_unreleased_lease failed")?;
    Ok(count > 0)
}

#[derive(Debug, Clone)]
pub struct LeaseRow {
    pub id: i64,
    pub loader_code: String,
    pub replica_name: String,
    pub acquired_at: DateTime<Utc>,
    pub released: bool,
}
