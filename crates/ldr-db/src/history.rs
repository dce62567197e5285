//! `loader.load_history` persistence (spec §3 LoadHistory).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ldr_schemas::HistoryStatus;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct LoadHistoryRow {
    pub id: i64,
    pub loader_code: String,
    pub source_database_code: String,
    pub replica_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub query_from_time: Option<DateTime<Utc>>,
    pub query_to_time: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub records_loaded: Option<i64>,
    pub records_ingested: Option<i64>,
    pub error_message: Option<String>,
}

fn row_to_history(row: sqlx::postgres::PgRow) -> Result<LoadHistoryRow> {
    Ok(LoadHistoryRow {
        id: row.try_get("id")?,
        loader_code: row.try_get("loader_code")?,
        source_database_code: row.try_get("source_database_code")?,
        replica_name: row.try_get("replica_name")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        duration_seconds: row.try_get("duration_seconds")?,
        query_from_time: row.try_get("query_from_time")?,
        query_to_time: row.try_get("query_to_time")?,
        status: HistoryStatus::parse(&row.try_get::<String, _>("status")?)
            .ok_or_else(|| anyhow::anyhow!("invalid history status in row"))?,
        records_loaded: row.try_get("records_loaded")?,
        records_ingested: row.try_get("records_ingested")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Step 1 of the executor algorithm (§4.8): persist the preliminary RUNNING
/// record before any loader state mutation, so a crash before the final
/// write still leaves a trace.
pub async fn start(
    pool: &PgPool,
    loader_code: &str,
    source_database_code: &str,
    replica_name: &str,
    start_time: DateTime<Utc>,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        insert into loader.load_history
            (loader_code, source_database_code, replica_name, start_time, status)
        values ($1, $2, $3, $4, 'RUNNING')
        returning id
        "#,
    )
    .bind(loader_code)
    .bind(source_database_code)
    .bind(replica_name)
    .bind(start_time)
    .fetch_one(pool)
    .await
    .context("history::start failed")?;

    Ok(row.0)
}

#[allow(clippy::too_many_arguments)]
pub async fn finalize_success(
    pool: &PgPool,
    history_id: i64,
    end_time: DateTime<Utc>,
    query_from_time: DateTime<Utc>,
    query_to_time: DateTime<Utc>,
    records_loaded: i64,
    records_ingested: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        update loader.load_history
        set status = 'SUCCESS',
            end_time = $2,
            duration_seconds = extract(epoch from ($2 - start_time)),
            query_from_time = $3,
            query_to_time = $4,
            records_loaded = $5,
            records_ingested = $6
        where id = $1
        "#,
    )
    .bind(history_id)
    .bind(end_time)
    .bind(query_from_time)
    .bind(query_to_time)
    .bind(records_loaded)
    .bind(records_ingested)
    .execute(pool)
    .await
    .context("history::finalize_success failed")?;
    Ok(())
}

pub async fn finalize_failed(
    pool: &PgPool,
    history_id: i64,
    end_time: DateTime<Utc>,
    error_message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update loader.load_history
        set status = 'FAILED',
            end_time = $2,
            duration_seconds = extract(epoch from ($2 - start_time)),
            records_loaded = 0,
            records_ingested = 0,
            error_message = $3
        where id = $1
        "#,
    )
    .bind(history_id)
    .bind(end_time)
    .bind(error_message)
    .execute(pool)
    .await
    .context("history::finalize_failed failed")?;
    Ok(())
}

/// Latest history row for a loader with status RUNNING, used by C11's
/// hung-RUNNING detection (§4.10).
pub async fn latest_running(pool: &PgPool, loader_code: &str) -> Result<Option<LoadHistoryRow>> {
    let row = sqlx::query(
        r#"
        select id, loader_code, source_database_code, replica_name, start_time, end_time,
               duration_seconds, query_from_time, query_to_time, status,
               records_loaded, records_ingested, error_message
        from loader.load_history
        where loader_code = $1 and status = 'RUNNING'
        order by start_time desc
        limit 1
        "#,
    )
    .bind(loader_code)
    .fetch_optional(pool)
    .await
    .context("history::latest_running failed")?;

    row.map(row_to_history).transpose()
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub loader_code: Option<String>,
    pub status: Option<HistoryStatus>,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// Admin `queryHistory` (§6.4): filters are all optional, `limit` is clamped
/// to 1000 regardless of what the caller asked for.
pub async fn query_history(pool: &PgPool, q: &HistoryQuery) -> Result<Vec<LoadHistoryRow>> {
    let limit = q.limit.clamp(1, 1000);

    let rows = sqlx::query(
        r#"
        select id, loader_code, source_database_code, replica_name, start_time, end_time,
               duration_seconds, query_from_time, query_to_time, status,
               records_loaded, records_ingested, error_message
        from loader.load_history
        where ($1::text is null or loader_code = $1)
          and ($2::text is null or status = $2)
          and ($3::timestamptz is null or start_time >= $3)
          and ($4::timestamptz is null or start_time < $4)
        order by start_time desc
        limit $5
        "#,
    )
    .bind(&q.loader_code)
    .bind(q.status.map(|s| s.as_str()))
    .bind(q.from_time)
    .bind(q.to_time)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("history::query_history failed")?;

    rows.into_iter().map(row_to_history).collect()
}
