//! Source DB Pool Manager (spec §4.2, C2).
//!
//! Maintains one connection pool per `dbCode`, memoised behind a checksum of
//! the connection-relevant fields so an admin edit to a `SourceDatabase` row
//! is picked up on the next use instead of requiring a restart.
//!
//! Only `POSTGRES` is wired to a real driver: the workspace only carries
//! `sqlx`'s `postgres` feature (see root `Cargo.toml` / DESIGN.md). `MYSQL`
//! and `ORACLE` rows are accepted by the schema but fail pool construction
//! with `SOURCE_UNAVAILABLE` until a driver is added — this mirrors the
//! spec's open question about source driver coverage rather than guessing
//! at a wire protocol.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use ldr_crypto::EncryptionService;
use ldr_schemas::ColumnValue;
use sqlx::{postgres::PgPoolOptions, Column, PgPool, Row, TypeInfo};
use tokio::sync::RwLock;

use crate::sourcedb::{self, SourceDatabase};

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

struct PoolEntry {
    pool: PgPool,
    checksum: u64,
}

pub struct SourcePool {
    central: PgPool,
    encryption: Arc<EncryptionService>,
    pools: RwLock<HashMap<String, PoolEntry>>,
}

impl SourcePool {
    pub fn new(central: PgPool, encryption: Arc<EncryptionService>) -> Self {
        Self {
            central,
            encryption,
            pools: RwLock::new(HashMap::new()),
        }
    }

    async fn pool_for(&self, db_code: &str) -> Result<PgPool> {
        let record = sourcedb::fetch_by_code(&self.central, db_code)
            .await?
            .ok_or_else(|| anyhow::anyhow!("SOURCE_UNAVAILABLE: unknown source db '{db_code}'"))?;

        let checksum = record.checksum();

        if let Some(entry) = self.pools.read().await.get(db_code) {
            if entry.checksum == checksum {
                return Ok(entry.pool.clone());
            }
        }

        let pool = self.build_pool(&record).await?;

        self.pools.write().await.insert(
            db_code.to_string(),
            PoolEntry {
                pool: pool.clone(),
                checksum,
            },
        );

        Ok(pool)
    }

    async fn build_pool(&self, record: &SourceDatabase) -> Result<PgPool> {
        if !record.db_type.eq_ignore_ascii_case("postgres") {
            bail!(
                "SOURCE_UNAVAILABLE: db_type '{}' has no compiled driver (dbCode={})",
                record.db_type,
                record.db_code
            );
        }

        let password = self
            .encryption
            .decrypt(&record.pass_word_encrypted)
            .map_err(|e| anyhow::anyhow!("SOURCE_UNAVAILABLE: password decrypt failed: {e}"))?;

        let url = format!(
            "postgres://{}:{}@{}:{}/{}",
            urlencode(&record.user_name),
            urlencode(&password),
            record.ip,
            record.port,
            record.db_name
        );

        PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| anyhow::anyhow!("SOURCE_UNAVAILABLE: failed to open pool for {}: {e}", record.db_code))
    }

    /// Run a read-only query against `db_code`, materialising every row as a
    /// `{columnNameLower -> value}` map. `timeout` defaults to
    /// [`DEFAULT_QUERY_TIMEOUT_SECS`] when `None`.
    pub async fn run_query(
        &self,
        db_code: &str,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<BTreeMap<String, ColumnValue>>> {
        let pool = self.pool_for(db_code).await?;
        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS));

        let fut = sqlx::query(sql).fetch_all(&pool);
        let rows = match tokio::time::timeout(timeout, fut).await {
            Err(_) => bail!("QUERY_TIMEOUT: query against '{db_code}' exceeded {timeout:?}"),
            Ok(Err(e)) => bail!("QUERY_ERROR: {e}"),
            Ok(Ok(rows)) => rows,
        };

        rows.into_iter().map(row_to_map).collect()
    }
}

fn row_to_map(row: sqlx::postgres::PgRow) -> Result<BTreeMap<String, ColumnValue>> {
    let mut out = BTreeMap::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_ascii_lowercase();
        let value = decode_column(&row, i, col.type_info().name())?;
        out.insert(name, value);
    }
    Ok(out)
}

fn decode_column(row: &sqlx::postgres::PgRow, i: usize, type_name: &str) -> Result<ColumnValue> {
    use sqlx::ValueRef;

    let raw = row.try_get_raw(i)?;
    if raw.is_null() {
        return Ok(ColumnValue::Null);
    }

    let value = match type_name {
        "INT2" | "INT4" | "INT8" => ColumnValue::Int(row.try_get::<i64, _>(i).or_else(|_| {
            row.try_get::<i32, _>(i).map(i64::from)
        })?),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => ColumnValue::Float(row.try_get::<f64, _>(i)?),
        "BOOL" => ColumnValue::Bool(row.try_get::<bool, _>(i)?),
        "TIMESTAMPTZ" | "TIMESTAMP" => {
            let ts: DateTime<Utc> = row.try_get(i)?;
            ColumnValue::Timestamp(ts)
        }
        _ => ColumnValue::Text(row.try_get::<String, _>(i)?),
    };
    Ok(value)
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
