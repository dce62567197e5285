//! Request and response types for all ldr-daemon HTTP endpoints.
//!
//! JSON field names follow the external naming spec.md §3 uses
//! (`loaderCode`, `loadStatus`, ...) via `rename_all = "camelCase"`, even
//! though the Rust-side entities in `ldr-db` are snake_case — these structs
//! are the one place the two naming conventions meet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub replica_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// `GET /v1/loaders/:code` response (spec §3 Loader, externally visible
/// subset — `id` and `loaderSql` are internal/sensitive and never surfaced).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderResponse {
    pub loader_code: String,
    pub source_database_code: String,
    pub load_status: &'static str,
    pub enabled: bool,
    pub approval_status: &'static str,
    pub min_interval_seconds: i32,
    pub max_interval_seconds: i32,
    pub max_query_period_seconds: i32,
    pub max_parallel_executions: i32,
    pub last_load_timestamp: Option<DateTime<Utc>>,
    pub source_timezone_offset_hours: i32,
    pub aggregation_period_seconds: Option<i32>,
    pub purge_strategy: &'static str,
    pub failed_since: Option<DateTime<Utc>>,
    pub consecutive_zero_record_runs: i64,
}

impl From<&ldr_db::entities::Loader> for LoaderResponse {
    fn from(l: &ldr_db::entities::Loader) -> Self {
        Self {
            loader_code: l.loader_code.clone(),
            source_database_code: l.source_database_code.clone(),
            load_status: l.load_status.as_str(),
            enabled: l.enabled,
            approval_status: l.approval_status.as_str(),
            min_interval_seconds: l.min_interval_seconds,
            max_interval_seconds: l.max_interval_seconds,
            max_query_period_seconds: l.max_query_period_seconds,
            max_parallel_executions: l.max_parallel_executions,
            last_load_timestamp: l.last_load_timestamp,
            source_timezone_offset_hours: l.source_timezone_offset_hours,
            aggregation_period_seconds: l.aggregation_period_seconds,
            purge_strategy: l.purge_strategy.as_str(),
            failed_since: l.failed_since,
            consecutive_zero_record_runs: l.consecutive_zero_record_runs,
        }
    }
}

/// `PATCH /v1/loaders/:code` request body (spec §6.4: non-runtime fields
/// only). Every field optional; absent fields are left unchanged.
/// `loaderSql` arrives as plaintext and is encrypted by the handler before
/// it reaches `ldr-db`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderPatchRequest {
    pub loader_sql: Option<String>,
    pub min_interval_seconds: Option<i32>,
    pub max_interval_seconds: Option<i32>,
    pub max_query_period_seconds: Option<i32>,
    pub max_parallel_executions: Option<i32>,
    pub source_timezone_offset_hours: Option<i32>,
    pub aggregation_period_seconds: Option<i32>,
    pub purge_strategy: Option<String>,
}

/// `POST /v1/loaders/:code/adjust-timestamp` request body (spec §6.4):
/// `timestamp: null` or an absent field both clear the watermark.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdjustTimestampRequest {
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `GET /v1/history` query parameters (spec §6.4 `queryHistory`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQueryParams {
    pub loader_code: Option<String>,
    pub status: Option<String>,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadHistoryResponse {
    pub id: i64,
    pub loader_code: String,
    pub source_database_code: String,
    pub replica_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub query_from_time: Option<DateTime<Utc>>,
    pub query_to_time: Option<DateTime<Utc>>,
    pub status: &'static str,
    pub records_loaded: Option<i64>,
    pub records_ingested: Option<i64>,
    pub error_message: Option<String>,
}

impl From<&ldr_db::history::LoadHistoryRow> for LoadHistoryResponse {
    fn from(h: &ldr_db::history::LoadHistoryRow) -> Self {
        Self {
            id: h.id,
            loader_code: h.loader_code.clone(),
            source_database_code: h.source_database_code.clone(),
            replica_name: h.replica_name.clone(),
            start_time: h.start_time,
            end_time: h.end_time,
            duration_seconds: h.duration_seconds,
            query_from_time: h.query_from_time,
            query_to_time: h.query_to_time,
            status: h.status.as_str(),
            records_loaded: h.records_loaded,
            records_ingested: h.records_ingested,
            error_message: h.error_message.clone(),
        }
    }
}
