//! Shared test fixtures for the signal-loader workspace.
//!
//! Scheduler/executor/lock property tests (spec §8) need a clock they can
//! move by hand and a source database they don't have to stand up Postgres
//! for. Neither fixture talks to a real driver — they exist purely so
//! `ldr-engine`/`ldr-lock` property tests can exercise time-dependent and
//! row-shaped behavior deterministically.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ldr_schemas::ColumnValue;
use tokio::sync::RwLock;

/// A clock callers can move by hand instead of sleeping real wall time.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    pub async fn now(&self) -> DateTime<Utc> {
        *self.now.read().await
    }

    pub async fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.write().await;
        *guard += delta;
    }

    pub async fn set(&self, value: DateTime<Utc>) {
        *self.now.write().await = value;
    }
}

/// One row of a fake source table, keyed by lower-cased column name —
/// matching the shape `ldr_db::sourcepool::run_query` produces from a real
/// driver, so `ldr-transform` tests exercise the same input type either way.
pub type FakeRow = BTreeMap<String, ColumnValue>;

/// An in-memory stand-in for a source database row set. Tests seed it with
/// rows and hand `rows()`/`rows_in_window()` straight to `ldr_transform::transform`.
#[derive(Clone, Default)]
pub struct FakeSourceDb {
    rows: Arc<RwLock<Vec<FakeRow>>>,
}

impl FakeSourceDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, row: FakeRow) {
        self.rows.write().await.push(row);
    }

    pub async fn rows(&self) -> Vec<FakeRow> {
        self.rows.read().await.clone()
    }

    /// Rows whose `timestamp_column` falls in the half-open `[from, to)`
    /// window — the shape a loader's SQL would filter by in a real source.
    pub async fn rows_in_window(
        &self,
        timestamp_column: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<FakeRow> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|row| match row.get(timestamp_column) {
                Some(ColumnValue::Timestamp(ts)) => *ts >= from && *ts < to,
                _ => false,
            })
            .cloned()
            .collect()
    }
}

/// Build a [`FakeRow`] from `(column, value)` pairs, lower-casing column
/// names the way a real driver's column metadata is normalized before
/// reaching `ldr-transform`.
pub fn fake_row(columns: &[(&str, ColumnValue)]) -> FakeRow {
    columns
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn clock_advances_by_requested_delta() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(start);
        clock.advance(chrono::Duration::hours(2)).await;
        assert_eq!(clock.now().await, start + chrono::Duration::hours(2));
    }

    #[tokio::test]
    async fn rows_in_window_excludes_boundary_to() {
        let db = FakeSourceDb::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        db.insert(fake_row(&[("ts", ColumnValue::Timestamp(t0))])).await;
        db.insert(fake_row(&[(
            "ts",
            ColumnValue::Timestamp(t0 + chrono::Duration::hours(1)),
        )]))
        .await;

        let rows = db.rows_in_window("ts", t0, t0 + chrono::Duration::hours(1)).await;
        assert_eq!(rows.len(), 1);
    }
}
