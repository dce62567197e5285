//! Row Transformer (spec §4.6, C6).
//!
//! Maps heterogeneous source rows into canonical `SignalRecord`s, resolving
//! each row's segment tuple to a dense integer code through a
//! [`SegmentDictionary`] (C7) the caller supplies — this crate never talks to
//! a database directly.
//!
//! Only the timestamp resolution (presence of a recognised column, and
//! parseability of its value) is a hard failure, exactly as spec'd: any
//! other per-row coercion problem (an aggregate column that isn't numeric, a
//! segment column missing) degrades that field to `null` and is counted in
//! the returned [`TransformReport`] rather than aborting the whole batch —
//! a quality-gate ingestion posture the distilled spec doesn't forbid.

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use ldr_schemas::{ColumnValue, SegmentKey, SignalRecord};
use std::collections::BTreeMap;

/// Case-insensitive candidate column names for the timestamp, in priority
/// order — first hit wins.
const TIMESTAMP_CANDIDATES: &[&str] = &["timestamp", "ts", "time", "load_time_stamp"];

/// Beyond this magnitude an integer timestamp is assumed to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000; // 10^11

pub type SourceRow = BTreeMap<String, ColumnValue>;

/// Resolves a loader's segment 10-tuple to a dense per-loader integer code.
///
/// Implementations must be atomic: the first caller to see a given tuple
/// wins and every subsequent caller for the same tuple gets the same code
/// back (spec §4.6 step 4 / §3 SegmentDictionary invariant).
#[async_trait::async_trait]
pub trait SegmentDictionary {
    async fn get_or_create_code(&self, loader_code: &str, key: &SegmentKey) -> Result<i64>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub rows_in: u64,
    pub rows_ok: u64,
    /// Rows where a non-fatal field (aggregate, segment) failed to coerce
    /// and was set to `null` instead.
    pub rows_with_degraded_fields: u64,
}

/// Transform a batch of source rows into signal records.
///
/// Empty input yields an empty output — the transformer never fails on an
/// empty row set (spec §4.6).
pub async fn transform(
    loader_code: &str,
    rows: &[SourceRow],
    dict: &dyn SegmentDictionary,
) -> Result<(Vec<SignalRecord>, TransformReport)> {
    let mut out = Vec::with_capacity(rows.len());
    let mut report = TransformReport::default();

    for row in rows {
        report.rows_in += 1;
        let load_timestamp = resolve_timestamp(row)?;

        let mut degraded = false;
        let key = extract_segment_key(row);
        let segment_code = dict.get_or_create_code(loader_code, &key).await?;

        let rec_count = get_numeric_i64(row, "rec_count", &mut degraded);
        let max_val = get_numeric_f64(row, "max_val", &mut degraded);
        let min_val = get_numeric_f64(row, "min_val", &mut degraded);
        let avg_val = get_numeric_f64(row, "avg_val", &mut degraded);
        let sum_val = get_numeric_f64(row, "sum_val", &mut degraded);

        if degraded {
            report.rows_with_degraded_fields += 1;
        }
        report.rows_ok += 1;

        out.push(SignalRecord {
            loader_code: loader_code.to_string(),
            load_timestamp,
            segment_code,
            rec_count,
            max_val,
            min_val,
            avg_val,
            sum_val,
        });
    }

    Ok((out, report))
}

fn find_ci<'a>(row: &'a SourceRow, name: &str) -> Option<&'a ColumnValue> {
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Resolve + normalise the timestamp column. Fails the whole transform with
/// `TRANSFORM_MISSING_TIMESTAMP`/`TRANSFORM_BAD_TIMESTAMP` per spec — this is
/// the one hard failure in an otherwise best-effort row mapping.
fn resolve_timestamp(row: &SourceRow) -> Result<i64> {
    let value = TIMESTAMP_CANDIDATES
        .iter()
        .find_map(|c| find_ci(row, c))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "TRANSFORM_MISSING_TIMESTAMP: none of {:?} present in row",
                TIMESTAMP_CANDIDATES
            )
        })?;

    match value {
        ColumnValue::Int(i) => Ok(normalise_epoch(*i)),
        ColumnValue::Float(f) => Ok(normalise_epoch(*f as i64)),
        ColumnValue::Timestamp(ts) => Ok(ts.timestamp()),
        ColumnValue::Text(s) => parse_timestamp_string(s),
        ColumnValue::Bool(_) | ColumnValue::Null => {
            bail!("TRANSFORM_BAD_TIMESTAMP: timestamp column has no usable value")
        }
    }
}

fn normalise_epoch(raw: i64) -> i64 {
    if raw.abs() > MILLIS_THRESHOLD {
        raw / 1000
    } else {
        raw
    }
}

fn parse_timestamp_string(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(normalise_epoch(seconds));
    }
    if let Ok(seconds_f) = trimmed.parse::<f64>() {
        return Ok(normalise_epoch(seconds_f as i64));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc).timestamp());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive).timestamp());
    }
    bail!("TRANSFORM_BAD_TIMESTAMP: unparseable timestamp string '{trimmed}'")
}

fn extract_segment_key(row: &SourceRow) -> SegmentKey {
    let seg = |n: &str| find_ci(row, n).and_then(|v| v.as_str().map(str::to_string));
    SegmentKey {
        seg1: seg("segment_1"),
        seg2: seg("segment_2"),
        seg3: seg("segment_3"),
        seg4: seg("segment_4"),
        seg5: seg("segment_5"),
        seg6: seg("segment_6"),
        seg7: seg("segment_7"),
        seg8: seg("segment_8"),
        seg9: seg("segment_9"),
        seg10: seg("segment_10"),
    }
}

fn get_numeric_f64(row: &SourceRow, name: &str, degraded: &mut bool) -> Option<f64> {
    match find_ci(row, name) {
        None | Some(ColumnValue::Null) => None,
        Some(v) => {
            let coerced = v.as_f64();
            if coerced.is_none() {
                *degraded = true;
            }
            coerced
        }
    }
}

fn get_numeric_i64(row: &SourceRow, name: &str, degraded: &mut bool) -> Option<i64> {
    match find_ci(row, name) {
        None | Some(ColumnValue::Null) => None,
        Some(v) => {
            let coerced = v.as_i64();
            if coerced.is_none() {
                *degraded = true;
            }
            coerced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeDict {
        codes: Mutex<HashMap<(String, SegmentKey), i64>>,
    }

    impl FakeDict {
        fn new() -> Self {
            Self {
                codes: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SegmentDictionary for FakeDict {
        async fn get_or_create_code(&self, loader_code: &str, key: &SegmentKey) -> Result<i64> {
            let mut codes = self.codes.lock().unwrap();
            let next = codes.len() as i64 + 1;
            let entry = codes
                .entry((loader_code.to_string(), key.clone()))
                .or_insert(next);
            Ok(*entry)
        }
    }

    fn row(pairs: &[(&str, ColumnValue)]) -> SourceRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn s1_maps_rows_and_reuses_segment_codes() {
        let dict = FakeDict::new();
        let rows = vec![
            row(&[
                ("timestamp", ColumnValue::Int(1_736_942_400)),
                ("segment_1", ColumnValue::Text("A".into())),
            ]),
            row(&[
                ("timestamp", ColumnValue::Int(1_736_946_000)),
                ("segment_1", ColumnValue::Text("B".into())),
            ]),
            row(&[
                ("timestamp", ColumnValue::Int(1_736_949_600)),
                ("segment_1", ColumnValue::Text("A".into())),
            ]),
        ];

        let (signals, report) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(report.rows_ok, 3);
        assert_eq!(signals[0].segment_code, signals[2].segment_code);
        assert_ne!(signals[0].segment_code, signals[1].segment_code);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let dict = FakeDict::new();
        let (signals, report) = transform("SIG_A", &[], &dict).await.unwrap();
        assert!(signals.is_empty());
        assert_eq!(report.rows_in, 0);
    }

    #[tokio::test]
    async fn missing_timestamp_column_fails() {
        let dict = FakeDict::new();
        let rows = vec![row(&[("segment_1", ColumnValue::Text("A".into()))])];
        let err = transform("SIG_A", &rows, &dict).await.unwrap_err();
        assert!(err.to_string().contains("TRANSFORM_MISSING_TIMESTAMP"));
    }

    #[tokio::test]
    async fn bad_timestamp_string_fails() {
        let dict = FakeDict::new();
        let rows = vec![row(&[("ts", ColumnValue::Text("not-a-time".into()))])];
        let err = transform("SIG_A", &rows, &dict).await.unwrap_err();
        assert!(err.to_string().contains("TRANSFORM_BAD_TIMESTAMP"));
    }

    #[tokio::test]
    async fn millisecond_epoch_is_normalised_to_seconds() {
        let dict = FakeDict::new();
        let millis = 1_736_942_400_000i64;
        let rows = vec![row(&[("ts", ColumnValue::Int(millis))])];
        let (signals, _) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals[0].load_timestamp, 1_736_942_400);
    }

    #[tokio::test]
    async fn iso8601_string_timestamp_parses() {
        let dict = FakeDict::new();
        let rows = vec![row(&[(
            "time",
            ColumnValue::Text("2025-01-15T12:00:00Z".into()),
        )])];
        let (signals, _) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals[0].load_timestamp, 1_736_942_400);
    }

    #[tokio::test]
    async fn decimal_seconds_string_parses_before_iso_attempt() {
        let dict = FakeDict::new();
        let rows = vec![row(&[("ts", ColumnValue::Text("1736942400".into()))])];
        let (signals, _) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals[0].load_timestamp, 1_736_942_400);
    }

    #[tokio::test]
    async fn missing_segment_columns_yield_null_slots_not_failure() {
        let dict = FakeDict::new();
        let rows = vec![row(&[("ts", ColumnValue::Int(1_736_942_400))])];
        let (signals, report) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(report.rows_ok, 1);
    }

    #[tokio::test]
    async fn non_numeric_aggregate_degrades_to_null_without_failing_batch() {
        let dict = FakeDict::new();
        let rows = vec![row(&[
            ("ts", ColumnValue::Int(1_736_942_400)),
            ("rec_count", ColumnValue::Text("not-a-number".into())),
        ])];
        let (signals, report) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals[0].rec_count, None);
        assert_eq!(report.rows_with_degraded_fields, 1);
    }

    #[tokio::test]
    async fn aggregate_columns_coerce_from_numeric_strings() {
        let dict = FakeDict::new();
        let rows = vec![row(&[
            ("ts", ColumnValue::Int(1_736_942_400)),
            ("sum_val", ColumnValue::Text("12.5".into())),
            ("rec_count", ColumnValue::Text("7".into())),
        ])];
        let (signals, _) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals[0].sum_val, Some(12.5));
        assert_eq!(signals[0].rec_count, Some(7));
    }

    #[tokio::test]
    async fn mixed_script_segment_values_round_trip_unchanged() {
        let dict = FakeDict::new();
        let rows = vec![row(&[
            ("ts", ColumnValue::Int(1_736_942_400)),
            ("segment_1", ColumnValue::Text("مرحبا".into())),
            ("segment_2", ColumnValue::Text("你好".into())),
        ])];
        let (signals, _) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals.len(), 1);
        // Segment identity is exercised through the dictionary key, not the
        // SignalRecord itself — assert the dictionary saw the exact bytes.
        let key = extract_segment_key(&rows[0]);
        assert_eq!(key.seg1.as_deref(), Some("مرحبا"));
        assert_eq!(key.seg2.as_deref(), Some("你好"));
    }

    #[tokio::test]
    async fn column_name_matching_is_case_insensitive() {
        let dict = FakeDict::new();
        let rows = vec![row(&[("TIMESTAMP", ColumnValue::Int(1_736_942_400))])];
        let (signals, _) = transform("SIG_A", &rows, &dict).await.unwrap();
        assert_eq!(signals[0].load_timestamp, 1_736_942_400);
    }
}
