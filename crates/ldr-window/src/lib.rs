//! Time-Window Calculator (spec §4.4, C4).
//!
//! Computes the half-open `[from, to)` window a loader should pull next.
//! `now` is taken as an explicit parameter (never read from the system
//! clock internally) so the property tests in `tests/` and the scheduler's
//! callers can control it deterministically.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use ldr_schemas::TimeWindow;

/// Calculate the next execution window for a loader.
///
/// `last_load_timestamp` is the loader's watermark (`None` on first run).
/// `max_query_period_seconds` bounds the chunk size (must be > 0).
/// `lookback_hours` is the configured default lookback for a fresh/skewed
/// watermark (`executor.defaultLookbackHours`, default 24).
pub fn calculate(
    now: DateTime<Utc>,
    last_load_timestamp: Option<DateTime<Utc>>,
    max_query_period_seconds: i64,
    lookback_hours: i64,
) -> Result<TimeWindow> {
    if max_query_period_seconds <= 0 {
        bail!("max_query_period_seconds must be > 0, got {max_query_period_seconds}");
    }

    // Step 2-3: clock-skew guard — a watermark in the future is treated the
    // same as a missing watermark.
    let candidate = match last_load_timestamp {
        Some(ts) if ts <= now => ts,
        _ => now - Duration::hours(lookback_hours),
    };

    let from = candidate;
    let cap_by_period = from + Duration::seconds(max_query_period_seconds);
    let to = cap_by_period.min(now);

    Ok(TimeWindow { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(s: &str) -> DateTime<Utc> {
        Utc.datetime_from_str(s, "%Y-%m-%dT%H:%M:%SZ").unwrap()
    }

    #[test]
    fn s1_first_run_uses_default_lookback() {
        let now = dt("2025-01-15T12:00:00Z");
        let w = calculate(now, None, 3600, 24).unwrap();
        assert_eq!(w.from, dt("2025-01-14T12:00:00Z"));
        assert_eq!(w.to, dt("2025-01-15T12:00:00Z"));
    }

    #[test]
    fn s2_catch_up_chunks_by_max_period() {
        let now = dt("2025-01-15T12:00:00Z");
        let last = dt("2024-12-16T12:00:00Z");
        let w = calculate(now, Some(last), 432_000, 24).unwrap();
        assert_eq!(w.from, dt("2024-12-16T12:00:00Z"));
        assert_eq!(w.to, dt("2024-12-21T12:00:00Z"));
    }

    #[test]
    fn s2_catch_up_six_runs_reach_now() {
        let now = dt("2025-01-15T12:00:00Z");
        let mut watermark = Some(dt("2024-12-16T12:00:00Z"));
        let mut windows = Vec::new();
        for _ in 0..6 {
            let w = calculate(now, watermark, 432_000, 24).unwrap();
            windows.push(w);
            watermark = Some(w.to);
        }
        assert_eq!(windows.len(), 6);
        assert_eq!(windows.last().unwrap().to, now);
        // Monotonic, non-overlapping.
        for pair in windows.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[test]
    fn s6_clock_skew_uses_lookback_not_future() {
        let now = dt("2025-01-15T12:00:00Z");
        let future = now + Duration::hours(1);
        let w = calculate(now, Some(future), 3600, 24).unwrap();
        assert_eq!(w.from, now - Duration::hours(24));
        assert_eq!(w.to, now);
        assert!(w.to <= now);
    }

    #[test]
    fn chunking_never_exceeds_max_period() {
        let now = dt("2025-06-01T00:00:00Z");
        let last = dt("2025-01-01T00:00:00Z");
        let w = calculate(now, Some(last), 86_400, 24).unwrap();
        assert!(w.duration_seconds() <= 86_400);
    }

    #[test]
    fn final_catch_up_run_caps_at_now() {
        let now = dt("2025-01-15T12:00:00Z");
        // Watermark one hour behind now, period much larger than remaining gap.
        let last = now - Duration::hours(1);
        let w = calculate(now, Some(last), 432_000, 24).unwrap();
        assert_eq!(w.to, now);
    }

    #[test]
    fn fully_caught_up_yields_degenerate_window() {
        let now = dt("2025-01-15T12:00:00Z");
        let w = calculate(now, Some(now), 3600, 24).unwrap();
        assert!(w.is_degenerate());
    }

    #[test]
    fn rejects_non_positive_max_period() {
        let now = dt("2025-01-15T12:00:00Z");
        assert!(calculate(now, None, 0, 24).is_err());
        assert!(calculate(now, None, -5, 24).is_err());
    }
}
