//! Query Parameter Replacer (spec §4.5, C5).
//!
//! Substitutes the `:fromTime`, `:toTime` and `:replicaId` placeholders in a
//! loader's SQL text with the computed window bounds and replica ordinal.
//! Substitution is textual but placeholder-bounded: each placeholder is
//! matched as a whole token (a `:` followed by identifier characters), never
//! inside a longer identifier, so `:fromTimeZone` is left untouched.

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, Utc};
use ldr_schemas::TimeWindow;

const PLACEHOLDER_FROM: &str = "fromTime";
const PLACEHOLDER_TO: &str = "toTime";
const PLACEHOLDER_REPLICA: &str = "replicaId";

/// Forbidden write tokens, per spec §6.2: must not appear outside string
/// literals anywhere in the loader SQL.
const FORBIDDEN_TOKENS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE",
];

/// Enforce the read-only query contract (spec §6.2): the first
/// non-whitespace token must be `SELECT` (case-insensitive), and none of
/// [`FORBIDDEN_TOKENS`] may appear outside a single-quoted string literal.
/// Called both at admin save time (out of scope here) and re-checked at
/// execute time per spec — failure here is classified `SQL_NOT_READ_ONLY`.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let first_token = sql
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_start_matches('(');
    if !first_token.eq_ignore_ascii_case("select") {
        bail!("SQL_NOT_READ_ONLY: query must start with SELECT, found '{first_token}'");
    }

    let without_literals = strip_string_literals(sql);
    let upper = without_literals.to_ascii_uppercase();
    for token in FORBIDDEN_TOKENS {
        if contains_word(&upper, token) {
            bail!("SQL_NOT_READ_ONLY: forbidden token '{token}' present outside a string literal");
        }
    }

    Ok(())
}

/// Replace the contents of every `'...'` literal with spaces, preserving
/// length/positions so later scanning never sees write-statement keywords
/// that only appear inside quoted strings. Handles `''` as an escaped quote.
fn strip_string_literals(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            if in_literal && i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                // Escaped quote inside a literal: consume both, stay inside.
                out.push(b' ');
                out.push(b' ');
                i += 2;
                continue;
            }
            in_literal = !in_literal;
            out.push(b' ');
            i += 1;
            continue;
        }
        out.push(if in_literal { b' ' } else { b });
        i += 1;
    }
    String::from_utf8(out).unwrap_or_default()
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let wbytes = word.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0 || !is_ident_char(bytes[abs - 1] as char);
        let after = abs + wbytes.len();
        let after_ok = after >= bytes.len() || !is_ident_char(bytes[after] as char);
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
        if start >= haystack.len() {
            break;
        }
    }
    false
}

/// Render `sql` with the window bounds substituted for `:fromTime`/`:toTime`
/// (formatted `YYYY-MM-DD HH:MM` in `UTC + timezone_offset_hours`) and
/// `replica_ordinal` for `:replicaId`.
///
/// Fails with `SQL_MISSING_PLACEHOLDER` if `:fromTime` or `:toTime` is
/// absent from `sql`.
pub fn replace(
    sql: &str,
    window: &TimeWindow,
    replica_ordinal: u32,
    timezone_offset_hours: i32,
) -> Result<String> {
    let offset = FixedOffset::east_opt(timezone_offset_hours * 3600)
        .ok_or_else(|| anyhow::anyhow!("invalid timezone_offset_hours: {timezone_offset_hours}"))?;

    let from_str = format_in_offset(window.from, offset);
    let to_str = format_in_offset(window.to, offset);
    let replica_str = replica_ordinal.to_string();

    let (rendered, found_from, found_to) =
        substitute_tokens(sql, &from_str, &to_str, &replica_str);

    if !found_from || !found_to {
        bail!(
            "SQL_MISSING_PLACEHOLDER: loader SQL is missing {}{}",
            if !found_from { ":fromTime " } else { "" },
            if !found_to { ":toTime" } else { "" },
        );
    }

    Ok(rendered)
}

fn format_in_offset(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

/// Scan `sql` for `:identifier` tokens and replace the three known
/// placeholders. Returns the rendered string plus whether `:fromTime` and
/// `:toTime` were each found at least once.
fn substitute_tokens(sql: &str, from_str: &str, to_str: &str, replica_str: &str) -> (String, bool, bool) {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut found_from = false;
    let mut found_to = false;

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == ':' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_ident_char(bytes[end] as char) {
                end += 1;
            }
            if end > start {
                let ident = &sql[start..end];
                match ident {
                    PLACEHOLDER_FROM => {
                        out.push_str(from_str);
                        found_from = true;
                        i = end;
                        continue;
                    }
                    PLACEHOLDER_TO => {
                        out.push_str(to_str);
                        found_to = true;
                        i = end;
                        continue;
                    }
                    PLACEHOLDER_REPLICA => {
                        out.push_str(replica_str);
                        i = end;
                        continue;
                    }
                    _ => {
                        // Not a recognised placeholder — emit the token verbatim.
                        out.push_str(&sql[i..end]);
                        i = end;
                        continue;
                    }
                }
            }
        }
        out.push(c);
        i += 1;
    }

    (out, found_from, found_to)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(from: &str, to: &str) -> TimeWindow {
        TimeWindow {
            from: Utc.datetime_from_str(from, "%Y-%m-%dT%H:%M:%SZ").unwrap(),
            to: Utc.datetime_from_str(to, "%Y-%m-%dT%H:%M:%SZ").unwrap(),
        }
    }

    #[test]
    fn substitutes_all_placeholders() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let sql = "select * from t where ts >= :fromTime and ts < :toTime and replica = :replicaId";
        let rendered = replace(sql, &w, 3, 0).unwrap();
        assert_eq!(
            rendered,
            "select * from t where ts >= 2025-01-14 12:00 and ts < 2025-01-15 12:00 and replica = 3"
        );
    }

    #[test]
    fn applies_positive_timezone_offset() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let sql = ":fromTime :toTime";
        let rendered = replace(sql, &w, 0, 3).unwrap();
        assert_eq!(rendered, "2025-01-14 15:00 2025-01-15 15:00");
    }

    #[test]
    fn applies_negative_timezone_offset() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let sql = ":fromTime :toTime";
        let rendered = replace(sql, &w, 0, -5).unwrap();
        assert_eq!(rendered, "2025-01-14 07:00 2025-01-15 07:00");
    }

    #[test]
    fn does_not_match_inside_longer_identifier() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let sql = "select :fromTimeZone from t where x = :fromTime and y = :toTime";
        let rendered = replace(sql, &w, 0, 0).unwrap();
        assert!(rendered.contains(":fromTimeZone"));
        assert!(!rendered.contains(":fromTime "));
    }

    #[test]
    fn missing_from_time_fails() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let err = replace("select * from t where x < :toTime", &w, 0, 0).unwrap_err();
        assert!(err.to_string().contains("SQL_MISSING_PLACEHOLDER"));
    }

    #[test]
    fn missing_to_time_fails() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let err = replace("select * from t where x >= :fromTime", &w, 0, 0).unwrap_err();
        assert!(err.to_string().contains("SQL_MISSING_PLACEHOLDER"));
    }

    #[test]
    fn missing_replica_id_is_not_an_error() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        assert!(replace("select :fromTime, :toTime", &w, 0, 0).is_ok());
    }

    #[test]
    fn substitution_is_deterministic() {
        let w = window("2025-01-14T12:00:00Z", "2025-01-15T12:00:00Z");
        let sql = "select :fromTime, :toTime";
        let a = replace(sql, &w, 1, 2).unwrap();
        let b = replace(sql, &w, 1, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn accepts_plain_select() {
        assert!(ensure_read_only("select * from t where ts >= :fromTime and ts < :toTime").is_ok());
    }

    #[test]
    fn accepts_select_case_insensitive_and_leading_whitespace() {
        assert!(ensure_read_only("  SeLeCt 1").is_ok());
    }

    #[test]
    fn rejects_non_select_first_token() {
        let err = ensure_read_only("update t set x = 1").unwrap_err();
        assert!(err.to_string().contains("SQL_NOT_READ_ONLY"));
    }

    #[test]
    fn rejects_embedded_write_statement() {
        let err = ensure_read_only("select * from t; drop table t").unwrap_err();
        assert!(err.to_string().contains("SQL_NOT_READ_ONLY"));
    }

    #[test]
    fn rejects_write_token_regardless_of_case() {
        let err = ensure_read_only("select * from t where x = (DeLeTe from y)").unwrap_err();
        assert!(err.to_string().contains("SQL_NOT_READ_ONLY"));
    }

    #[test]
    fn allows_forbidden_word_inside_string_literal() {
        assert!(ensure_read_only("select * from t where note = 'please DELETE later'").is_ok());
    }

    #[test]
    fn does_not_match_forbidden_token_inside_longer_identifier() {
        assert!(ensure_read_only("select created_at from t").is_ok());
    }

    #[test]
    fn handles_escaped_quote_inside_literal() {
        assert!(ensure_read_only("select * from t where note = 'it''s a DROP of water'").is_ok());
    }
}
