//! Classified execution errors (spec §7).
//!
//! The executor never propagates a raw error past its own boundary; every
//! failure from a lower layer is classified into one of these kinds so it
//! can drive `LoadHistory.errorMessage` and the "configuration defect vs.
//! transient vs. data defect" retry policy spec §7 describes. Lower layers
//! already `bail!`/`anyhow!` with a `CODE: detail` prefix (see `ldr-db`,
//! `ldr-sql`, `ldr-transform`, `ldr-crypto`); classification scans the full
//! anyhow error chain for the known code rather than re-deriving it, so a
//! classification stays correct even if the failure is wrapped in
//! `.context(...)` on the way up.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    SchedulerTransient(String),
    SourceUnavailable(String),
    QueryTimeout(String),
    QueryError(String),
    SqlNotReadOnly(String),
    SqlMissingPlaceholder(String),
    TransformMissingTimestamp(String),
    TransformBadTimestamp(String),
    SinkDuplicate(String),
    CryptoDecryptFailed(String),
    CryptoKeyInvalid(String),
    /// Anything that didn't match a known code — still recorded, never panics.
    Unclassified(String),
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::SchedulerTransient(_) => "SCHEDULER_TRANSIENT",
            ExecutionError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            ExecutionError::QueryTimeout(_) => "QUERY_TIMEOUT",
            ExecutionError::QueryError(_) => "QUERY_ERROR",
            ExecutionError::SqlNotReadOnly(_) => "SQL_NOT_READ_ONLY",
            ExecutionError::SqlMissingPlaceholder(_) => "SQL_MISSING_PLACEHOLDER",
            ExecutionError::TransformMissingTimestamp(_) => "TRANSFORM_MISSING_TIMESTAMP",
            ExecutionError::TransformBadTimestamp(_) => "TRANSFORM_BAD_TIMESTAMP",
            ExecutionError::SinkDuplicate(_) => "SINK_DUPLICATE",
            ExecutionError::CryptoDecryptFailed(_) => "CRYPTO_DECRYPT_FAILED",
            ExecutionError::CryptoKeyInvalid(_) => "CRYPTO_KEY_INVALID",
            ExecutionError::Unclassified(_) => "UNCLASSIFIED",
        }
    }

    /// Whether this error kind represents a configuration defect worth
    /// flagging for admin attention rather than a routine transient failure
    /// (spec §7: `SQL_NOT_READ_ONLY`, `SQL_MISSING_PLACEHOLDER`).
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            ExecutionError::SqlNotReadOnly(_) | ExecutionError::SqlMissingPlaceholder(_)
        )
    }

    /// The `LoadHistory.errorMessage` rendering: `"CODE: detail"`.
    pub fn render(&self) -> String {
        let detail = match self {
            ExecutionError::SchedulerTransient(d)
            | ExecutionError::SourceUnavailable(d)
            | ExecutionError::QueryTimeout(d)
            | ExecutionError::QueryError(d)
            | ExecutionError::SqlNotReadOnly(d)
            | ExecutionError::SqlMissingPlaceholder(d)
            | ExecutionError::TransformMissingTimestamp(d)
            | ExecutionError::TransformBadTimestamp(d)
            | ExecutionError::SinkDuplicate(d)
            | ExecutionError::CryptoDecryptFailed(d)
            | ExecutionError::CryptoKeyInvalid(d)
            | ExecutionError::Unclassified(d) => d,
        };
        format!("{}: {}", self.code(), detail)
    }

    /// Classify an anyhow error by scanning its full cause chain for a
    /// known `CODE:` prefix.
    pub fn classify(err: &anyhow::Error) -> Self {
        let full: String = err
            .chain()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(" <- ");

        let detail = |code: &str| {
            full.find(code)
                .map(|i| full[i..].to_string())
                .unwrap_or_else(|| full.clone())
        };

        const CODES: &[(&str, fn(String) -> ExecutionError)] = &[
            ("SOURCE_UNAVAILABLE", ExecutionError::SourceUnavailable),
            ("QUERY_TIMEOUT", ExecutionError::QueryTimeout),
            ("QUERY_ERROR", ExecutionError::QueryError),
            ("SQL_NOT_READ_ONLY", ExecutionError::SqlNotReadOnly),
            ("SQL_MISSING_PLACEHOLDER", ExecutionError::SqlMissingPlaceholder),
            ("TRANSFORM_MISSING_TIMESTAMP", ExecutionError::TransformMissingTimestamp),
            ("TRANSFORM_BAD_TIMESTAMP", ExecutionError::TransformBadTimestamp),
            ("SINK_DUPLICATE", ExecutionError::SinkDuplicate),
            ("CRYPTO_DECRYPT_FAILED", ExecutionError::CryptoDecryptFailed),
            ("CRYPTO_KEY_INVALID", ExecutionError::CryptoKeyInvalid),
        ];

        for (code, ctor) in CODES {
            if full.contains(code) {
                return ctor(detail(code));
            }
        }

        ExecutionError::Unclassified(full)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classifies_known_code_from_top_level_error() {
        let err = anyhow!("SOURCE_UNAVAILABLE: unknown source db 'X'");
        let classified = ExecutionError::classify(&err);
        assert_eq!(classified.code(), "SOURCE_UNAVAILABLE");
    }

    #[test]
    fn classifies_known_code_wrapped_in_context() {
        let err = anyhow!("QUERY_TIMEOUT: exceeded 60s").context("run_query failed");
        let classified = ExecutionError::classify(&err);
        assert_eq!(classified.code(), "QUERY_TIMEOUT");
    }

    #[test]
    fn unknown_error_is_unclassified_not_a_panic() {
        let err = anyhow!("something else entirely");
        let classified = ExecutionError::classify(&err);
        assert_eq!(classified.code(), "UNCLASSIFIED");
    }

    #[test]
    fn configuration_defects_are_flagged() {
        let err = anyhow!("SQL_NOT_READ_ONLY: forbidden token");
        assert!(ExecutionError::classify(&err).is_configuration_defect());

        let err = anyhow!("QUERY_TIMEOUT: x");
        assert!(!ExecutionError::classify(&err).is_configuration_defect());
    }

    #[test]
    fn render_prefixes_code() {
        let err = anyhow!("TRANSFORM_BAD_TIMESTAMP: unparseable 'x'");
        assert!(ExecutionError::classify(&err).render().starts_with("TRANSFORM_BAD_TIMESTAMP:"));
    }
}
