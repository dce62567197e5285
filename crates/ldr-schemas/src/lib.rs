//! Shared wire/data types for the signal-loader workspace.
//!
//! Kept deliberately small: these are the types that cross crate boundaries
//! (db <-> transform <-> engine <-> daemon). Anything that lives entirely
//! inside one crate stays there instead of being hoisted here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `loader.loader_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    Idle,
    Running,
    Failed,
    Paused,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Idle => "IDLE",
            LoadStatus::Running => "RUNNING",
            LoadStatus::Failed => "FAILED",
            LoadStatus::Paused => "PAUSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(LoadStatus::Idle),
            "RUNNING" => Some(LoadStatus::Running),
            "FAILED" => Some(LoadStatus::Failed),
            "PAUSED" => Some(LoadStatus::Paused),
            _ => None,
        }
    }
}

/// `loader.approval_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    PendingApproval,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::PendingApproval => "PENDING_APPROVAL",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_APPROVAL" => Some(ApprovalStatus::PendingApproval),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

/// `loader.purge_strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeStrategy {
    FailOnDuplicate,
    PurgeAndReload,
    SkipDuplicates,
}

impl PurgeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeStrategy::FailOnDuplicate => "FAIL_ON_DUPLICATE",
            PurgeStrategy::PurgeAndReload => "PURGE_AND_RELOAD",
            PurgeStrategy::SkipDuplicates => "SKIP_DUPLICATES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FAIL_ON_DUPLICATE" => Some(PurgeStrategy::FailOnDuplicate),
            "PURGE_AND_RELOAD" => Some(PurgeStrategy::PurgeAndReload),
            "SKIP_DUPLICATES" => Some(PurgeStrategy::SkipDuplicates),
            _ => None,
        }
    }
}

/// `loader.load_history.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    Running,
    Success,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Running => "RUNNING",
            HistoryStatus::Success => "SUCCESS",
            HistoryStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(HistoryStatus::Running),
            "SUCCESS" => Some(HistoryStatus::Success),
            "FAILED" => Some(HistoryStatus::Failed),
            _ => None,
        }
    }
}

/// The 10-tuple of nullable segment strings that C7 resolves to a dense
/// integer segment code, per `(loaderCode, seg1..seg10)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SegmentKey {
    pub seg1: Option<String>,
    pub seg2: Option<String>,
    pub seg3: Option<String>,
    pub seg4: Option<String>,
    pub seg5: Option<String>,
    pub seg6: Option<String>,
    pub seg7: Option<String>,
    pub seg8: Option<String>,
    pub seg9: Option<String>,
    pub seg10: Option<String>,
}

impl SegmentKey {
    pub fn as_array(&self) -> [Option<&str>; 10] {
        [
            self.seg1.as_deref(),
            self.seg2.as_deref(),
            self.seg3.as_deref(),
            self.seg4.as_deref(),
            self.seg5.as_deref(),
            self.seg6.as_deref(),
            self.seg7.as_deref(),
            self.seg8.as_deref(),
            self.seg9.as_deref(),
            self.seg10.as_deref(),
        ]
    }
}

/// A half-open `[from, to)` time window, shared between C4/C5/C6/C9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// `to == from`: the window would pull nothing. Scheduler must treat
    /// this as "not eligible yet" (spec.md §4.4 step 7); C4 itself still
    /// returns it for inspection.
    pub fn is_degenerate(&self) -> bool {
        self.to <= self.from
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.to - self.from).num_seconds()
    }
}

/// A single column value materialized from a driver-agnostic source row.
///
/// `ldr-db::sourcepool::RunQuery` produces `Vec<BTreeMap<String, ColumnValue>>`
/// (keys lower-cased) so `ldr-transform` never touches a driver type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bool(bool),
}

impl ColumnValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Int(i) => Some(*i as f64),
            ColumnValue::Float(f) => Some(*f),
            ColumnValue::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(i) => Some(*i),
            ColumnValue::Float(f) => Some(*f as i64),
            ColumnValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

/// One ingested aggregate row destined for `loader.signals_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub loader_code: String,
    pub load_timestamp: i64,
    pub segment_code: i64,
    pub rec_count: Option<i64>,
    pub max_val: Option<f64>,
    pub min_val: Option<f64>,
    pub avg_val: Option<f64>,
    pub sum_val: Option<f64>,
}
