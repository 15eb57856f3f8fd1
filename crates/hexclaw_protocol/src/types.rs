//! Core payload types (jobs, findings, alerts, approval outcomes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Canonical Enums (used across all crates)
// ============================================================================

/// Canonical job identifier across the system.
///
/// Opaque short ID (8 lowercase hex chars, the leading segment of a UUIDv4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Job lifecycle status.
/// This is the CANONICAL definition - use this everywhere for queue status.
///
/// Transitions are only pending -> running -> {done | failed | cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Enqueued, not yet claimed by a worker
    #[default]
    Pending,
    /// Claimed and executing
    Running,
    /// Completed normally (result is set)
    Done,
    /// Completed with an error (error is set)
    Failed,
    /// Cancelled by the operator
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// True for done / failed / cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!(
                "Invalid job status: '{}'. Expected: pending, running, done, failed, or cancelled",
                s
            )),
        }
    }
}

/// Finding / alert severity bucket.
///
/// Declaration order doubles as sort order: critical sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Info,
}

impl Severity {
    /// Sort rank: critical sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
            Severity::Info => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Parse a severity string, mapping anything unknown to `Info`.
    ///
    /// Tool output is not trusted to spell severities correctly.
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or(Severity::Info)
    }

    /// True when `self` is at least as severe as `minimum`.
    pub fn at_least(&self, minimum: Severity) -> bool {
        self.rank() <= minimum.rank()
    }

    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" => Ok(Severity::Info),
            _ => Err(format!("Invalid severity: '{}'", s)),
        }
    }
}

/// Model provider preference class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Best reasoning, costs most. Only for tasks that genuinely need it.
    High,
    /// Cheap, good enough for status/plan tasks.
    #[default]
    Low,
    /// Zero cost, rate limited.
    Free,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Low => "low",
            Tier::Free => "free",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Tier::High),
            "low" => Ok(Tier::Low),
            "free" => Ok(Tier::Free),
            _ => Err(format!("Invalid tier: '{}'. Expected: high, low, or free", s)),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A job in the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub skill_name: String,
    pub params: BTreeMap<String, Value>,
    /// Denormalised from params for quick filtering.
    pub target: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set iff status == done.
    pub result: Option<Value>,
    /// Set iff status == failed.
    pub error: Option<String>,
}

impl Job {
    /// Seconds between start and finish (or now, while running).
    pub fn elapsed_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - started).num_seconds())
    }
}

/// Normalised record describing a discovered vulnerability or asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub tool: String,
    #[serde(default)]
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

impl Finding {
    pub fn new(tool: &str, severity: Severity, title: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            severity,
            title: title.into(),
            detail: String::new(),
        }
    }
}

/// Result of an approval gate.
///
/// Exactly one of these outcomes is written per approval id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "choice", rename_all = "lowercase")]
pub enum ApprovalOutcome {
    Approve,
    Deny,
    Choice(String),
    Timeout,
    Cancel,
}

impl ApprovalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalOutcome::Approve => "approve",
            ApprovalOutcome::Deny => "deny",
            ApprovalOutcome::Choice(_) => "choice",
            ApprovalOutcome::Timeout => "timeout",
            ApprovalOutcome::Cancel => "cancel",
        }
    }
}

/// Normalised alert from any monitored source (RSS, host intel, manual).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub source: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub severity: Severity,
    pub published: String,
    /// Digest of source:url:title, used for deduplication.
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical.rank() < Severity::High.rank());
        assert!(Severity::High.rank() < Severity::Medium.rank());
        assert!(Severity::Medium.rank() < Severity::Low.rank());
        assert!(Severity::Low.rank() < Severity::Info.rank());
    }

    #[test]
    fn test_severity_lossy_parse() {
        assert_eq!(Severity::parse_lossy("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lossy("weird"), Severity::Info);
    }

    #[test]
    fn test_severity_threshold() {
        assert!(Severity::Critical.at_least(Severity::Medium));
        assert!(Severity::Medium.at_least(Severity::Medium));
        assert!(!Severity::Low.at_least(Severity::Medium));
    }

    #[test]
    fn test_approval_outcome_serde() {
        let outcome = ApprovalOutcome::Choice("ssh_audit".to_string());
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"action":"choice","choice":"ssh_audit"}"#);
        let back: ApprovalOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
