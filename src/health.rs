//! Point-in-time health snapshots for registered features.
//!
//! A [`FeatureHealth`] is never mutated after it is published. Every health
//! check or lifecycle transition builds a new value and swaps it in, so
//! readers always observe a complete snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Operational status of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Disabled,
    Unknown,
}

impl HealthStatus {
    /// HEALTHY and DEGRADED features can still serve calls
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Disabled => "DISABLED",
            HealthStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single timestamped problem attached to a health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthIssue {
    pub fn new<C: Into<String>, D: Into<String>>(
        severity: IssueSeverity,
        code: C,
        description: D,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Immutable health snapshot for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureHealth {
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, Value>,
    pub issues: Vec<HealthIssue>,
}

impl FeatureHealth {
    pub fn new<S: Into<String>>(status: HealthStatus, message: S) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: Utc::now(),
            metrics: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    pub fn healthy<S: Into<String>>(message: S) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn degraded<S: Into<String>>(message: S) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    pub fn unhealthy<S: Into<String>>(message: S) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    pub fn disabled<S: Into<String>>(message: S) -> Self {
        Self::new(HealthStatus::Disabled, message)
    }

    pub fn unknown() -> Self {
        Self::new(HealthStatus::Unknown, "No health information")
    }

    /// Copy of this snapshot with one metric added or replaced
    pub fn with_metric<K: Into<String>, V: Into<Value>>(&self, key: K, value: V) -> Self {
        let mut next = self.clone();
        next.metrics.insert(key.into(), value.into());
        next.timestamp = Utc::now();
        next
    }

    /// Copy of this snapshot with an extra issue appended
    pub fn with_issue(&self, issue: HealthIssue) -> Self {
        let mut next = self.clone();
        next.issues.push(issue);
        next.timestamp = Utc::now();
        next
    }

    pub fn is_operational(&self) -> bool {
        self.status.is_operational()
    }

    /// Most severe issue attached to this snapshot, if any
    pub fn worst_issue(&self) -> Option<&HealthIssue> {
        self.issues.iter().max_by_key(|issue| issue.severity)
    }
}

impl fmt::Display for FeatureHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}
