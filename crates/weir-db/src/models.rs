use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a pipeline run.
///
/// A run is born `Queued`, moves to `Running` exactly once (via claim), and
/// ends in exactly one of the three terminal states. A `Queued` run may be
/// cancelled without ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states absorb every event.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(RunStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RunStatus`] string.
#[derive(Debug, Clone)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run status: {:?}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a pipeline version. Only `Approved` versions may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionStatus {
    Draft,
    Approved,
    Deprecated,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Approved => "APPROVED",
            Self::Deprecated => "DEPRECATED",
        };
        f.write_str(s)
    }
}

impl FromStr for VersionStatus {
    type Err = VersionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "APPROVED" => Ok(Self::Approved),
            "DEPRECATED" => Ok(Self::Deprecated),
            other => Err(VersionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`VersionStatus`] string.
#[derive(Debug, Clone)]
pub struct VersionStatusParseError(pub String);

impl fmt::Display for VersionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pipeline version status: {:?}", self.0)
    }
}

impl std::error::Error for VersionStatusParseError {}

// ---------------------------------------------------------------------------

/// How a run came to exist: submitted by hand, or created as the retry of a
/// failed/cancelled ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Retry,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Retry => "retry",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerType {
    type Err = TriggerTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "retry" => Ok(Self::Retry),
            other => Err(TriggerTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TriggerType`] string.
#[derive(Debug, Clone)]
pub struct TriggerTypeParseError(pub String);

impl fmt::Display for TriggerTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid trigger type: {:?}", self.0)
    }
}

impl std::error::Error for TriggerTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A tenant -- the top-level ownership scope.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A named pipeline belonging to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pipeline {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An immutable DAG specification for a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineVersion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pipeline_id: Uuid,
    pub version: String,
    pub status: VersionStatus,
    pub dag_spec: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The slice of a pipeline version handed to a worker at claim time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineVersionSnapshot {
    pub id: Uuid,
    pub status: VersionStatus,
    pub dag_spec: serde_json::Value,
}

/// One execution attempt of a pipeline version for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pipeline_version_id: Uuid,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub parameters: serde_json::Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_of_run_id: Option<Uuid>,
    pub root_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An append-only log entry bound to a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineRunLog {
    pub id: Uuid,
    pub run_id: Uuid,
    pub tenant_id: Uuid,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub source: Option<String>,
    pub meta: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_display_roundtrip() {
        let variants = [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: RunStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn run_status_invalid() {
        let result = "bogus".parse::<RunStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn run_status_serde_uses_uppercase() {
        let json = serde_json::to_string(&RunStatus::Queued).unwrap();
        assert_eq!(json, "\"QUEUED\"");
        let back: RunStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(back, RunStatus::Cancelled);
    }

    #[test]
    fn run_status_terminal_classification() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn version_status_display_roundtrip() {
        let variants = [
            VersionStatus::Draft,
            VersionStatus::Approved,
            VersionStatus::Deprecated,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: VersionStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn version_status_invalid() {
        let result = "PUBLISHED".parse::<VersionStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn trigger_type_display_roundtrip() {
        let variants = [TriggerType::Manual, TriggerType::Retry];
        for v in &variants {
            let s = v.to_string();
            let parsed: TriggerType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn trigger_type_invalid() {
        let result = "scheduled".parse::<TriggerType>();
        assert!(result.is_err());
    }
}
