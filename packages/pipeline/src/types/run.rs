//! Phase audit records and store-wide statistics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = i64;

/// Lifecycle of a phase run. A run still `Running` after the process
/// exited means the phase crashed or was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work tallies written when a run closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
}

impl RunCounts {
    pub fn new(processed: u64, successful: u64, failed: u64) -> Self {
        Self {
            processed,
            successful,
            failed,
        }
    }
}

/// One phase execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub run_type: String,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub last_error: Option<String>,
    pub config_snapshot: serde_json::Value,
}

/// Checkpoint totals across the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total: u64,
    pub prefiltered: u64,
    pub routed: u64,
    pub unrouted: u64,
    pub route_errors: u64,
    pub fraud: u64,
    pub idv: u64,
    pub both: u64,
    pub neither: u64,
    pub enriched: u64,
    pub comments: u64,
    pub fraud_classified: u64,
    pub idv_classified: u64,
    pub fraud_ready: u64,
    pub idv_ready: u64,
    /// Gave up after too many failed attempts
    pub fraud_unclassifiable: u64,
    pub idv_unclassifiable: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total posts:          {}", self.total)?;
        writeln!(f, "Pre-filtered out:     {}", self.prefiltered)?;
        writeln!(f, "--- Stage 1 ---")?;
        writeln!(f, "Routed:               {}", self.routed)?;
        writeln!(f, "Awaiting routing:     {}", self.unrouted)?;
        writeln!(f, "Routing errors:       {}", self.route_errors)?;
        writeln!(f, "Fraud:                {}", self.fraud)?;
        writeln!(f, "IDV:                  {}", self.idv)?;
        writeln!(f, "Both:                 {}", self.both)?;
        writeln!(f, "Neither:              {}", self.neither)?;
        writeln!(f, "--- Enrichment ---")?;
        writeln!(f, "Enriched posts:       {}", self.enriched)?;
        writeln!(f, "Stored comments:      {}", self.comments)?;
        writeln!(f, "--- Stage 2 ---")?;
        writeln!(
            f,
            "Fraud classified:     {} ({} ready, {} unclassifiable)",
            self.fraud_classified, self.fraud_ready, self.fraud_unclassifiable
        )?;
        write!(
            f,
            "IDV classified:       {} ({} ready, {} unclassifiable)",
            self.idv_classified, self.idv_ready, self.idv_unclassifiable
        )
    }
}
