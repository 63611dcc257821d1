//! Batch lifecycle state machine
//!
//! One batch per ingestion run, progressing
//! staging → validating → ready → promoting → {completed | failed},
//! with rolled_back reachable only from completed via operator rollback.
//! The batch doubles as the audit record: it pins the contract, rules and
//! input-file fingerprints the run used and accumulates every count and
//! warning downstream stages produce.

use caveat_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Rows being parsed and persisted to the staging area
    Staging,
    /// Quantitative and semantic checks running over the staged batch
    Validating,
    /// Validated and deduplicated, awaiting promotion
    Ready,
    /// Promotion transaction in flight
    Promoting,
    /// Promotion committed
    Completed,
    /// Hard failure; production table untouched, staging retained
    Failed,
    /// Promotion reverted by operator
    RolledBack,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Staging => "staging",
            BatchStatus::Validating => "validating",
            BatchStatus::Ready => "ready",
            BatchStatus::Promoting => "promoting",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::RolledBack
        )
    }

    /// Legal state-machine edges
    fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Staging, Validating)
                | (Validating, Ready)
                | (Ready, Promoting)
                | (Promoting, Completed)
                | (Completed, RolledBack)
                | (Staging, Failed)
                | (Validating, Failed)
                | (Ready, Failed)
                | (Promoting, Failed)
        )
    }
}

/// Recorded state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub batch_id: Uuid,
    pub old_status: BatchStatus,
    pub new_status: BatchStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One ingestion run and its audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,

    /// Input file path → SHA-256 of contents
    pub file_fingerprints: BTreeMap<String, String>,
    pub schema_version: String,
    pub rules_version: String,
    pub contract_hash: String,
    /// Fingerprint of the first input file's header set
    pub header_fingerprint: String,
    /// Compatibility report, serialized JSON
    pub contract_report: Option<serde_json::Value>,

    pub rows_loaded: u64,
    pub rows_after_dedup: u64,
    pub rows_outliers_marked: u64,
    pub rows_promoted: u64,

    pub validation_passed: Option<bool>,
    pub validation_issues: Vec<String>,
    pub semantic_warnings: Vec<String>,
}

impl Batch {
    /// Create a new batch pinned to the contract and rules of this run
    pub fn new(schema_version: &str, contract_hash: &str, rules_version: &str) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            status: BatchStatus::Staging,
            file_fingerprints: BTreeMap::new(),
            schema_version: schema_version.to_string(),
            rules_version: rules_version.to_string(),
            contract_hash: contract_hash.to_string(),
            header_fingerprint: String::new(),
            contract_report: None,
            rows_loaded: 0,
            rows_after_dedup: 0,
            rows_outliers_marked: 0,
            rows_promoted: 0,
            validation_passed: None,
            validation_issues: Vec::new(),
            semantic_warnings: Vec::new(),
        }
    }

    /// Transition to a new status, rejecting illegal edges
    pub fn transition_to(&mut self, new_status: BatchStatus) -> Result<StateTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(Error::Internal(format!(
                "illegal batch transition {} -> {}",
                self.status.as_str(),
                new_status.as_str()
            )));
        }
        let transition = StateTransition {
            batch_id: self.batch_id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;
        if new_status.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        tracing::info!(
            batch_id = %self.batch_id,
            from = transition.old_status.as_str(),
            to = transition.new_status.as_str(),
            "Batch state transition"
        );
        Ok(transition)
    }

    /// Record a soft validation finding
    pub fn add_issue(&mut self, issue: impl Into<String>) {
        self.validation_issues.push(issue.into());
    }

    /// Record a soft semantic warning
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.semantic_warnings.push(warning.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch::new("2024.1", "hash", "rules")
    }

    #[test]
    fn happy_path_walks_the_state_machine() {
        let mut b = batch();
        b.transition_to(BatchStatus::Validating).unwrap();
        b.transition_to(BatchStatus::Ready).unwrap();
        b.transition_to(BatchStatus::Promoting).unwrap();
        b.transition_to(BatchStatus::Completed).unwrap();
        assert!(b.ended_at.is_some());
        assert!(b.status.is_terminal());
    }

    #[test]
    fn rolled_back_only_reachable_from_completed() {
        let mut b = batch();
        assert!(b.transition_to(BatchStatus::RolledBack).is_err());

        b.transition_to(BatchStatus::Validating).unwrap();
        b.transition_to(BatchStatus::Ready).unwrap();
        assert!(b.clone().transition_to(BatchStatus::RolledBack).is_err());

        b.transition_to(BatchStatus::Promoting).unwrap();
        b.transition_to(BatchStatus::Completed).unwrap();
        b.transition_to(BatchStatus::RolledBack).unwrap();
        assert_eq!(b.status, BatchStatus::RolledBack);
    }

    #[test]
    fn failed_reachable_from_every_active_state() {
        for setup in [
            vec![],
            vec![BatchStatus::Validating],
            vec![BatchStatus::Validating, BatchStatus::Ready],
            vec![
                BatchStatus::Validating,
                BatchStatus::Ready,
                BatchStatus::Promoting,
            ],
        ] {
            let mut b = batch();
            for s in setup {
                b.transition_to(s).unwrap();
            }
            b.transition_to(BatchStatus::Failed).unwrap();
            assert_eq!(b.status, BatchStatus::Failed);
        }
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        let mut b = batch();
        b.transition_to(BatchStatus::Failed).unwrap();
        assert!(b.transition_to(BatchStatus::Staging).is_err());
        assert!(b.transition_to(BatchStatus::Promoting).is_err());
    }
}
