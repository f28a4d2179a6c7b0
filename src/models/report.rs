//! Per-run report types.
//!
//! A [`RunReport`] is never persisted. It lists every outstanding key of a
//! run together with the outcome of each stage, so a caller can tell "nothing
//! to do" (no documents) apart from "everything failed".

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ArtifactKind, DocumentKey, Stage};

/// Why a stage failed for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "kebab-case")]
pub enum FailureReason {
    /// Required input artifact is absent; the collaborator was not called
    MissingInput(ArtifactKind),
    /// Collaborator answered, but with empty or malformed output
    InvalidOutput(String),
    /// Collaborator returned an error
    CollaboratorError(String),
    /// Collaborator did not answer within the budget (milliseconds)
    Timeout(u64),
    /// Output artifact could not be written
    StoreWrite(String),
}

impl FailureReason {
    /// Stable short code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "missing-input",
            Self::InvalidOutput(_) => "invalid-output",
            Self::CollaboratorError(_) => "collaborator-error",
            Self::Timeout(_) => "timeout",
            Self::StoreWrite(_) => "store-write",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput(kind) => write!(f, "{}: no {} artifact", self.code(), kind),
            Self::InvalidOutput(detail)
            | Self::CollaboratorError(detail)
            | Self::StoreWrite(detail) => write!(f, "{}: {}", self.code(), detail),
            Self::Timeout(ms) if ms % 1000 == 0 => {
                write!(f, "{}: no answer after {}s", self.code(), ms / 1000)
            }
            Self::Timeout(ms) => write!(f, "{}: no answer after {}ms", self.code(), ms),
        }
    }
}

/// Why a stage was not attempted for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// An earlier stage failed for this key
    UpstreamFailed,
    /// The run was cancelled before this key was reached
    Cancelled,
}

/// Outcome of one stage for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StageOutcome {
    Success,
    Failed(FailureReason),
    Skipped(SkipReason),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("ok"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            Self::Skipped(SkipReason::UpstreamFailed) => f.write_str("skipped"),
            Self::Skipped(SkipReason::Cancelled) => f.write_str("cancelled"),
        }
    }
}

/// Which artifacts of a key exist once the run is over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPresence {
    pub raw: bool,
    pub cleaned: bool,
    pub structured: bool,
}

/// Final per-stage outcomes of one outstanding key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub key: DocumentKey,
    pub clean: StageOutcome,
    pub extract: StageOutcome,
    #[serde(default)]
    pub artifacts: ArtifactPresence,
}

impl DocumentReport {
    pub fn outcome(&self, stage: Stage) -> &StageOutcome {
        match stage {
            Stage::Clean => &self.clean,
            Stage::Extract => &self.extract,
        }
    }

    /// Both stages succeeded.
    pub fn is_complete(&self) -> bool {
        self.clean.is_success() && self.extract.is_success()
    }
}

/// How the outstanding set was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "since", rename_all = "lowercase")]
pub enum DiffMode {
    /// Raw keys without a cleaned artifact
    Resume,
    /// Raw keys created at or after the timestamp
    Since(DateTime<Utc>),
}

/// One raw document written by a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub key: DocumentKey,
    pub standard: Option<String>,
    pub created_at: DateTime<Utc>,
    pub bytes: usize,
}

/// What a fetch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSummary {
    /// Documents actually written as raw artifacts
    pub written: Vec<FetchedDocument>,
    /// Matches whose key already had a raw artifact (left untouched)
    pub kept_existing: Vec<DocumentKey>,
    /// Search rows skipped because name or standard did not match
    pub unmatched_rows: usize,
    /// Search result pages visited
    pub pages_visited: usize,
}

/// Result of one orchestrator run for one material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub material: String,
    pub mode: DiffMode,
    /// The material had no cleaned artifacts before this run
    pub new_material: bool,
    /// `None` when the fetch step was skipped
    pub fetch: Option<FetchSummary>,
    pub documents: Vec<DocumentReport>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Number of candidate keys of the run.
    pub fn candidates(&self) -> usize {
        self.documents.len()
    }

    /// Nothing was outstanding.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn completed(&self) -> Vec<&DocumentKey> {
        self.documents
            .iter()
            .filter(|d| d.is_complete())
            .map(|d| &d.key)
            .collect()
    }

    /// Keys whose given stage failed.
    pub fn failed_at(&self, stage: Stage) -> Vec<&DocumentKey> {
        self.documents
            .iter()
            .filter(|d| d.outcome(stage).is_failed())
            .map(|d| &d.key)
            .collect()
    }

    pub fn document(&self, key: &str) -> Option<&DocumentReport> {
        self.documents.iter().find(|d| d.key.as_str() == key)
    }

    /// Key/value lines for the summary log block.
    pub fn summary_items(&self) -> Vec<(&'static str, String)> {
        let mut items = vec![
            ("Material", self.material.clone()),
            (
                "Mode",
                match self.mode {
                    DiffMode::Resume => "resume".to_string(),
                    DiffMode::Since(at) => format!("since {}", at.to_rfc3339()),
                },
            ),
            ("New material", self.new_material.to_string()),
        ];
        if let Some(fetch) = &self.fetch {
            items.push(("Fetched", fetch.written.len().to_string()));
            if fetch.unmatched_rows > 0 {
                items.push(("Unmatched rows", fetch.unmatched_rows.to_string()));
            }
        }
        items.push(("Candidates", self.candidates().to_string()));
        items.push(("Completed", self.completed().len().to_string()));
        items.push(("Failed at clean", self.failed_at(Stage::Clean).len().to_string()));
        items.push((
            "Failed at extract",
            self.failed_at(Stage::Extract).len().to_string(),
        ));
        if self.cancelled {
            items.push(("Cancelled", "true".to_string()));
        }
        items.push((
            "Elapsed",
            format!("{}m{}s", self.elapsed_ms / 60_000, (self.elapsed_ms / 1000) % 60),
        ));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, clean: StageOutcome, extract: StageOutcome) -> DocumentReport {
        DocumentReport {
            key: DocumentKey::new(key).unwrap(),
            clean,
            extract,
            artifacts: ArtifactPresence::default(),
        }
    }

    fn report(documents: Vec<DocumentReport>) -> RunReport {
        RunReport {
            material: "18CrMo4".into(),
            mode: DiffMode::Resume,
            new_material: false,
            fetch: None,
            documents,
            cancelled: false,
            started_at: Utc::now(),
            elapsed_ms: 65_000,
        }
    }

    #[test]
    fn counts_failures_per_stage() {
        let report = report(vec![
            doc(
                "A",
                StageOutcome::Failed(FailureReason::CollaboratorError("boom".into())),
                StageOutcome::Skipped(SkipReason::UpstreamFailed),
            ),
            doc("B", StageOutcome::Success, StageOutcome::Success),
            doc(
                "C",
                StageOutcome::Success,
                StageOutcome::Failed(FailureReason::InvalidOutput("not json".into())),
            ),
        ]);

        assert_eq!(report.candidates(), 3);
        assert_eq!(report.completed().len(), 1);
        assert_eq!(report.failed_at(Stage::Clean)[0].as_str(), "A");
        assert_eq!(report.failed_at(Stage::Extract)[0].as_str(), "C");
    }

    #[test]
    fn failure_codes_are_stable() {
        assert_eq!(
            FailureReason::MissingInput(ArtifactKind::Raw).code(),
            "missing-input"
        );
        assert_eq!(
            FailureReason::InvalidOutput(String::new()).code(),
            "invalid-output"
        );
        assert_eq!(
            FailureReason::MissingInput(ArtifactKind::Cleaned).to_string(),
            "missing-input: no cleaned artifact"
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(StageOutcome::Failed(FailureReason::Timeout(30_000))).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"]["code"], "timeout");
        assert_eq!(json["reason"]["detail"], 30_000);
    }

    #[test]
    fn summary_formats_elapsed() {
        let items = report(Vec::new()).summary_items();
        let elapsed = items.iter().find(|(k, _)| *k == "Elapsed").unwrap();
        assert_eq!(elapsed.1, "1m5s");
    }
}
