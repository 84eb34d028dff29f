use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job listing discovered during one run. Transient: only its outcome
/// (an `ApplicationRecord`) is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    /// Stable per-listing identifier, derived from the site-assigned job id
    /// or the canonical URL. Never from volatile rendering details.
    pub posting_id: String,
    pub url: String,
    pub title: String,
    pub company: Option<String>,
    pub description_text: String,
    /// The configured keyword whose search surfaced this posting first.
    pub keyword_matched: String,
    /// The site's own "Applied" badge, read as a secondary signal only.
    /// The tracking store stays authoritative for dedup.
    pub applied_marker: bool,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Applied,
    SkippedError,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::SkippedError => "skipped_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(ApplicationStatus::Applied),
            "skipped_error" => Some(ApplicationStatus::SkippedError),
            _ => None,
        }
    }
}

/// Reason codes stored alongside `skipped_error` records and used in run
/// logs. Ambiguous outcomes are logged with `AMBIGUOUS_OUTCOME` but never
/// stored, so the posting stays eligible for a future run.
pub mod reason {
    pub const TAILORING_UNAVAILABLE: &str = "tailoring_unavailable";
    pub const MANUAL_STEPS_REQUIRED: &str = "manual_steps_required";
    pub const SUBMISSION_REJECTED: &str = "submission_rejected";
    pub const AMBIGUOUS_OUTCOME: &str = "ambiguous_outcome";
}

/// Durable evidence that a posting was processed. Written exactly once per
/// posting id and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub posting_id: String,
    pub title: String,
    pub company: Option<String>,
    pub status: ApplicationStatus,
    pub reason: Option<String>,
    pub keyword_matched: String,
    /// SHA-256 hex of the tailored resume text, for audit without storing
    /// the full text.
    pub resume_digest: Option<String>,
    pub applied_at: String,
}

/// Tailored resume artifact, owned by a single submission attempt.
#[derive(Debug, Clone)]
pub struct TailoredResume {
    pub tailored_text: String,
    pub digest: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Discovery sequence fully evaluated.
    SequenceExhausted,
    /// Daily cap hit; remaining postings left for the next run.
    CapExhausted,
    /// Authentication or discovery failed; the run aborted.
    FatalError,
}

impl StopReason {
    pub fn describe(&self) -> &'static str {
        match self {
            StopReason::SequenceExhausted => "all discovered postings evaluated",
            StopReason::CapExhausted => "daily application cap exhausted",
            StopReason::FatalError => "fatal error aborted the run",
        }
    }
}

/// What one run did, emitted at finalization regardless of how the run
/// ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovered: usize,
    pub applied: usize,
    pub skipped_duplicate: usize,
    pub skipped_error: usize,
    pub remaining_unprocessed: usize,
    pub errors: Vec<String>,
    pub stop_reason: StopReason,
    pub fatal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [ApplicationStatus::Applied, ApplicationStatus::SkippedError] {
            assert_eq!(ApplicationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApplicationStatus::parse("skipped_duplicate"), None);
    }
}
