use tracing::{info, warn};

use crate::models::{Posting, TailoredResume, reason};
use crate::session::{SiteSession, SubmitOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Applied,
    RequiresManualStep { reason: String },
    Rejected { reason: String },
}

impl SubmissionResult {
    /// Ambiguous rejections are conservative non-applied outcomes: no
    /// record is written for them, so the posting can be revisited by a
    /// future run.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SubmissionResult::Rejected { reason } if reason == reason::AMBIGUOUS_OUTCOME)
    }
}

/// Performs the multi-step submission for one posting. Exactly one
/// real-world attempt per call; never retries — a retry on an ambiguous
/// failure could double-apply in the real world.
pub struct Submitter;

impl Submitter {
    pub fn submit(
        &self,
        session: &mut dyn SiteSession,
        posting: &Posting,
        resume: &TailoredResume,
    ) -> SubmissionResult {
        match session.submit(posting, resume) {
            Ok(SubmitOutcome::Submitted) => {
                info!(posting_id = %posting.posting_id, title = %posting.title, "application submitted");
                SubmissionResult::Applied
            }
            Ok(SubmitOutcome::ManualInputRequired { detail }) => {
                info!(
                    posting_id = %posting.posting_id,
                    "application needs manual input: {detail}"
                );
                SubmissionResult::RequiresManualStep {
                    reason: reason::MANUAL_STEPS_REQUIRED.to_string(),
                }
            }
            Ok(SubmitOutcome::Discarded { detail }) => {
                info!(
                    posting_id = %posting.posting_id,
                    "application flow abandoned before submit: {detail}"
                );
                SubmissionResult::Rejected {
                    reason: reason::SUBMISSION_REJECTED.to_string(),
                }
            }
            Ok(SubmitOutcome::Ambiguous { detail }) => {
                warn!(
                    posting_id = %posting.posting_id,
                    "submission outcome ambiguous, treating as non-applied: {detail}"
                );
                SubmissionResult::Rejected {
                    reason: reason::AMBIGUOUS_OUTCOME.to_string(),
                }
            }
            Err(e) => {
                // The driver died somewhere inside the flow; whether the
                // submission landed is unknowable from here.
                warn!(
                    posting_id = %posting.posting_id,
                    "session error during submission, outcome unknown: {e}"
                );
                SubmissionResult::Rejected {
                    reason: reason::AMBIGUOUS_OUTCOME.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{RawListing, SessionError};
    use chrono::Utc;

    struct OneShotSession {
        outcome: Option<Result<SubmitOutcome, SessionError>>,
        calls: u32,
    }

    impl SiteSession for OneShotSession {
        fn login(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        fn search(&mut self, _: &str, _: usize) -> Result<Vec<RawListing>, SessionError> {
            Ok(vec![])
        }

        fn submit(
            &mut self,
            _: &Posting,
            _: &TailoredResume,
        ) -> Result<SubmitOutcome, SessionError> {
            self.calls += 1;
            self.outcome.take().expect("submit called more than once")
        }

        fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn posting() -> Posting {
        Posting {
            posting_id: "4001".to_string(),
            url: "https://www.linkedin.com/jobs/view/4001/".to_string(),
            title: "Data Engineer".to_string(),
            company: Some("Acme".to_string()),
            description_text: "pipelines".to_string(),
            keyword_matched: "Data Engineer".to_string(),
            applied_marker: false,
            discovered_at: Utc::now(),
        }
    }

    fn resume() -> TailoredResume {
        TailoredResume {
            tailored_text: "tailored".to_string(),
            digest: "d".repeat(64),
            generated_at: Utc::now(),
        }
    }

    fn run_once(outcome: Result<SubmitOutcome, SessionError>) -> (SubmissionResult, u32) {
        let mut session = OneShotSession {
            outcome: Some(outcome),
            calls: 0,
        };
        let result = Submitter.submit(&mut session, &posting(), &resume());
        (result, session.calls)
    }

    #[test]
    fn submitted_maps_to_applied() {
        let (result, calls) = run_once(Ok(SubmitOutcome::Submitted));
        assert_eq!(result, SubmissionResult::Applied);
        assert_eq!(calls, 1);
    }

    #[test]
    fn manual_input_maps_to_manual_step_reason() {
        let (result, _) = run_once(Ok(SubmitOutcome::ManualInputRequired {
            detail: "unanswerable screening question".to_string(),
        }));
        assert_eq!(
            result,
            SubmissionResult::RequiresManualStep {
                reason: reason::MANUAL_STEPS_REQUIRED.to_string()
            }
        );
        assert!(!result.is_ambiguous());
    }

    #[test]
    fn discarded_maps_to_rejection() {
        let (result, _) = run_once(Ok(SubmitOutcome::Discarded {
            detail: "no submit control reached".to_string(),
        }));
        assert_eq!(
            result,
            SubmissionResult::Rejected {
                reason: reason::SUBMISSION_REJECTED.to_string()
            }
        );
        assert!(!result.is_ambiguous());
    }

    #[test]
    fn ambiguous_outcome_is_flagged() {
        let (result, _) = run_once(Ok(SubmitOutcome::Ambiguous {
            detail: "no confirmation dialog".to_string(),
        }));
        assert!(result.is_ambiguous());
    }

    #[test]
    fn session_error_is_treated_as_ambiguous_without_retry() {
        let (result, calls) = run_once(Err(SessionError::Driver("tab crashed".to_string())));
        assert!(result.is_ambiguous());
        assert_eq!(calls, 1);
    }
}
