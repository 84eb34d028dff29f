use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::{DiscoveryError, PostingDiscovery};
use crate::error::RunError;
use crate::models::{
    ApplicationRecord, ApplicationStatus, Posting, RunSummary, StopReason, reason,
};
use crate::session::SiteSession;
use crate::store::{StoreError, TrackingStore};
use crate::submit::{SubmissionResult, Submitter};
use crate::tailor::TailoringAdapter;

/// Listings scraped per keyword search before the in-call dedup.
const MAX_RESULTS_PER_KEYWORD: usize = 25;

/// Ephemeral per-invocation state; discarded once the summary is built.
struct RunState {
    started_at: chrono::DateTime<Utc>,
    cap_remaining: u32,
    discovered: usize,
    applied: usize,
    skipped_duplicate: usize,
    skipped_error: usize,
    errors: Vec<String>,
}

impl RunState {
    fn new(cap: u32) -> Self {
        Self {
            started_at: Utc::now(),
            cap_remaining: cap,
            discovered: 0,
            applied: 0,
            skipped_duplicate: 0,
            skipped_error: 0,
            errors: Vec::new(),
        }
    }
}

/// Drives one complete run: lock → login → discover → per-posting loop →
/// finalize. Strictly sequential; the session and the AI provider are
/// single stateful rate-limited resources.
pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a TrackingStore,
    session: Box<dyn SiteSession>,
    tailor: TailoringAdapter,
    discovery: PostingDiscovery,
    submitter: Submitter,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a TrackingStore,
        session: Box<dyn SiteSession>,
        tailor: TailoringAdapter,
    ) -> Self {
        Self {
            config,
            store,
            session,
            tailor,
            discovery: PostingDiscovery {
                max_per_keyword: MAX_RESULTS_PER_KEYWORD,
            },
            submitter: Submitter,
        }
    }

    /// Execute one run. `Err` is reserved for the pre-run concurrency
    /// guard and store-level failures before anything started; once the
    /// run is underway, fatal errors (authentication, discovery) abort it
    /// but still produce a summary with `fatal` set, so the caller can
    /// always report why the run stopped.
    pub fn run(mut self) -> Result<RunSummary, RunError> {
        let lock = self.store.acquire_run_lock().map_err(|e| match e {
            StoreError::RunInProgress { started_at } => RunError::ConcurrentRun { started_at },
            other => RunError::Store(other),
        })?;

        let mut state = RunState::new(self.config.max_applications_per_day);
        info!(
            cap = state.cap_remaining,
            keywords = ?self.config.job_keywords,
            "run starting"
        );

        let outcome = self.run_inner(&mut state);

        // Finalizing: the session is released on every exit path.
        if let Err(e) = self.session.close() {
            warn!("failed to close site session: {e}");
        }
        drop(lock);

        let (stop_reason, remaining_unprocessed, fatal) = match outcome {
            Ok((stop_reason, remaining)) => (stop_reason, remaining, None),
            Err(e) => {
                error!("run aborted: {e}");
                state.errors.push(e.to_string());
                (StopReason::FatalError, 0, Some(e.to_string()))
            }
        };

        let summary = RunSummary {
            started_at: state.started_at,
            finished_at: Utc::now(),
            discovered: state.discovered,
            applied: state.applied,
            skipped_duplicate: state.skipped_duplicate,
            skipped_error: state.skipped_error,
            remaining_unprocessed,
            errors: state.errors,
            stop_reason,
            fatal,
        };
        info!(
            applied = summary.applied,
            skipped_duplicate = summary.skipped_duplicate,
            skipped_error = summary.skipped_error,
            remaining = summary.remaining_unprocessed,
            "run finished: {}",
            stop_reason.describe()
        );
        Ok(summary)
    }

    fn run_inner(&mut self, state: &mut RunState) -> Result<(StopReason, usize), RunError> {
        self.session
            .login()
            .map_err(|e| RunError::Authentication(e.to_string()))?;

        let postings = self
            .discovery
            .discover(self.session.as_mut(), &self.config.job_keywords)
            .map_err(|e| match e {
                DiscoveryError::Authentication(msg) => RunError::Authentication(msg),
                other => RunError::Discovery(other.to_string()),
            })?;
        state.discovered = postings.len();
        info!(postings = postings.len(), "discovery complete");

        for (index, posting) in postings.iter().enumerate() {
            // Dedup first: the store is the single source of truth.
            if self.store.contains(&posting.posting_id)? {
                info!(posting_id = %posting.posting_id, title = %posting.title, "skipped duplicate");
                state.skipped_duplicate += 1;
                continue;
            }
            if posting.applied_marker {
                // The site claims we applied but the store has no record.
                // The store stays authoritative; the badge is unreliable
                // across sessions.
                warn!(
                    posting_id = %posting.posting_id,
                    "site shows an Applied badge for a posting not in the tracking store; processing anyway"
                );
            }

            if state.cap_remaining == 0 {
                let remaining = postings.len() - index;
                info!(
                    remaining,
                    "application cap exhausted, leaving remaining postings for the next run"
                );
                return Ok((StopReason::CapExhausted, remaining));
            }

            self.process_posting(posting, state)?;
        }

        Ok((StopReason::SequenceExhausted, 0))
    }

    /// Steps c-d for one posting. Tailoring and submission failures are
    /// contained here and become skip outcomes; only store failures
    /// propagate.
    fn process_posting(&mut self, posting: &Posting, state: &mut RunState) -> Result<(), RunError> {
        let resume = match self.tailor.tailor(&self.config.resume_text, posting) {
            Ok(resume) => resume,
            Err(e) => {
                warn!(posting_id = %posting.posting_id, "tailoring unavailable: {e}");
                state
                    .errors
                    .push(format!("{}: {e}", posting.posting_id));
                self.write_record(
                    posting,
                    ApplicationStatus::SkippedError,
                    Some(reason::TAILORING_UNAVAILABLE),
                    None,
                )?;
                state.skipped_error += 1;
                return Ok(());
            }
        };

        match self
            .submitter
            .submit(self.session.as_mut(), posting, &resume)
        {
            SubmissionResult::Applied => {
                self.write_record(
                    posting,
                    ApplicationStatus::Applied,
                    None,
                    Some(resume.digest.as_str()),
                )?;
                state.cap_remaining -= 1;
                state.applied += 1;
            }
            result if result.is_ambiguous() => {
                // Not a definitive conclusion: no record, so a future run
                // may revisit this posting.
                state.errors.push(format!(
                    "{}: submission outcome ambiguous",
                    posting.posting_id
                ));
            }
            SubmissionResult::RequiresManualStep { reason }
            | SubmissionResult::Rejected { reason } => {
                self.write_record(
                    posting,
                    ApplicationStatus::SkippedError,
                    Some(reason.as_str()),
                    None,
                )?;
                state.skipped_error += 1;
            }
        }
        Ok(())
    }

    fn write_record(
        &self,
        posting: &Posting,
        status: ApplicationStatus,
        skip_reason: Option<&str>,
        resume_digest: Option<&str>,
    ) -> Result<(), RunError> {
        let record = ApplicationRecord {
            posting_id: posting.posting_id.clone(),
            title: posting.title.clone(),
            company: posting.company.clone(),
            status,
            reason: skip_reason.map(str::to_string),
            keyword_matched: posting.keyword_matched.clone(),
            resume_digest: resume_digest.map(str::to_string),
            applied_at: Utc::now().to_rfc3339(),
        };
        match self.store.record(&record) {
            Ok(()) => Ok(()),
            Err(StoreError::Duplicate { posting_id }) => {
                // Records are immutable; an existing row wins.
                warn!(%posting_id, "record already exists, keeping the original");
                Ok(())
            }
            Err(e) => Err(RunError::Store(e)),
        }
    }
}
