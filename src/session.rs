use thiserror::Error;

use crate::models::{Posting, TailoredResume};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The page no longer matches the selectors this client knows.
    #[error("page layout incompatible: {0}")]
    Layout(String),

    #[error("webdriver error: {0}")]
    Driver(String),
}

/// One listing as scraped from a search-results page. Everything is
/// optional; the discovery adapter decides what makes a listing usable.
#[derive(Debug, Clone, Default)]
pub struct RawListing {
    /// Site-assigned job id, the preferred source for `posting_id`.
    pub site_job_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub description_text: Option<String>,
    /// The site's own "Applied" badge on the listing card.
    pub applied_marker: bool,
}

/// Terminal outcome of driving one application flow. `Ambiguous` means a
/// submission may or may not have happened; callers must not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// The form needs input the system cannot supply (e.g. screening
    /// questions outside the fact sheet).
    ManualInputRequired { detail: String },
    /// The flow was abandoned before any submission happened; the draft
    /// application was discarded.
    Discarded { detail: String },
    /// Submit was attempted but no confirmation was observed.
    Ambiguous { detail: String },
}

/// The browser-driving capability, held for exactly one run. The
/// orchestration core only ever sees this trait, so it is testable against
/// an in-memory fake.
pub trait SiteSession {
    fn login(&mut self) -> Result<(), SessionError>;

    /// Search one keyword and scrape up to `limit` listings in page order.
    fn search(&mut self, keyword: &str, limit: usize) -> Result<Vec<RawListing>, SessionError>;

    /// Drive the site's application flow for one posting. Called at most
    /// once per posting per run; implementations must not retry internally
    /// on ambiguous failure.
    fn submit(
        &mut self,
        posting: &Posting,
        resume: &TailoredResume,
    ) -> Result<SubmitOutcome, SessionError>;

    /// Release the underlying driver. Invoked on every exit path.
    fn close(&mut self) -> Result<(), SessionError>;
}
