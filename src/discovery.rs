use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::Posting;
use crate::session::{RawListing, SessionError, SiteSession};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("authentication failed during discovery: {0}")]
    Authentication(String),

    #[error("all {0} keyword searches failed; no postings collected")]
    AllKeywordsFailed(usize),
}

static JOB_URL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/jobs/view/(\d+)").expect("valid job-url pattern"));

/// Searches the configured keywords in order and assembles the run's
/// posting sequence: deduplicated by posting id within the call (first
/// keyword match wins), discovery order preserved.
pub struct PostingDiscovery {
    pub max_per_keyword: usize,
}

impl PostingDiscovery {
    pub fn discover(
        &self,
        session: &mut dyn SiteSession,
        keywords: &[String],
    ) -> Result<Vec<Posting>, DiscoveryError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut postings: Vec<Posting> = Vec::new();
        let mut failed_keywords = 0;

        for keyword in keywords {
            let listings = match session.search(keyword, self.max_per_keyword) {
                Ok(listings) => listings,
                Err(SessionError::Authentication(msg)) => {
                    return Err(DiscoveryError::Authentication(msg));
                }
                Err(e) => {
                    // One broken keyword search must not sink the run;
                    // whatever the other keywords collected stays usable.
                    failed_keywords += 1;
                    warn!(keyword, "keyword search failed: {e}");
                    continue;
                }
            };

            info!(keyword, listings = listings.len(), "search returned listings");

            for raw in listings {
                match build_posting(raw, keyword) {
                    Ok(posting) => {
                        if seen.insert(posting.posting_id.clone()) {
                            postings.push(posting);
                        } else {
                            debug!(
                                keyword,
                                posting_id = %posting.posting_id,
                                "duplicate within discovery, keeping first match"
                            );
                        }
                    }
                    Err(why) => {
                        warn!(keyword, "skipping malformed listing: {why}");
                    }
                }
            }
        }

        if postings.is_empty() && failed_keywords == keywords.len() && !keywords.is_empty() {
            return Err(DiscoveryError::AllKeywordsFailed(failed_keywords));
        }

        Ok(postings)
    }
}

/// A listing is usable once it has a stable id and a title. The id comes
/// from the site-assigned job id, or failing that from the canonical URL;
/// never from rendering details.
fn build_posting(raw: RawListing, keyword: &str) -> Result<Posting, String> {
    let posting_id = match raw.site_job_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => derive_id_from_url(raw.url.as_deref())?,
    };

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or("listing has no title")?
        .to_string();

    let url = raw
        .url
        .unwrap_or_else(|| format!("https://www.linkedin.com/jobs/view/{posting_id}/"));

    Ok(Posting {
        posting_id,
        url,
        title,
        company: raw
            .company
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        description_text: raw.description_text.unwrap_or_default(),
        keyword_matched: keyword.to_string(),
        applied_marker: raw.applied_marker,
        discovered_at: Utc::now(),
    })
}

fn derive_id_from_url(url: Option<&str>) -> Result<String, String> {
    let url = url.ok_or("listing has neither job id nor URL")?;
    JOB_URL_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| format!("no job id derivable from URL '{url}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TailoredResume;
    use crate::session::SubmitOutcome;

    /// Keyword -> scripted search result.
    struct FakeSession {
        results: Vec<Result<Vec<RawListing>, SessionError>>,
    }

    impl SiteSession for FakeSession {
        fn login(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        fn search(&mut self, _: &str, _: usize) -> Result<Vec<RawListing>, SessionError> {
            self.results.remove(0)
        }

        fn submit(
            &mut self,
            _: &Posting,
            _: &TailoredResume,
        ) -> Result<SubmitOutcome, SessionError> {
            unreachable!("discovery never submits")
        }

        fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn listing(id: &str, title: &str) -> RawListing {
        RawListing {
            site_job_id: Some(id.to_string()),
            url: Some(format!("https://www.linkedin.com/jobs/view/{id}/")),
            title: Some(title.to_string()),
            company: Some("Acme".to_string()),
            description_text: Some("a job".to_string()),
            applied_marker: false,
        }
    }

    fn keywords(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedups_across_keywords_first_match_wins() {
        let mut session = FakeSession {
            results: vec![
                Ok(vec![listing("1", "Data Engineer"), listing("2", "Pipelines")]),
                Ok(vec![listing("2", "Pipelines"), listing("3", "Backend")]),
            ],
        };
        let discovery = PostingDiscovery { max_per_keyword: 10 };
        let postings = discovery
            .discover(&mut session, &keywords(&["Data Engineer", "Backend Engineer"]))
            .unwrap();

        let ids: Vec<_> = postings.iter().map(|p| p.posting_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(postings[1].keyword_matched, "Data Engineer");
    }

    #[test]
    fn malformed_listings_are_skipped_not_fatal() {
        let no_id = RawListing {
            site_job_id: None,
            url: Some("https://www.linkedin.com/jobs/collections/".to_string()),
            title: Some("View all".to_string()),
            ..Default::default()
        };
        let no_title = RawListing {
            site_job_id: Some("9".to_string()),
            title: Some("   ".to_string()),
            ..Default::default()
        };
        let mut session = FakeSession {
            results: vec![Ok(vec![no_id, listing("1", "Data Engineer"), no_title])],
        };
        let discovery = PostingDiscovery { max_per_keyword: 10 };
        let postings = discovery
            .discover(&mut session, &keywords(&["Data Engineer"]))
            .unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].posting_id, "1");
    }

    #[test]
    fn id_falls_back_to_canonical_url() {
        let mut raw = listing("0", "Data Engineer");
        raw.site_job_id = None;
        raw.url = Some("https://www.linkedin.com/jobs/view/4242?refId=abc".to_string());
        let posting = build_posting(raw, "Data Engineer").unwrap();
        assert_eq!(posting.posting_id, "4242");
    }

    #[test]
    fn auth_failure_is_fatal() {
        let mut session = FakeSession {
            results: vec![Err(SessionError::Authentication("session expired".into()))],
        };
        let discovery = PostingDiscovery { max_per_keyword: 10 };
        let err = discovery
            .discover(&mut session, &keywords(&["Data Engineer"]))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Authentication(_)));
    }

    #[test]
    fn partial_keyword_failure_keeps_collected_postings() {
        let mut session = FakeSession {
            results: vec![
                Ok(vec![listing("1", "Data Engineer")]),
                Err(SessionError::Layout("cards missing".into())),
            ],
        };
        let discovery = PostingDiscovery { max_per_keyword: 10 };
        let postings = discovery
            .discover(&mut session, &keywords(&["Data Engineer", "Backend Engineer"]))
            .unwrap();
        assert_eq!(postings.len(), 1);
    }

    #[test]
    fn all_keywords_failing_is_fatal() {
        let mut session = FakeSession {
            results: vec![
                Err(SessionError::Layout("cards missing".into())),
                Err(SessionError::Driver("tab crashed".into())),
            ],
        };
        let discovery = PostingDiscovery { max_per_keyword: 10 };
        let err = discovery
            .discover(&mut session, &keywords(&["Data Engineer", "Backend Engineer"]))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::AllKeywordsFailed(2)));
    }

    #[test]
    fn zero_results_is_success() {
        let mut session = FakeSession {
            results: vec![Ok(vec![])],
        };
        let discovery = PostingDiscovery { max_per_keyword: 10 };
        let postings = discovery
            .discover(&mut session, &keywords(&["Data Engineer"]))
            .unwrap();
        assert!(postings.is_empty());
    }
}
