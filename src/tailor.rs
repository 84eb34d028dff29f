use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ai::{self, AiProvider};
use crate::models::{Posting, TailoredResume};

const TAILOR_MAX_TOKENS: u32 = 8192;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// The only error the orchestrator ever sees from tailoring. Transport
/// details stay inside the adapter; `last_error` carries the final
/// attempt's failure for the log.
#[derive(Debug, Error)]
#[error("tailoring unavailable after {attempts} attempt(s): {last_error}")]
pub struct TailorError {
    pub attempts: u32,
    pub last_error: String,
}

/// Wraps an `AiProvider` with bounded retry and output validation. Each
/// posting gets its own generation call; nothing is cached across
/// postings.
pub struct TailoringAdapter {
    provider: Box<dyn AiProvider>,
    max_attempts: u32,
    base_backoff: Duration,
    max_output_chars: usize,
}

impl TailoringAdapter {
    pub fn new(provider: Box<dyn AiProvider>, max_output_chars: usize) -> Self {
        Self {
            provider,
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_output_chars,
        }
    }

    /// Override the first-retry delay. Tests pass `Duration::ZERO`.
    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    pub fn tailor(
        &self,
        resume_text: &str,
        posting: &Posting,
    ) -> Result<TailoredResume, TailorError> {
        let prompt = ai::tailor_prompt(
            resume_text,
            &posting.title,
            posting.company.as_deref(),
            &posting.description_text,
        );

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = backoff_delay(self.base_backoff, attempt);
                debug!(
                    posting_id = %posting.posting_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying tailoring"
                );
                std::thread::sleep(delay);
            }

            match self.provider.complete(&prompt, TAILOR_MAX_TOKENS) {
                Ok(text) => match validate_output(&text, self.max_output_chars) {
                    Ok(clean) => {
                        let digest = format!("{:x}", Sha256::digest(clean.as_bytes()));
                        return Ok(TailoredResume {
                            tailored_text: clean,
                            digest,
                            generated_at: Utc::now(),
                        });
                    }
                    Err(why) => {
                        warn!(posting_id = %posting.posting_id, attempt, "tailored output rejected: {why}");
                        last_error = why;
                    }
                },
                Err(e) => {
                    warn!(posting_id = %posting.posting_id, attempt, "tailoring call failed: {e:#}");
                    last_error = format!("{e:#}");
                }
            }
        }

        Err(TailorError {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Exponential backoff with uniform jitter: base * 2^(attempt-2), plus up
/// to 25% random spread, clamped to `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return base;
    }
    let exp = attempt.saturating_sub(2).min(16);
    let millis = (base.as_millis() as u64).saturating_mul(1u64 << exp);
    let jitter = rand::thread_rng().gen_range(0..=millis / 4);
    Duration::from_millis(millis + jitter).min(MAX_BACKOFF)
}

fn validate_output(text: &str, max_chars: usize) -> Result<String, String> {
    let clean = text.trim();
    if clean.is_empty() {
        return Err("empty response".to_string());
    }
    let chars = clean.chars().count();
    if chars > max_chars {
        return Err(format!("response too long: {chars} chars (max {max_chars})"));
    }
    Ok(clean.to_string())
}
