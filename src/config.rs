use std::path::PathBuf;

use anyhow::{Context, Result, bail};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_JOB_LOCATION: &str = "Remote";
pub const DEFAULT_MAX_TAILORED_CHARS: usize = 20_000;

/// Application configuration, built once at start-up from the environment
/// (a `.env` file is honored if present). No other component reads ambient
/// environment state; everything flows through this struct.
#[derive(Debug, Clone)]
pub struct Config {
    pub linkedin_email: String,
    pub linkedin_password: String,
    /// "gemini" (default) or "groq".
    pub ai_provider: String,
    pub ai_api_key: String,
    pub resume_path: PathBuf,
    /// Base resume text, read and validated at start-up.
    pub resume_text: String,
    /// Optional fact sheet used to answer screening questions.
    pub user_profile: Option<String>,
    pub job_keywords: Vec<String>,
    pub job_location: String,
    pub max_applications_per_day: u32,
    pub max_tailored_chars: usize,
    pub webdriver_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate a config from a key lookup. Split out from
    /// `from_env` so tests can supply variables without touching the
    /// process environment.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| -> Result<String> {
            get(key).with_context(|| format!("required environment variable '{key}' is not set"))
        };

        let linkedin_email = require("LINKEDIN_EMAIL")?;
        let linkedin_password = require("LINKEDIN_PASSWORD")?;
        let ai_api_key = require("AI_API_KEY")?;

        let ai_provider = get("AI_PROVIDER").unwrap_or_else(|| "gemini".to_string());
        if !matches!(ai_provider.as_str(), "gemini" | "groq") {
            bail!("AI_PROVIDER must be 'gemini' or 'groq', got '{ai_provider}'");
        }

        let resume_path = PathBuf::from(require("RESUME_PATH")?);
        let resume_text = std::fs::read_to_string(&resume_path)
            .with_context(|| format!("failed to read resume file: {}", resume_path.display()))?;
        if resume_text.trim().is_empty() {
            bail!("resume file is empty: {}", resume_path.display());
        }

        let user_profile = match get("USER_PROFILE_PATH") {
            Some(path) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read user profile file: {path}"))?,
            ),
            None => None,
        };

        let job_keywords = parse_keywords(&require("JOB_KEYWORDS")?);
        if job_keywords.is_empty() {
            bail!("JOB_KEYWORDS must contain at least one keyword");
        }

        let max_applications_per_day = require("MAX_APPLICATIONS_PER_DAY")?
            .parse::<u32>()
            .context("MAX_APPLICATIONS_PER_DAY must be a positive integer")?;
        if max_applications_per_day == 0 {
            bail!("MAX_APPLICATIONS_PER_DAY must be at least 1");
        }

        let max_tailored_chars = match get("MAX_TAILORED_CHARS") {
            Some(raw) => {
                let n = raw
                    .parse::<usize>()
                    .context("MAX_TAILORED_CHARS must be a positive integer")?;
                if n == 0 {
                    bail!("MAX_TAILORED_CHARS must be at least 1");
                }
                n
            }
            None => DEFAULT_MAX_TAILORED_CHARS,
        };

        Ok(Config {
            linkedin_email,
            linkedin_password,
            ai_provider,
            ai_api_key,
            resume_path,
            resume_text,
            user_profile,
            job_keywords,
            job_location: get("JOB_LOCATION").unwrap_or_else(|| DEFAULT_JOB_LOCATION.to_string()),
            max_applications_per_day,
            max_tailored_chars,
            webdriver_url: get("WEBDRIVER_URL")
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
        })
    }
}

/// Ordered, comma-separated keyword list. Surrounding whitespace and
/// quotes are stripped; empty entries dropped.
fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().trim_matches('"').trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}
