use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{Html, Selector};
use thirtyfour::prelude::*;
use tracing::{debug, info, warn};

use crate::ai::{self, AiProvider};
use crate::config::Config;
use crate::models::{Posting, TailoredResume};
use crate::session::{RawListing, SessionError, SiteSession, SubmitOutcome};
use crate::store;

const LOGIN_URL: &str = "https://www.linkedin.com/login";
const SEARCH_URL_BASE: &str = "https://www.linkedin.com/jobs/search/";
const MAX_MODAL_STEPS: usize = 6;
const STEP_SETTLE: Duration = Duration::from_secs(2);
const RESUME_SNIPPET_CHARS: usize = 1500;

static CARD_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.job-card-container").expect("valid card selector"));
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a.job-card-list__title, a.job-card-container__link")
        .expect("valid title selector")
});
static COMPANY_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".artdeco-entity-lockup__subtitle, .job-card-container__primary-description")
        .expect("valid company selector")
});
static FOOTER_STATE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".job-card-container__footer-job-state").expect("valid footer selector")
});

fn drv(e: WebDriverError) -> SessionError {
    SessionError::Driver(e.to_string())
}

/// Production `SiteSession`: drives LinkedIn's Easy Apply flow through a
/// WebDriver endpoint. The WebDriver client is async, so the session owns
/// a small runtime and blocks on each interaction; the orchestration core
/// stays synchronous.
pub struct LinkedInSession {
    rt: tokio::runtime::Runtime,
    driver: Option<WebDriver>,
    email: String,
    password: String,
    location: String,
    answerer: ScreeningAnswerer,
    artifacts_dir: PathBuf,
}

impl LinkedInSession {
    /// Connect to the WebDriver endpoint and prepare a logged-out session.
    /// The AI provider answers screening-form questions from the
    /// applicant's fact sheet during `submit`.
    pub fn connect(config: &Config, provider: Box<dyn AiProvider>) -> Result<Self, SessionError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::Driver(format!("failed to start runtime: {e}")))?;

        let webdriver_url = config.webdriver_url.clone();
        let driver = rt.block_on(async {
            let mut caps = DesiredCapabilities::chrome();
            caps.add_arg("--no-sandbox")?;
            caps.add_arg("--start-maximized")?;
            caps.add_arg("--disable-blink-features=AutomationControlled")?;
            WebDriver::new(&webdriver_url, caps).await
        });
        let driver = driver.map_err(drv)?;

        let resume_snippet: String = config
            .resume_text
            .chars()
            .take(RESUME_SNIPPET_CHARS)
            .collect();

        let artifacts_dir = store::project_data_dir()
            .map_err(|e| SessionError::Driver(format!("no data directory: {e}")))?
            .join("applications");

        Ok(Self {
            rt,
            driver: Some(driver),
            email: config.linkedin_email.clone(),
            password: config.linkedin_password.clone(),
            location: config.job_location.clone(),
            answerer: ScreeningAnswerer {
                provider,
                profile: config.user_profile.clone(),
                resume_snippet,
            },
            artifacts_dir,
        })
    }

    fn driver(&self) -> Result<&WebDriver, SessionError> {
        self.driver
            .as_ref()
            .ok_or_else(|| SessionError::Driver("session already closed".to_string()))
    }

    /// Stage the tailored resume on disk so the browser has a file to
    /// upload, under applications/<company>/resume_<id>.txt.
    fn write_resume_artifact(
        &self,
        posting: &Posting,
        resume: &TailoredResume,
    ) -> std::io::Result<PathBuf> {
        let company = sanitize_component(posting.company.as_deref().unwrap_or("Unknown"));
        let folder = self.artifacts_dir.join(company);
        std::fs::create_dir_all(&folder)?;
        let path = folder.join(format!("resume_{}.txt", posting.posting_id));
        std::fs::write(&path, &resume.tailored_text)?;
        Ok(path)
    }
}

impl SiteSession for LinkedInSession {
    fn login(&mut self) -> Result<(), SessionError> {
        let driver = self.driver()?;
        let email = self.email.clone();
        let password = self.password.clone();

        self.rt.block_on(async {
            driver.goto(LOGIN_URL).await.map_err(drv)?;

            let username_field = driver
                .query(By::Id("username"))
                .first()
                .await
                .map_err(|_| SessionError::Authentication("login form did not load".to_string()))?;
            username_field.send_keys(email.as_str()).await.map_err(drv)?;

            driver
                .find(By::Id("password"))
                .await
                .map_err(drv)?
                .send_keys(password.as_str())
                .await
                .map_err(drv)?;
            driver
                .find(By::XPath("//button[@type='submit']"))
                .await
                .map_err(drv)?
                .click()
                .await
                .map_err(drv)?;

            for _ in 0..20 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let url = driver.current_url().await.map_err(drv)?;
                if url.as_str().contains("/feed") {
                    info!("logged in");
                    return Ok(());
                }
            }
            Err(SessionError::Authentication(
                "never reached the feed after login; wrong credentials or a checkpoint challenge"
                    .to_string(),
            ))
        })
    }

    fn search(&mut self, keyword: &str, limit: usize) -> Result<Vec<RawListing>, SessionError> {
        let driver = self.driver()?;
        let url = format!(
            "{SEARCH_URL_BASE}?f_AL=true&f_TPR=r86400&keywords={}&location={}",
            encode_query(keyword),
            encode_query(&self.location)
        );

        self.rt.block_on(async {
            driver.goto(&url).await.map_err(drv)?;
            tokio::time::sleep(STEP_SETTLE).await;

            let current = driver.current_url().await.map_err(drv)?;
            if current.as_str().contains("/login") || current.as_str().contains("authwall") {
                return Err(SessionError::Authentication(
                    "redirected to the login wall during search".to_string(),
                ));
            }

            let html = driver.source().await.map_err(drv)?;
            let mut listings = parse_job_cards(&html, limit);
            if listings.is_empty() {
                if html.contains("No matching jobs found")
                    || html.contains("jobs-search-no-results")
                {
                    return Ok(vec![]);
                }
                return Err(SessionError::Layout(
                    "no job cards and no empty-results banner on the search page".to_string(),
                ));
            }

            // The description only renders in the detail pane after the
            // card is selected.
            for listing in &mut listings {
                let Some(id) = listing.site_job_id.clone() else {
                    continue;
                };
                let sel = format!("div.job-card-container[data-job-id='{id}']");
                let Ok(card) = driver.find(By::Css(sel.as_str())).await else {
                    continue;
                };
                let _ = card.scroll_into_view().await;
                if card.click().await.is_err() {
                    continue;
                }
                tokio::time::sleep(Duration::from_millis(1500)).await;
                if let Ok(detail) = driver.find(By::Id("job-details")).await {
                    if let Ok(text) = detail.text().await {
                        if !text.trim().is_empty() {
                            listing.description_text = Some(text);
                        }
                    }
                }
            }

            Ok(listings)
        })
    }

    fn submit(
        &mut self,
        posting: &Posting,
        resume: &TailoredResume,
    ) -> Result<SubmitOutcome, SessionError> {
        let resume_path = match self.write_resume_artifact(posting, resume) {
            Ok(path) => path,
            Err(e) => {
                // Nothing was attempted, but a definitive-failure record
                // would bury the posting forever; the conservative
                // non-applied outcome keeps it revisitable.
                return Ok(SubmitOutcome::Ambiguous {
                    detail: format!("resume artifact could not be staged: {e}"),
                });
            }
        };

        let opened = {
            let driver = self.driver()?;
            let url = posting.url.clone();
            self.rt.block_on(open_easy_apply(driver, &url))?
        };
        if !opened {
            return Ok(SubmitOutcome::Discarded {
                detail: "no Easy Apply control on the posting page".to_string(),
            });
        }

        let mut submit_clicked = false;
        for _ in 0..MAX_MODAL_STEPS {
            self.rt.block_on(tokio::time::sleep(STEP_SETTLE));

            // Screening questions first: the AI call is blocking, so the
            // fields are collected inside the runtime and answered outside
            // it.
            let pending = {
                let driver = self.driver()?;
                self.rt.block_on(scan_form_questions(driver))?
            };
            for (field, question) in pending {
                match self.answerer.answer(&question) {
                    Some(answer) => {
                        debug!(question = %question, "filling screening answer");
                        let result = self.rt.block_on(field.send_keys(answer.as_str()));
                        if let Err(e) = result {
                            let driver = self.driver()?;
                            self.rt.block_on(discard_application(driver));
                            return Ok(SubmitOutcome::Discarded {
                                detail: format!("driver error before submit: {e}"),
                            });
                        }
                    }
                    None => {
                        let driver = self.driver()?;
                        self.rt.block_on(discard_application(driver));
                        return Ok(SubmitOutcome::ManualInputRequired {
                            detail: format!("no answer for screening question '{question}'"),
                        });
                    }
                }
            }

            {
                let driver = self.driver()?;
                self.rt.block_on(upload_resume(driver, &resume_path));
            }

            let advance = {
                let driver = self.driver()?;
                self.rt.block_on(advance_modal(driver))
            };
            match advance {
                Ok(Advance::SubmitClicked) => {
                    submit_clicked = true;
                    break;
                }
                Ok(Advance::Continued) => {}
                Ok(Advance::NoButtons) => break,
                Err(e) => {
                    let driver = self.driver()?;
                    self.rt.block_on(discard_application(driver));
                    return Ok(SubmitOutcome::Discarded {
                        detail: format!("driver error before submit: {e}"),
                    });
                }
            }
        }

        let driver = self.driver()?;
        if submit_clicked {
            let confirmed = self.rt.block_on(async {
                tokio::time::sleep(STEP_SETTLE).await;
                submission_confirmed(driver).await
            });
            if confirmed {
                Ok(SubmitOutcome::Submitted)
            } else {
                Ok(SubmitOutcome::Ambiguous {
                    detail: "submit clicked but no confirmation observed".to_string(),
                })
            }
        } else {
            self.rt.block_on(discard_application(driver));
            Ok(SubmitOutcome::Discarded {
                detail: "application flow did not reach a submit control".to_string(),
            })
        }
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if let Some(driver) = self.driver.take() {
            self.rt.block_on(driver.quit()).map_err(drv)?;
        }
        Ok(())
    }
}

// --- Screening-question answering ---

struct ScreeningAnswerer {
    provider: Box<dyn AiProvider>,
    profile: Option<String>,
    resume_snippet: String,
}

impl ScreeningAnswerer {
    /// None means the question cannot be answered from the fact sheet and
    /// the application needs a human.
    fn answer(&self, question: &str) -> Option<String> {
        let profile = self.profile.as_deref()?;
        let prompt = ai::screening_answer_prompt(question, profile, &self.resume_snippet);
        match self.provider.complete(&prompt, 64) {
            Ok(raw) => {
                let answer = raw.trim().trim_matches('"').trim().to_string();
                if answer.is_empty() || answer.eq_ignore_ascii_case("unknown") {
                    None
                } else {
                    Some(answer)
                }
            }
            Err(e) => {
                warn!("screening answer generation failed: {e:#}");
                None
            }
        }
    }
}

// --- Page interactions ---

async fn open_easy_apply(driver: &WebDriver, url: &str) -> Result<bool, SessionError> {
    driver.goto(url).await.map_err(drv)?;
    tokio::time::sleep(STEP_SETTLE).await;

    for selector in ["button.jobs-apply-button", "button[aria-label*='Easy Apply']"] {
        let Ok(button) = driver.find(By::Css(selector)).await else {
            continue;
        };
        let text = button.text().await.unwrap_or_default();
        let label = button
            .attr("aria-label")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        if text.contains("Easy Apply") || label.contains("Easy Apply") {
            button.click().await.map_err(drv)?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Visible, empty text inputs paired with their question label. Fields
/// with no identifiable label are left alone.
async fn scan_form_questions(
    driver: &WebDriver,
) -> Result<Vec<(WebElement, String)>, SessionError> {
    let inputs = driver
        .find_all(By::Css(
            "input[type='text'], input[type='number'], textarea",
        ))
        .await
        .map_err(drv)?;

    let mut pending = Vec::new();
    for field in inputs {
        if !field.is_displayed().await.unwrap_or(false) {
            continue;
        }
        let prefilled = field
            .value()
            .await
            .ok()
            .flatten()
            .is_some_and(|v| !v.is_empty());
        if prefilled {
            continue;
        }

        let mut question: Option<String> = None;
        if let Ok(Some(id)) = field.attr("id").await {
            if !id.is_empty() {
                let sel = format!("label[for='{id}']");
                if let Ok(label) = driver.find(By::Css(sel.as_str())).await {
                    if let Ok(text) = label.text().await {
                        let text = text.trim();
                        if !text.is_empty() {
                            question = Some(text.to_string());
                        }
                    }
                }
            }
        }
        if question.is_none() {
            question = field
                .attr("aria-label")
                .await
                .ok()
                .flatten()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
        }

        if let Some(question) = question {
            pending.push((field, question));
        }
    }
    Ok(pending)
}

async fn upload_resume(driver: &WebDriver, path: &std::path::Path) {
    let Ok(inputs) = driver.find_all(By::Css("input[type='file']")).await else {
        return;
    };
    if let Some(input) = inputs.first() {
        if let Err(e) = input.send_keys(path.to_string_lossy().as_ref()).await {
            debug!("resume upload field rejected input: {e}");
        }
    }
}

enum Advance {
    SubmitClicked,
    Continued,
    NoButtons,
}

async fn advance_modal(driver: &WebDriver) -> Result<Advance, SessionError> {
    let buttons = driver
        .find_all(By::XPath(
            "//button[contains(@aria-label, 'Continue') or contains(@aria-label, 'Next') \
             or contains(@aria-label, 'Review') or contains(@aria-label, 'Submit')]",
        ))
        .await
        .map_err(drv)?;
    if buttons.is_empty() {
        return Ok(Advance::NoButtons);
    }

    for button in &buttons {
        let label = button
            .attr("aria-label")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let text = button.text().await.unwrap_or_default();
        if label.contains("Submit application") || text.contains("Submit") {
            // Even a failed click may have landed; the caller resolves it
            // via the confirmation check, never by retrying.
            if let Err(e) = button.click().await {
                warn!("submit click reported an error: {e}");
            }
            return Ok(Advance::SubmitClicked);
        }
    }

    buttons[0].click().await.map_err(drv)?;
    Ok(Advance::Continued)
}

async fn submission_confirmed(driver: &WebDriver) -> bool {
    match driver.source().await {
        Ok(html) => {
            let html = html.to_lowercase();
            html.contains("application was sent") || html.contains("application sent")
        }
        Err(_) => false,
    }
}

/// Best-effort teardown of a half-finished application draft.
async fn discard_application(driver: &WebDriver) {
    if let Ok(dismiss) = driver.find(By::Css("button[aria-label='Dismiss']")).await {
        let _ = dismiss.click().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Ok(confirm) = driver
            .find(By::Css("button[data-control-name='discard_application_confirm_btn']"))
            .await
        {
            let _ = confirm.click().await;
        }
    }
}

// --- Card parsing ---

/// Pull listings out of a rendered search-results page, in page order.
fn parse_job_cards(html: &str, limit: usize) -> Vec<RawListing> {
    let document = Html::parse_document(html);
    let mut listings = Vec::new();

    for card in document.select(&CARD_SEL).take(limit) {
        let site_job_id = card
            .value()
            .attr("data-job-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let (title, url) = match card.select(&TITLE_SEL).next() {
            Some(anchor) => (
                Some(element_text(anchor)),
                anchor.value().attr("href").map(absolute_url),
            ),
            None => (None, None),
        };

        let company = card
            .select(&COMPANY_SEL)
            .next()
            .map(element_text)
            .filter(|c| !c.is_empty());

        let applied_marker = card
            .select(&FOOTER_STATE_SEL)
            .any(|state| element_text(state).contains("Applied"));

        listings.push(RawListing {
            site_job_id,
            url,
            title,
            company,
            description_text: None,
            applied_marker,
        });
    }

    listings
}

fn element_text(el: scraper::ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn absolute_url(href: &str) -> String {
    if href.starts_with('/') {
        format!("https://www.linkedin.com{href}")
    } else {
        href.to_string()
    }
}

fn encode_query(s: &str) -> String {
    s.replace(' ', "%20")
}

fn sanitize_component(name: &str) -> String {
    let clean: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let clean = clean.trim().to_string();
    if clean.is_empty() {
        "Unknown".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARDS_HTML: &str = r#"
        <html><body>
        <div class="job-card-container" data-job-id="4001">
          <a class="job-card-list__title" href="/jobs/view/4001/?refId=x"> Data  Engineer </a>
          <div class="artdeco-entity-lockup__subtitle">Acme Corp</div>
        </div>
        <div class="job-card-container" data-job-id="4002">
          <a class="job-card-container__link" href="https://www.linkedin.com/jobs/view/4002/">Backend Engineer</a>
          <div class="artdeco-entity-lockup__subtitle">Globex</div>
          <ul><li class="job-card-container__footer-job-state">Applied</li></ul>
        </div>
        <div class="job-card-container">
          <span>promoted tile with no link</span>
        </div>
        </body></html>
    "#;

    #[test]
    fn parses_cards_in_page_order() {
        let listings = parse_job_cards(CARDS_HTML, 10);
        assert_eq!(listings.len(), 3);

        assert_eq!(listings[0].site_job_id.as_deref(), Some("4001"));
        assert_eq!(listings[0].title.as_deref(), Some("Data  Engineer"));
        assert_eq!(
            listings[0].url.as_deref(),
            Some("https://www.linkedin.com/jobs/view/4001/?refId=x")
        );
        assert_eq!(listings[0].company.as_deref(), Some("Acme Corp"));
        assert!(!listings[0].applied_marker);

        assert!(listings[1].applied_marker);
        assert_eq!(listings[1].company.as_deref(), Some("Globex"));

        // The promoted tile has no id/title; discovery will drop it.
        assert!(listings[2].site_job_id.is_none());
        assert!(listings[2].title.is_none());
    }

    #[test]
    fn limit_caps_parsed_cards() {
        let listings = parse_job_cards(CARDS_HTML, 1);
        assert_eq!(listings.len(), 1);
    }

    #[test]
    fn no_cards_parses_empty() {
        assert!(parse_job_cards("<html><body></body></html>", 10).is_empty());
    }

    #[test]
    fn sanitize_component_strips_path_hazards() {
        assert_eq!(sanitize_component("Acme, Inc. / EU"), "Acme Inc  EU");
        assert_eq!(sanitize_component("../.."), "Unknown");
    }

    #[test]
    fn query_encoding_handles_spaces() {
        assert_eq!(encode_query("Data Engineer"), "Data%20Engineer");
    }

    #[test]
    #[ignore] // requires a running chromedriver and real credentials
    fn live_session_smoke() {
        let config = crate::config::Config::from_env().expect("configured environment");
        let provider =
            crate::ai::resolve_provider(&config.ai_provider, &config.ai_api_key).unwrap();
        let mut session = LinkedInSession::connect(&config, provider).expect("driver reachable");
        session.login().expect("login");
        let listings = session.search(&config.job_keywords[0], 3).expect("search");
        assert!(listings.len() <= 3);
        session.close().expect("close");
    }
}
