use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

// --- Provider trait ---

pub trait AiProvider: std::fmt::Debug {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

/// Resolve a configured provider name to a concrete client. The API key
/// comes from the validated config; providers never read the environment
/// themselves.
pub fn resolve_provider(name: &str, api_key: &str) -> Result<Box<dyn AiProvider>> {
    match name {
        "gemini" => Ok(Box::new(GeminiProvider::new(api_key, GEMINI_DEFAULT_MODEL))),
        "groq" => Ok(Box::new(GroqProvider::new(api_key, GROQ_DEFAULT_MODEL))),
        _ => Err(anyhow!(
            "Unknown AI provider '{}'. Available: gemini (default), groq",
            name
        )),
    }
}

// --- Gemini provider ---

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model_id: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl AiProvider for GeminiProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: max_tokens,
            },
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model_id, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: GeminiResponse = response
            .json()
            .context("Failed to parse Gemini API response")?;

        api_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|part| part.text.clone())
            .ok_or_else(|| anyhow!("No content in Gemini API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Groq provider (OpenAI-compatible chat completions) ---

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Serialize)]
struct GroqMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct GroqRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<GroqMessage>,
}

#[derive(Debug, Deserialize)]
struct GroqResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqResponseMessage,
}

#[derive(Debug, Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Debug)]
pub struct GroqProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GroqProvider {
    pub fn new(api_key: &str, model_id: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl AiProvider for GroqProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = GroqRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![GroqMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(GROQ_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to Groq API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Groq API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: GroqResponse = response
            .json()
            .context("Failed to parse Groq API response")?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in Groq API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Prompt builders ---

pub fn tailor_prompt(
    resume_text: &str,
    title: &str,
    company: Option<&str>,
    job_description: &str,
) -> String {
    let employer = company.unwrap_or("the employer");
    format!(
        "You are an expert resume writer. Rewrite the resume below so it is \
        tailored to the job posting.\n\n\
        RULES:\n\
        - Stay 100% truthful; use only facts from the provided resume\n\
        - Emphasize experience and keywords relevant to this posting\n\
        - Return ONLY the clean resume text body, no commentary\n\n\
        Job Title: {title}\n\
        Employer: {employer}\n\n\
        Job Posting:\n{job_description}\n\n\
        Resume:\n{resume_text}",
    )
}

/// Prompt for answering a single screening-form question from the
/// applicant's fact sheet. Answers are expected to be very short so they
/// fit free-text form fields.
pub fn screening_answer_prompt(question: &str, profile: &str, resume_snippet: &str) -> String {
    format!(
        "You are a job applicant filling an application form. Answer this \
        form question using your profile facts.\n\
        Question: {question}\n\n\
        YOUR FACTS:\n{profile}\n\n\
        Resume snippet:\n{resume_snippet}\n\n\
        INSTRUCTIONS:\n\
        1. Answer with ONLY the value the form expects (a number, a count \
        of days, a city, a yes/no).\n\
        2. Keep the answer extremely concise (1-5 words).\n\
        3. If the facts do not cover the question, output exactly: UNKNOWN\n\
        Answer:",
    )
}
