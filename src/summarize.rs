//! Lab-result summarization: remote text-generation with a deterministic
//! local fallback.
//!
//! The remote path is a quality enhancement only. `Summarizer::summarize`
//! is total — any remote failure (no credential, connection refused,
//! timeout, bad response) is logged and degrades to `fallback_summary`, so
//! the caller never sees a summarization error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{LabResult, Patient};

/// Failures of the remote generation path. Internal to this module's
/// callers: `summarize` absorbs every variant into the fallback.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Cannot reach text-generation service at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed service response: {0}")]
    ResponseParsing(String),

    #[error("Service response contained no completion")]
    EmptyResponse,
}

/// Seam between the summarizer and the completion backend.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerateError>;
}

// ─── Remote generator ─────────────────────────────────────────────────────────

/// Request body for the chat-completions endpoint.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// OpenAI-compatible chat-completions client with a hard request timeout.
pub struct RemoteGenerator {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
}

impl RemoteGenerator {
    pub fn new(config: &AppConfig, api_key: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
            client,
        }
    }
}

impl TextGenerator for RemoteGenerator {
    fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerateError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    GenerateError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    GenerateError::Timeout(self.timeout_secs)
                } else {
                    GenerateError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerateError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| GenerateError::ResponseParsing(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(GenerateError::EmptyResponse)
    }
}

// ─── Summarizer ───────────────────────────────────────────────────────────────

const SYSTEM_INSTRUCTION: &str =
    "You are a medical assistant helping to summarize lab results.";

/// Produces the clinical-summary text for a report.
///
/// Holds an optional remote backend; without one (or whenever the backend
/// errors) it emits the deterministic template summary instead.
pub struct Summarizer {
    remote: Option<Box<dyn TextGenerator>>,
}

impl Summarizer {
    /// Select the backend from configuration: a configured credential
    /// enables the remote path, otherwise no call is ever attempted.
    pub fn from_config(config: &AppConfig) -> Self {
        match &config.openai_api_key {
            Some(key) => Self {
                remote: Some(Box::new(RemoteGenerator::new(config, key.clone()))),
            },
            None => {
                tracing::info!("no API credential configured; summaries are deterministic");
                Self::deterministic()
            }
        }
    }

    /// Fallback-only summarizer. Used in tests and credential-less setups.
    pub fn deterministic() -> Self {
        Self { remote: None }
    }

    /// Summarizer over an explicit backend (tests inject mocks here).
    pub fn with_generator(generator: Box<dyn TextGenerator>) -> Self {
        Self {
            remote: Some(generator),
        }
    }

    /// Summarize lab results for a patient. Total: always returns usable
    /// text regardless of remote-service availability.
    pub fn summarize(&self, records: &[LabResult], patient: &Patient) -> String {
        if let Some(remote) = &self.remote {
            let prompt = build_prompt(records, patient);
            match remote.generate(SYSTEM_INSTRUCTION, &prompt) {
                Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(_) => {
                    tracing::warn!("remote summary was empty; using fallback summary");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "remote summarization failed; using fallback summary");
                }
            }
        }
        fallback_summary(records, patient)
    }
}

/// Build the user prompt: patient identity plus one line per record.
fn build_prompt(records: &[LabResult], patient: &Patient) -> String {
    let lab_text = records
        .iter()
        .map(|r| format!("{}: {} {} (Ref: {})", r.test_name, r.value, r.unit, r.reference_range))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Patient: {}, Age: {}, Gender: {}\n\n\
         Lab Results:\n{}\n\n\
         Please provide a brief medical summary of these lab results, \
         highlighting any abnormal values and their potential significance. \
         Keep it professional and concise.",
        patient.name, patient.age, patient.gender, lab_text
    )
}

/// Deterministic template summary: counts plus a line per abnormal record.
///
/// Guarantees availability and reproducibility independent of third-party
/// uptime. Uses `LabResult::is_abnormal` — the same predicate that drives
/// row highlighting in the composer.
pub fn fallback_summary(records: &[LabResult], patient: &Patient) -> String {
    let total = records.len();
    let abnormal: Vec<&LabResult> = records.iter().filter(|r| r.is_abnormal()).collect();

    let mut summary = format!("Lab Report Summary for {}\n\n", patient.name);
    summary.push_str(&format!("Total Tests Performed: {total}\n"));
    summary.push_str(&format!("Abnormal Results: {}\n", abnormal.len()));
    summary.push_str(&format!("Normal Results: {}\n\n", total - abnormal.len()));

    if abnormal.is_empty() {
        summary.push_str("All test results are within normal ranges.");
    } else {
        summary.push_str("Abnormal Test Results:\n");
        for r in &abnormal {
            summary.push_str(&format!(
                "- {}: {} {} (Expected: {})\n",
                r.test_name, r.value, r.unit, r.reference_range
            ));
        }
    }
    summary
}

// ─── Mock backend for tests ───────────────────────────────────────────────────

/// Scriptable backend: returns a fixed response or a fixed error.
#[cfg(test)]
pub struct MockGenerator {
    outcome: Result<String, fn() -> GenerateError>,
}

#[cfg(test)]
impl MockGenerator {
    pub fn responding(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
        }
    }

    pub fn failing(make_error: fn() -> GenerateError) -> Self {
        Self {
            outcome: Err(make_error),
        }
    }
}

#[cfg(test)]
impl TextGenerator for MockGenerator {
    fn generate(&self, _system: &str, _prompt: &str) -> Result<String, GenerateError> {
        match &self.outcome {
            Ok(text) => Ok(text.clone()),
            Err(make_error) => Err(make_error()),
        }
    }
}
