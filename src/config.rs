//! Application configuration, threaded explicitly into each component.
//!
//! Nothing reads ambient environment state after construction: the service,
//! summarizer, and composer all receive an `AppConfig` (or the relevant
//! slice of it) through their constructors.

use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "medreport";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for one report-generation service instance.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// API credential for the remote summarizer. `None` means the
    /// deterministic fallback is used exclusively — no call is attempted.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible completion endpoint.
    pub openai_base_url: String,
    /// Completion model name.
    pub model: String,
    /// Output length bound for the remote summary.
    pub max_tokens: u32,
    /// Sampling temperature for the remote summary.
    pub temperature: f32,
    /// Hard timeout for the remote call. On expiry the call counts as a
    /// failure and the fallback summary is used; the caller never blocks
    /// indefinitely.
    pub request_timeout_secs: u64,
    /// Directory where composed PDF artifacts are written.
    pub reports_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".into(),
            model: "gpt-3.5-turbo".into(),
            max_tokens: 300,
            temperature: 0.7,
            request_timeout_secs: 10,
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl AppConfig {
    /// Build a config from the environment. Only the credential is ambient;
    /// a missing or blank `OPENAI_API_KEY` selects the fallback summarizer.
    pub fn from_env() -> Self {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self {
            openai_api_key,
            ..Self::default()
        }
    }

    /// Override the artifact output directory.
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self
    }
}
