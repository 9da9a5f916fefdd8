//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser failed to launch: {0}")]
    BrowserLaunch(String),

    #[error("Target application unreachable at {url} after {attempts} attempts")]
    TargetUnreachable { url: String, attempts: usize },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Browsing context {0} was already released")]
    ContextReleased(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl E2eError {
    /// Whether the error belongs to the fatal-startup class that aborts a run
    /// before any test executes.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            E2eError::PlaywrightNotFound
                | E2eError::BrowserLaunch(_)
                | E2eError::TargetUnreachable { .. }
        )
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
