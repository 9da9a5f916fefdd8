//! Suite configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::driver::LaunchOptions;
use crate::error::{E2eError, E2eResult};
use crate::fixture::PageProvider;
use crate::protocol::Viewport;

pub const DEFAULT_BASE_URL: &str = "https://www.saucedemo.com/";

/// Run profile.
///
/// Profiles differ only in browser visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Headless, for pipelines
    #[default]
    Ci,
    /// Visible browser window for local debugging
    Debug,
}

impl Profile {
    pub fn headless(&self) -> bool {
        matches!(self, Profile::Ci)
    }
}

/// Configuration for a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Root URL of the application under test
    pub base_url: String,

    pub profile: Profile,

    /// Browser launch options; `headless` follows the profile
    pub launch: LaunchOptions,

    /// Where failure screenshots are written
    pub screenshot_dir: PathBuf,

    /// Where `test-results.json` is written
    pub output_dir: PathBuf,

    pub viewport: Viewport,

    /// Per-action timeout inside the browser
    pub action_timeout_ms: u64,

    /// Check the base URL answers before launching the browser
    pub preflight: bool,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

impl SuiteConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let mut config = Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            profile,
            launch: LaunchOptions::default(),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            output_dir: PathBuf::from("test-results"),
            viewport: Viewport::default(),
            action_timeout_ms: 10_000,
            preflight: true,
        };
        config.apply_profile(profile);
        config
    }

    /// Switch profile; only browser visibility changes
    pub fn apply_profile(&mut self, profile: Profile) {
        self.profile = profile;
        self.launch.headless = profile.headless();
    }

    /// Load configuration from a YAML file, falling back to defaults when the
    /// file does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.apply_profile(config.profile);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> E2eResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(E2eError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(E2eError::Config("viewport must be non-empty".to_string()));
        }
        Ok(())
    }

    /// Resolve a path against the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn page_provider(&self) -> PageProvider {
        PageProvider::new(&self.screenshot_dir)
            .with_viewport(self.viewport)
            .with_default_timeout_ms(self.action_timeout_ms)
    }
}
