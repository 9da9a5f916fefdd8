//! Wire types shared with the automation layer
//!
//! Every browser interaction is expressed as a [`Command`]. The Playwright
//! bridge receives them as one JSON object per line:
//!
//! ```text
//! -> {"id":7,"method":"fill","page":2,"locator":[{"kind":"css","selector":"[data-test=\"username\"]"}],"value":"standard_user"}
//! <- {"id":7,"result":null}
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::E2eResult;

/// Handle of a browsing context owned by the automation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

/// Handle of a page owned by the automation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(format!("unknown browser '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// One hop of a locator chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocatorStep {
    Css { selector: String },
    Nth { index: usize },
}

/// A chain of locator hops, resolved left to right from the page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorPath(Vec<LocatorStep>);

impl LocatorPath {
    pub fn css(selector: impl Into<String>) -> Self {
        Self(vec![LocatorStep::Css { selector: selector.into() }])
    }

    pub fn then_css(&self, selector: impl Into<String>) -> Self {
        let mut steps = self.0.clone();
        steps.push(LocatorStep::Css { selector: selector.into() });
        Self(steps)
    }

    pub fn then_nth(&self, index: usize) -> Self {
        let mut steps = self.0.clone();
        steps.push(LocatorStep::Nth { index });
        Self(steps)
    }

    pub fn steps(&self) -> &[LocatorStep] {
        &self.0
    }
}

impl fmt::Display for LocatorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" >> ")?;
            }
            match step {
                LocatorStep::Css { selector } => write!(f, "{}", selector)?,
                LocatorStep::Nth { index } => write!(f, "nth={}", index)?,
            }
        }
        Ok(())
    }
}

/// A request to the automation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Command {
    Launch { browser: BrowserKind, headless: bool },
    NewContext { viewport: Viewport, default_timeout_ms: u64 },
    NewPage { context: ContextId },
    CloseContext { context: ContextId },
    Goto { page: PageId, url: String },
    Url { page: PageId },
    Fill { page: PageId, locator: LocatorPath, value: String },
    Click { page: PageId, locator: LocatorPath },
    InnerText { page: PageId, locator: LocatorPath },
    Count { page: PageId, locator: LocatorPath },
    IsVisible { page: PageId, locator: LocatorPath },
    GetAttribute { page: PageId, locator: LocatorPath, name: String },
    /// Reply is the base64-encoded PNG
    Screenshot { page: PageId, full_page: bool },
    Close,
}

impl Command {
    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            Command::Launch { .. } => "launch",
            Command::NewContext { .. } => "newContext",
            Command::NewPage { .. } => "newPage",
            Command::CloseContext { .. } => "closeContext",
            Command::Goto { .. } => "goto",
            Command::Url { .. } => "url",
            Command::Fill { .. } => "fill",
            Command::Click { .. } => "click",
            Command::InnerText { .. } => "innerText",
            Command::Count { .. } => "count",
            Command::IsVisible { .. } => "isVisible",
            Command::GetAttribute { .. } => "getAttribute",
            Command::Screenshot { .. } => "screenshot",
            Command::Close => "close",
        }
    }

    /// Short name used in logs and timeout errors
    pub fn name(&self) -> String {
        match self {
            Command::Launch { browser, .. } => format!("launch:{}", browser.as_str()),
            Command::NewContext { .. } => "newContext".to_string(),
            Command::NewPage { context } => format!("newPage:{}", context),
            Command::CloseContext { context } => format!("closeContext:{}", context),
            Command::Goto { url, .. } => format!("goto:{}", url),
            Command::Url { .. } => "url".to_string(),
            Command::Fill { locator, .. } => format!("fill:{}", locator),
            Command::Click { locator, .. } => format!("click:{}", locator),
            Command::InnerText { locator, .. } => format!("innerText:{}", locator),
            Command::Count { locator, .. } => format!("count:{}", locator),
            Command::IsVisible { locator, .. } => format!("isVisible:{}", locator),
            Command::GetAttribute { locator, name, .. } => {
                format!("getAttribute:{}@{}", locator, name)
            }
            Command::Screenshot { .. } => "screenshot".to_string(),
            Command::Close => "close".to_string(),
        }
    }
}

/// Envelope written to the bridge
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub command: &'a Command,
}

/// Envelope read back from the bridge
#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// The browser automation layer.
///
/// All browser work funnels through `execute`: one command, one reply. The
/// production implementation is [`crate::driver::PlaywrightDriver`].
#[async_trait]
pub trait Automation: Send + Sync {
    async fn execute(&self, command: Command) -> E2eResult<Value>;
}
