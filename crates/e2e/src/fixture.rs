//! Per-test browsing context and page, with screenshot capture on failure
//!
//! ```text
//! Created ──> InUse ──> OutcomeObserved ──> [ArtifactCaptured] ──> Released
//!    │          │               │                                    ^
//!    └──────────┴───────────────┴──────── (error / panic) ───────────┘
//! ```
//!
//! `Released` is reached from every state. [`PageProvider::teardown`] consumes
//! the context, so a context cannot be torn down twice, and a context that is
//! dropped without teardown still gets closed in the background.

use std::fmt;
use std::io::Cursor;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::page::Page;
use crate::protocol::{Automation, Command, ContextId, PageId, Viewport};
use crate::report::{panic_message, TestReport};
use crate::session::BrowserSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Created,
    InUse,
    OutcomeObserved,
    ArtifactCaptured,
    Released,
}

/// An isolated browsing context with its single page, owned by one test
pub struct TestContext {
    test: String,
    context: ContextId,
    page: Page,
    automation: Arc<dyn Automation>,
    state: ContextState,
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("test", &self.test)
            .field("context", &self.context)
            .field("page", &self.page.id())
            .field("state", &self.state)
            .finish()
    }
}

impl TestContext {
    pub fn id(&self) -> ContextId {
        self.context
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn test_name(&self) -> &str {
        &self.test
    }

    /// Hand the page to the test body
    pub fn use_page(&mut self) -> &Page {
        self.state = ContextState::InUse;
        &self.page
    }

    /// Close the context. Only the first call reaches the browser.
    async fn release(&mut self) -> E2eResult<()> {
        if self.state == ContextState::Released {
            return Err(E2eError::ContextReleased(self.context.to_string()));
        }
        self.state = ContextState::Released;
        debug!("Releasing {} of {}", self.context, self.test);
        self.automation
            .execute(Command::CloseContext {
                context: self.context,
            })
            .await?;
        Ok(())
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if self.state == ContextState::Released {
            return;
        }
        warn!(
            "{} of {} dropped in state {:?}; closing it in the background",
            self.context, self.test, self.state
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let automation = Arc::clone(&self.automation);
                let context = self.context;
                handle.spawn(async move {
                    if let Err(e) = automation.execute(Command::CloseContext { context }).await {
                        warn!("Background close of {} failed: {}", context, e);
                    }
                });
            }
            Err(_) => warn!("No runtime available; {} is left to the browser shutdown", self.context),
        }
    }
}

/// A screenshot written for a failing test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotArtifact {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ScreenshotArtifact {
    fn describe(path: PathBuf, png: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(png);

        let dimensions = image::io::Reader::new(Cursor::new(png))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());

        Self {
            path,
            sha256: hex::encode(hasher.finalize()),
            bytes: png.len() as u64,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
        }
    }
}

/// What happened during teardown.
///
/// Nothing in here affects the test's pass/fail result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeardownSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ScreenshotArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_error: Option<String>,
}

/// Creates a fresh context and page per test and cleans up after it
#[derive(Debug, Clone)]
pub struct PageProvider {
    screenshot_dir: PathBuf,
    viewport: Viewport,
    default_timeout_ms: u64,
    full_page: bool,
}

impl PageProvider {
    pub fn new(screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            screenshot_dir: screenshot_dir.into(),
            viewport: Viewport::default(),
            default_timeout_ms: 10_000,
            full_page: true,
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Playwright's per-action timeout inside each context
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    /// Where the failure screenshot of `test` goes
    pub fn artifact_path(&self, test: &str) -> PathBuf {
        self.screenshot_dir.join(format!("{}.png", sanitize_test_name(test)))
    }

    /// Create the context and page for one test
    pub async fn open(&self, session: &BrowserSession, test: &str) -> E2eResult<TestContext> {
        let automation = session.automation();

        let reply = automation
            .execute(Command::NewContext {
                viewport: self.viewport,
                default_timeout_ms: self.default_timeout_ms,
            })
            .await?;
        let context = ContextId(handle(reply, "newContext")?);

        let page = match automation.execute(Command::NewPage { context }).await {
            Ok(reply) => handle(reply, "newPage").map(PageId),
            Err(e) => Err(e),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = automation.execute(Command::CloseContext { context }).await {
                    warn!("Failed to close {} after page creation failed: {}", context, close_err);
                }
                return Err(e);
            }
        };

        debug!("Opened {} / {} for {}", context, page, test);

        Ok(TestContext {
            test: test.to_string(),
            context,
            page: Page::new(Arc::clone(&automation), page),
            automation,
            state: ContextState::Created,
        })
    }

    /// Observe the call outcome, capture a screenshot if it failed, then
    /// release the context.
    ///
    /// Never fails: capture problems are logged and reported in the summary,
    /// and the release always runs.
    pub async fn teardown(&self, mut ctx: TestContext, report: &TestReport) -> TeardownSummary {
        let observed = AssertUnwindSafe(self.observe_and_capture(&mut ctx, report))
            .catch_unwind()
            .await;

        let mut summary = TeardownSummary::default();
        match observed {
            Ok(Ok(artifact)) => summary.artifact = artifact,
            Ok(Err(e)) => {
                warn!("Could not capture screenshot for {}: {}", ctx.test, e);
                summary.artifact_error = Some(e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Screenshot capture for {} {}", ctx.test, message);
                summary.artifact_error = Some(message);
            }
        }

        if let Err(e) = ctx.release().await {
            warn!("Failed to release {} of {}: {}", ctx.context, ctx.test, e);
            summary.release_error = Some(e.to_string());
        }
        summary
    }

    async fn observe_and_capture(
        &self,
        ctx: &mut TestContext,
        report: &TestReport,
    ) -> E2eResult<Option<ScreenshotArtifact>> {
        let failed = report.call_failed();
        ctx.state = ContextState::OutcomeObserved;
        if !failed {
            return Ok(None);
        }

        let artifact = self.capture(&ctx.page, &ctx.test).await?;
        ctx.state = ContextState::ArtifactCaptured;
        Ok(Some(artifact))
    }

    /// Write a full-page screenshot of `page` as `<test>.png`, replacing any
    /// earlier file of the same name
    pub async fn capture(&self, page: &Page, test: &str) -> E2eResult<ScreenshotArtifact> {
        let png = page.screenshot(self.full_page).await?;

        std::fs::create_dir_all(&self.screenshot_dir)?;
        let path = self.artifact_path(test);
        std::fs::write(&path, &png)?;

        let artifact = ScreenshotArtifact::describe(path, &png);
        info!("Screenshot saved: {}", artifact.path.display());
        Ok(artifact)
    }
}

/// Map a test name onto a safe file stem.
///
/// Letters and digits of any script are kept. Distinct names can still map
/// to the same stem (`"a b"` and `"a_b"`); [`Suite::validate`] rejects such
/// suites.
///
/// [`Suite::validate`]: crate::runner::Suite::validate
pub fn sanitize_test_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn handle(reply: Value, what: &str) -> E2eResult<u64> {
    reply
        .as_u64()
        .ok_or_else(|| E2eError::Protocol(format!("{} returned {} instead of a handle", what, reply)))
}
