//! Suite runner: one browser session, one context per test

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::fixture::{sanitize_test_name, PageProvider, ScreenshotArtifact};
use crate::page::Page;
use crate::report::{
    default_hooks, notify_hooks, run_phase, summarize, Outcome, Phase, PhaseHook, PhaseReport,
    TestReport,
};
use crate::session::BrowserSession;
use crate::target::TargetApp;

/// Body of a test: borrows the page for the duration of the call phase
pub type TestBody = Box<dyn for<'a> Fn(&'a Page) -> BoxFuture<'a, E2eResult<()>> + Send + Sync>;

/// A named browser test
pub struct TestCase {
    pub name: String,
    pub tags: Vec<String>,
    body: TestBody,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a Page) -> BoxFuture<'a, E2eResult<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            tags: Vec::new(),
            body: Box::new(body),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Ordered collection of test cases
#[derive(Debug, Default)]
pub struct Suite {
    cases: Vec<TestCase>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn push(&mut self, case: TestCase) {
        self.cases.push(case);
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Reject suites where two cases would share a screenshot file
    pub fn validate(&self) -> E2eResult<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for case in &self.cases {
            let stem = sanitize_test_name(&case.name);
            if let Some(other) = seen.insert(stem.clone(), case.name.as_str()) {
                return Err(E2eError::Config(format!(
                    "tests {:?} and {:?} both map to screenshot {}.png",
                    other, case.name, stem
                )));
            }
        }
        Ok(())
    }

    /// Cases whose name contains `name` and that carry `tag`, in suite order
    pub fn filter(&self, name: Option<&str>, tag: Option<&str>) -> Vec<&TestCase> {
        self.cases
            .iter()
            .filter(|c| name.map(|n| c.name.contains(n)).unwrap_or(true))
            .filter(|c| tag.map(|t| c.has_tag(t)).unwrap_or(true))
            .collect()
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases: Vec<PhaseReport>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_error: Option<String>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs suites against one shared browser session
pub struct TestRunner {
    config: SuiteConfig,
    provider: PageProvider,
    hooks: Vec<Box<dyn PhaseHook>>,
    name_filter: Option<String>,
    tag_filter: Option<String>,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_config(SuiteConfig::default())
    }

    pub fn with_config(config: SuiteConfig) -> Self {
        Self {
            provider: config.page_provider(),
            config,
            hooks: default_hooks(),
            name_filter: None,
            tag_filter: None,
        }
    }

    /// Replace the phase hooks. Without `RecordPhase` in the list the call
    /// outcome is never attached and teardown treats every test as passed.
    pub fn with_hooks(mut self, hooks: Vec<Box<dyn PhaseHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_filter(mut self, name: Option<String>, tag: Option<String>) -> Self {
        self.name_filter = name;
        self.tag_filter = tag;
        self
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn provider(&self) -> &PageProvider {
        &self.provider
    }

    /// Launch the browser, run the selected cases and close the browser.
    ///
    /// Errors only when the run cannot start: two tests share a screenshot
    /// name, the target is unreachable or the browser fails to launch. Test
    /// failures are in the result.
    pub async fn run(&self, suite: &Suite) -> E2eResult<TestSuiteResult> {
        suite.validate()?;
        if self.config.preflight {
            TargetApp::new(&self.config.base_url).wait_until_reachable().await?;
        }

        let session = BrowserSession::acquire(&self.config.launch).await?;
        let result = self.run_with_session(&session, suite).await;

        if let Err(e) = session.release().await {
            warn!("Failed to close browser: {}", e);
        }
        Ok(result)
    }

    /// Run the selected cases against a session owned by the caller
    pub async fn run_with_session(&self, session: &BrowserSession, suite: &Suite) -> TestSuiteResult {
        let cases = suite.filter(self.name_filter.as_deref(), self.tag_filter.as_deref());
        let started_at = Utc::now();
        let start = Instant::now();

        info!("Running {} test(s)...", cases.len());

        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let result = self.run_case(session, case).await;
            match result.outcome {
                Outcome::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
                Outcome::Skipped => info!("- {} (skipped)", result.name),
                Outcome::Failed => error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            }
            results.push(result);
        }

        let count = |outcome: Outcome| results.iter().filter(|r: &&TestResult| r.outcome == outcome).count();
        let passed = count(Outcome::Passed);
        let failed = count(Outcome::Failed);
        let skipped = count(Outcome::Skipped);
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        TestSuiteResult {
            total: results.len(),
            passed,
            failed,
            skipped,
            started_at,
            duration_ms,
            results,
        }
    }

    /// Run one case through setup, call and teardown
    pub async fn run_case(&self, session: &BrowserSession, case: &TestCase) -> TestResult {
        let started_at = Utc::now();
        let start = Instant::now();
        debug!("Running test: {}", case.name);

        let mut report = TestReport::new(&case.name);
        let mut phases = Vec::with_capacity(3);
        let mut screenshot = None;
        let mut artifact_error = None;

        let (ctx, setup) = run_phase(
            Phase::Setup,
            &mut report,
            &self.hooks,
            self.provider.open(session, &case.name),
        )
        .await;
        phases.push(setup);

        match ctx {
            Some(mut ctx) => {
                let page = ctx.use_page();
                let (_, call) = run_phase(Phase::Call, &mut report, &self.hooks, (case.body)(page)).await;
                phases.push(call);

                let teardown_start = Instant::now();
                let summary = self.provider.teardown(ctx, &report).await;
                let elapsed = teardown_start.elapsed().as_millis() as u64;
                let teardown = match &summary.release_error {
                    Some(e) => PhaseReport::failed(Phase::Teardown, elapsed, e.clone()),
                    None => PhaseReport::passed(Phase::Teardown, elapsed),
                };
                notify_hooks(&mut report, &self.hooks, &teardown);
                phases.push(teardown);

                screenshot = summary.artifact;
                artifact_error = summary.artifact_error;
            }
            None => {
                let skipped = PhaseReport::skipped(Phase::Call, "setup failed");
                notify_hooks(&mut report, &self.hooks, &skipped);
                phases.push(skipped);
            }
        }

        let (outcome, error) = summarize(&phases);
        TestResult {
            name: case.name.clone(),
            outcome,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            phases,
            error,
            screenshot,
            artifact_error,
        }
    }

    /// Write test results to `<output_dir>/test-results.json`
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::E2eError;
    use crate::expect::expect;
    use crate::protocol::ContextId;
    use crate::report::{LogPhase, RecordPhase};
    use crate::testing::ScriptedAutomation;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> TestRunner {
        let mut config = SuiteConfig::default();
        config.screenshot_dir = dir.path().join("screenshots");
        config.output_dir = dir.path().to_path_buf();
        config.preflight = false;
        TestRunner::with_config(config)
    }

    fn passing() -> TestCase {
        TestCase::new("passes", |page| {
            async move {
                page.goto("https://www.saucedemo.com/").await?;
                Ok(())
            }
            .boxed()
        })
    }

    fn failing() -> TestCase {
        TestCase::new("fails", |page| {
            async move {
                expect(&page.locator(".shopping_cart_badge"))
                    .with_timeout(Duration::from_millis(50))
                    .to_have_text("1")
                    .await
            }
            .boxed()
        })
    }

    fn panicking() -> TestCase {
        TestCase::new("panics", |page| {
            async move {
                page.goto("https://www.saucedemo.com/").await?;
                let broken = true;
                if broken {
                    panic!("body blew up");
                }
                Ok(())
            }
            .boxed()
        })
    }

    fn session(automation: &Arc<ScriptedAutomation>) -> BrowserSession {
        BrowserSession::with_automation(automation.clone())
    }

    #[tokio::test]
    async fn test_every_context_released_once() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        let suite = Suite::new().add(passing()).add(failing()).add(panicking());

        let session = session(&automation);
        let result = runner(&dir).run_with_session(&session, &suite).await;
        session.release().await.unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(
            automation.closed_contexts(),
            vec![ContextId(1), ContextId(2), ContextId(3)]
        );
        assert_eq!(automation.count_of("close"), 1);
    }

    #[tokio::test]
    async fn test_screenshot_only_for_failures() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        let suite = Suite::new().add(passing()).add(failing()).add(panicking());

        let result = runner(&dir)
            .run_with_session(&session(&automation), &suite)
            .await;

        let shots = dir.path().join("screenshots");
        assert!(!shots.join("passes.png").exists());
        assert!(shots.join("fails.png").exists());
        assert!(shots.join("panics.png").exists());

        let failed = &result.results[1];
        assert_eq!(failed.outcome, Outcome::Failed);
        assert!(failed.error.as_deref().unwrap().starts_with("call: "));
        assert_eq!(
            failed.screenshot.as_ref().unwrap().path,
            shots.join("fails.png")
        );

        let panicked = &result.results[2];
        assert!(panicked.error.as_deref().unwrap().contains("body blew up"));
        assert!(result.results[0].screenshot.is_none());
    }

    #[tokio::test]
    async fn test_setup_failure_skips_call() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        automation.fail_on("newContext", "browser has been closed");

        let result = runner(&dir)
            .run_with_session(&session(&automation), &Suite::new().add(passing()))
            .await;

        let test = &result.results[0];
        assert_eq!(test.outcome, Outcome::Failed);
        assert_eq!(test.phases.len(), 2);
        assert_eq!(test.phases[1].outcome, Outcome::Skipped);
        assert!(test.error.as_deref().unwrap().starts_with("setup: "));
        assert_eq!(automation.count_of("goto"), 0);
        assert!(automation.closed_contexts().is_empty());
        assert!(!dir.path().join("screenshots").exists());
    }

    #[tokio::test]
    async fn test_missing_record_still_reports_failure() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        let runner = runner(&dir).with_hooks(vec![Box::new(LogPhase)]);

        let result = runner
            .run_with_session(&session(&automation), &Suite::new().add(failing()))
            .await;

        // No record means no screenshot, but the result still shows the failure
        let test = &result.results[0];
        assert_eq!(test.outcome, Outcome::Failed);
        assert!(test.screenshot.is_none());
        assert_eq!(automation.closed_contexts(), vec![ContextId(1)]);
    }

    struct PanicOnCall;

    impl PhaseHook for PanicOnCall {
        fn after_phase(&self, _report: &mut TestReport, result: &PhaseReport) {
            if result.phase == Phase::Call {
                panic!("reporter crashed");
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_hook_does_not_abandon_suite() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        let runner = runner(&dir).with_hooks(vec![
            Box::new(PanicOnCall),
            Box::new(RecordPhase),
            Box::new(LogPhase),
        ]);
        let suite = Suite::new().add(failing()).add(passing());

        let session = session(&automation);
        let result = runner.run_with_session(&session, &suite).await;
        session.release().await.unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.passed, 1);
        assert_eq!(automation.count_of("newContext"), 2);
        assert_eq!(automation.closed_contexts(), vec![ContextId(1), ContextId(2)]);
        assert!(result.results[0].screenshot.is_some());
        assert_eq!(automation.count_of("close"), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_keeps_original_error() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        automation.fail_on("screenshot", "target closed");

        let result = runner(&dir)
            .run_with_session(&session(&automation), &Suite::new().add(failing()))
            .await;

        let test = &result.results[0];
        assert!(test.error.as_deref().unwrap().contains(".shopping_cart_badge"));
        assert!(test.artifact_error.as_deref().unwrap().contains("target closed"));
        assert_eq!(automation.closed_contexts(), vec![ContextId(1)]);
    }

    #[tokio::test]
    async fn test_filter_by_name_and_tag() {
        let suite = Suite::new()
            .add(passing().with_tags(&["smoke"]))
            .add(failing().with_tags(&["cart"]))
            .add(panicking().with_tags(&["smoke", "cart"]));

        let names = |cases: Vec<&TestCase>| cases.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(suite.filter(None, Some("smoke"))), vec!["passes", "panics"]);
        assert_eq!(names(suite.filter(Some("fail"), None)), vec!["fails"]);
        assert_eq!(names(suite.filter(Some("pa"), Some("cart"))), vec!["panics"]);
        assert_eq!(suite.filter(None, None).len(), 3);
    }

    #[test]
    fn test_screenshot_name_collision_rejected() {
        let suite = Suite::new()
            .add(TestCase::new("cart: add item", |_| async { Ok(()) }.boxed()))
            .add(TestCase::new("cart__add_item", |_| async { Ok(()) }.boxed()));
        let err = suite.validate().unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
        assert!(err.to_string().contains("cart__add_item.png"));

        let distinct = Suite::new()
            .add(TestCase::new("löschen", |_| async { Ok(()) }.boxed()))
            .add(TestCase::new("lüschen", |_| async { Ok(()) }.boxed()));
        assert!(distinct.validate().is_ok());
    }

    #[tokio::test]
    async fn test_colliding_suite_never_launches() {
        let dir = TempDir::new().unwrap();
        let suite = Suite::new().add(passing()).add(passing());

        let err = runner(&dir).run(&suite).await.unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }

    #[tokio::test]
    async fn test_write_results() {
        let dir = TempDir::new().unwrap();
        let automation = Arc::new(ScriptedAutomation::new());
        let runner = runner(&dir);
        let result = runner
            .run_with_session(&session(&automation), &Suite::new().add(passing()))
            .await;

        let path = runner.write_results(&result).unwrap();
        assert_eq!(path, dir.path().join("test-results.json"));

        let written: TestSuiteResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.total, 1);
        assert!(written.success());
        assert_eq!(written.results[0].phases.len(), 3);
    }

    #[tokio::test]
    async fn test_launch_failure_aborts_run() {
        let dir = TempDir::new().unwrap();
        let mut config = runner(&dir).config.clone();
        config.launch.node_binary = PathBuf::from("/nonexistent/node-binary");

        let err = TestRunner::with_config(config)
            .run(&Suite::new().add(passing()))
            .await
            .unwrap_err();
        assert!(err.is_fatal_startup());
        assert!(matches!(err, E2eError::PlaywrightNotFound));
        assert!(!dir.path().join("test-results.json").exists());
    }
}
