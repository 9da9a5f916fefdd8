//! Sauce Demo E2E Test Suite
//!
//! This crate drives a real browser against the Sauce Demo storefront:
//! - One browser process per run, launched through a Playwright bridge
//! - A fresh browsing context and page for every test
//! - A full-page screenshot for every test whose body failed
//! - Auto-retrying `expect` assertions, basic accessibility audits
//! - k6-style API smoke and load checks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TestRunner (Rust)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserSession::acquire() ── node bridge ── Playwright     │
//! │    for each TestCase:                                       │
//! │      setup     PageProvider::open() -> TestContext          │
//! │      call      body(&Page) -> E2eResult<()>                 │
//! │      teardown  PageProvider::teardown(ctx, &TestReport)     │
//! │                  ├── call failed? screenshot <test>.png     │
//! │                  └── release context (always)               │
//! │  BrowserSession::release()                                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_phase + PhaseHook: Setup / Call / Teardown records     │
//! │  attached to an explicit TestReport                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod accessibility;
pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod expect;
pub mod fixture;
pub mod page;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod session;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::{Profile, SuiteConfig};
pub use error::{E2eError, E2eResult};
pub use expect::{expect, expect_page, TextMatcher};
pub use fixture::{PageProvider, ScreenshotArtifact, TestContext};
pub use page::{Locator, Page};
pub use report::{Outcome, Phase, PhaseHook, PhaseReport, TestReport};
pub use runner::{Suite, TestCase, TestResult, TestRunner, TestSuiteResult};
pub use session::BrowserSession;
