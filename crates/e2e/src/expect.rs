//! Auto-retrying assertions
//!
//! `expect(&locator).to_have_text("Products").await?` re-queries the page until
//! the condition holds or the timeout elapses, so tests do not need explicit
//! waits after navigation.

use std::fmt;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::{E2eError, E2eResult};
use crate::page::{Locator, Page};

pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a text value is compared
#[derive(Debug, Clone)]
pub enum TextMatcher {
    /// Equal after collapsing whitespace
    Exact(String),
    Contains(String),
    Pattern(Regex),
}

impl TextMatcher {
    pub fn contains(text: impl Into<String>) -> Self {
        TextMatcher::Contains(text.into())
    }

    pub fn pattern(pattern: &str) -> E2eResult<Self> {
        Ok(TextMatcher::Pattern(Regex::new(pattern)?))
    }

    pub fn matches(&self, actual: &str) -> bool {
        match self {
            TextMatcher::Exact(expected) => normalize(actual) == normalize(expected),
            TextMatcher::Contains(expected) => normalize(actual).contains(&normalize(expected)),
            TextMatcher::Pattern(re) => re.is_match(actual),
        }
    }
}

impl fmt::Display for TextMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextMatcher::Exact(s) => write!(f, "{:?}", s),
            TextMatcher::Contains(s) => write!(f, "text containing {:?}", s),
            TextMatcher::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for TextMatcher {
    fn from(s: &str) -> Self {
        TextMatcher::Exact(s.to_string())
    }
}

impl From<String> for TextMatcher {
    fn from(s: String) -> Self {
        TextMatcher::Exact(s)
    }
}

impl From<Regex> for TextMatcher {
    fn from(re: Regex) -> Self {
        TextMatcher::Pattern(re)
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn expect(locator: &Locator) -> LocatorAssertions<'_> {
    LocatorAssertions {
        locator,
        timeout: DEFAULT_EXPECT_TIMEOUT,
    }
}

pub fn expect_page(page: &Page) -> PageAssertions<'_> {
    PageAssertions {
        page,
        timeout: DEFAULT_EXPECT_TIMEOUT,
    }
}

/// Poll `probe` until `check` accepts its value or `timeout` elapses.
///
/// Driver errors end the wait immediately. On timeout the last observed value
/// goes into the failure message.
async fn poll<T, P, Fut, C>(timeout: Duration, what: String, mut probe: P, check: C) -> E2eResult<()>
where
    T: fmt::Debug,
    P: FnMut() -> Fut,
    Fut: std::future::Future<Output = E2eResult<T>>,
    C: Fn(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let value = probe().await?;
        if check(&value) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(E2eError::AssertionFailed(format!(
                "{} (last value: {:?}, waited {:?})",
                what, value, timeout
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub struct PageAssertions<'a> {
    page: &'a Page,
    timeout: Duration,
}

impl<'a> PageAssertions<'a> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn to_have_url(self, expected: impl Into<TextMatcher>) -> E2eResult<()> {
        let matcher = expected.into();
        let what = format!("expected page to have URL {}", matcher);
        let page = self.page;
        poll(self.timeout, what, move || page.url(), |url| matcher.matches(url)).await
    }
}

pub struct LocatorAssertions<'a> {
    locator: &'a Locator,
    timeout: Duration,
}

impl<'a> LocatorAssertions<'a> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn to_have_text(self, expected: impl Into<TextMatcher>) -> E2eResult<()> {
        let matcher = expected.into();
        let what = format!("expected {} to have text {}", self.locator, matcher);
        let locator = self.locator;
        poll(
            self.timeout,
            what,
            move || locator.inner_text(),
            |text| text.as_deref().map(|t| matcher.matches(t)).unwrap_or(false),
        )
        .await
    }

    pub async fn to_contain_text(self, expected: &str) -> E2eResult<()> {
        self.to_have_text(TextMatcher::contains(expected)).await
    }

    pub async fn to_have_count(self, expected: usize) -> E2eResult<()> {
        let what = format!("expected {} to have count {}", self.locator, expected);
        let locator = self.locator;
        poll(self.timeout, what, move || locator.count(), |n| *n == expected).await
    }

    pub async fn to_be_visible(self) -> E2eResult<()> {
        let what = format!("expected {} to be visible", self.locator);
        let locator = self.locator;
        poll(self.timeout, what, move || locator.is_visible(), |v| *v).await
    }

    pub async fn to_be_hidden(self) -> E2eResult<()> {
        let what = format!("expected {} to be hidden", self.locator);
        let locator = self.locator;
        poll(self.timeout, what, move || locator.is_visible(), |v| !*v).await
    }

    pub async fn to_have_attribute(self, name: &str, expected: impl Into<TextMatcher>) -> E2eResult<()> {
        let matcher = expected.into();
        let what = format!(
            "expected {} to have attribute {}={}",
            self.locator, name, matcher
        );
        let locator = self.locator;
        poll(
            self.timeout,
            what,
            move || locator.get_attribute(name),
            |value| value.as_deref().map(|v| matcher.matches(v)).unwrap_or(false),
        )
        .await
    }
}
