//! Page handle and locators handed to test bodies

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{E2eError, E2eResult};
use crate::protocol::{Automation, Command, LocatorPath, PageId};

/// A single tab inside a browsing context
#[derive(Clone)]
pub struct Page {
    automation: Arc<dyn Automation>,
    id: PageId,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("id", &self.id).finish()
    }
}

impl Page {
    pub(crate) fn new(automation: Arc<dyn Automation>, id: PageId) -> Self {
        Self { automation, id }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Navigate to an absolute URL
    pub async fn goto(&self, url: &str) -> E2eResult<()> {
        self.automation
            .execute(Command::Goto {
                page: self.id,
                url: url.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Current URL of the page
    pub async fn url(&self) -> E2eResult<String> {
        let reply = self.automation.execute(Command::Url { page: self.id }).await?;
        decode(reply, "url")
    }

    pub fn locator(&self, selector: &str) -> Locator {
        Locator {
            page: self.clone(),
            path: LocatorPath::css(selector),
        }
    }

    /// Capture the page as PNG bytes
    pub async fn screenshot(&self, full_page: bool) -> E2eResult<Vec<u8>> {
        let reply = self
            .automation
            .execute(Command::Screenshot {
                page: self.id,
                full_page,
            })
            .await?;
        let encoded: String = decode(reply, "screenshot")?;
        Ok(STANDARD.decode(encoded.as_bytes())?)
    }
}

/// A lazily resolved element query.
///
/// Nothing is looked up until an action or query runs; `nth` and `locator`
/// only extend the chain.
#[derive(Clone, Debug)]
pub struct Locator {
    page: Page,
    path: LocatorPath,
}

impl Locator {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn path(&self) -> &LocatorPath {
        &self.path
    }

    /// Narrow to descendants matching `selector`
    pub fn locator(&self, selector: &str) -> Locator {
        Locator {
            page: self.page.clone(),
            path: self.path.then_css(selector),
        }
    }

    pub fn nth(&self, index: usize) -> Locator {
        Locator {
            page: self.page.clone(),
            path: self.path.then_nth(index),
        }
    }

    pub fn first(&self) -> Locator {
        self.nth(0)
    }

    pub async fn fill(&self, value: &str) -> E2eResult<()> {
        self.page
            .automation
            .execute(Command::Fill {
                page: self.page.id,
                locator: self.path.clone(),
                value: value.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn click(&self) -> E2eResult<()> {
        self.page
            .automation
            .execute(Command::Click {
                page: self.page.id,
                locator: self.path.clone(),
            })
            .await?;
        Ok(())
    }

    /// Rendered text of the first match, `None` when nothing matches
    pub async fn inner_text(&self) -> E2eResult<Option<String>> {
        let reply = self
            .page
            .automation
            .execute(Command::InnerText {
                page: self.page.id,
                locator: self.path.clone(),
            })
            .await?;
        decode(reply, "innerText")
    }

    pub async fn count(&self) -> E2eResult<usize> {
        let reply = self
            .page
            .automation
            .execute(Command::Count {
                page: self.page.id,
                locator: self.path.clone(),
            })
            .await?;
        decode(reply, "count")
    }

    pub async fn is_visible(&self) -> E2eResult<bool> {
        let reply = self
            .page
            .automation
            .execute(Command::IsVisible {
                page: self.page.id,
                locator: self.path.clone(),
            })
            .await?;
        decode(reply, "isVisible")
    }

    pub async fn get_attribute(&self, name: &str) -> E2eResult<Option<String>> {
        let reply = self
            .page
            .automation
            .execute(Command::GetAttribute {
                page: self.page.id,
                locator: self.path.clone(),
                name: name.to_string(),
            })
            .await?;
        decode(reply, "getAttribute")
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "locator({})", self.path)
    }
}

fn decode<T: DeserializeOwned>(reply: Value, what: &str) -> E2eResult<T> {
    serde_json::from_value(reply)
        .map_err(|e| E2eError::Protocol(format!("unexpected {} reply: {}", what, e)))
}
