//! Session-wide browser ownership

use std::sync::Arc;

use tracing::{info, warn};

use crate::driver::{LaunchOptions, PlaywrightDriver};
use crate::error::E2eResult;
use crate::protocol::{Automation, Command};

/// The one browser of a test run.
///
/// Every browsing context is created through it. `release` consumes the
/// session, so the browser is closed at most once.
pub struct BrowserSession {
    automation: Arc<dyn Automation>,
    released: bool,
}

impl BrowserSession {
    /// Launch the browser through Playwright. Failure is fatal for the run
    /// and is not retried.
    pub async fn acquire(options: &LaunchOptions) -> E2eResult<Self> {
        info!(
            "Launching {} (headless: {})",
            options.browser.as_str(),
            options.headless
        );
        let driver = PlaywrightDriver::launch(options).await?;
        Ok(Self::with_automation(Arc::new(driver)))
    }

    /// Wrap an automation layer whose browser is already running
    pub fn with_automation(automation: Arc<dyn Automation>) -> Self {
        Self {
            automation,
            released: false,
        }
    }

    pub(crate) fn automation(&self) -> Arc<dyn Automation> {
        Arc::clone(&self.automation)
    }

    /// Close the browser
    pub async fn release(mut self) -> E2eResult<()> {
        self.released = true;
        info!("Closing browser");
        self.automation.execute(Command::Close).await?;
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if !self.released {
            warn!("Browser session dropped without release; the driver process is killed on drop");
        }
    }
}
