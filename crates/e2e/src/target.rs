//! Reachability preflight for the application under test

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Waits for the application to answer before the browser is launched
#[derive(Debug, Clone)]
pub struct TargetApp {
    base_url: String,
    timeout: Duration,
    retry_interval: Duration,
}

impl TargetApp {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(15),
            retry_interval: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Poll the base URL until it answers with a non-server-error status
    pub async fn wait_until_reachable(&self) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match client.get(&self.base_url).send().await {
                Ok(resp) if !resp.status().is_server_error() => {
                    info!("Target {} is reachable ({})", self.base_url, resp.status());
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Target returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} ...", self.base_url);
                    }
                    if !e.is_connect() && !e.is_timeout() {
                        warn!("Preflight error: {}", e);
                    }
                }
            }

            if start.elapsed() + self.retry_interval >= self.timeout {
                break;
            }
            sleep(self.retry_interval).await;
        }

        Err(E2eError::TargetUnreachable {
            url: self.base_url.clone(),
            attempts,
        })
    }
}
