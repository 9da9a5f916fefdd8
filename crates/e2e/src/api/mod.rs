//! HTTP API smoke and load checks
//!
//! A [`Scenario`] runs one iteration against a [`VirtualUser`], which times
//! every request, tags it with the current group and counts named checks.
//! Checks never abort an iteration; pass/fail of a run comes from the
//! scenario's [`Threshold`]s.

pub mod load;
pub mod metrics;
pub mod scenarios;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::E2eResult;

pub use load::{LoadProfile, LoadSummary, Stage};
pub use metrics::{CheckCount, Metrics, RequestSample, Threshold, ThresholdResult};
pub use scenarios::{RestCountries, RickAndMortyGraphql};

pub const HAPPY: &str = "happy";
pub const EDGE_CASE: &str = "edge-case";

/// Response as seen by a check
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    /// 0 when the request never got a response
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
    }

    /// Parsed body, or `Value::Null` when it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// One simulated client
pub struct VirtualUser {
    id: usize,
    client: reqwest::Client,
    group: String,
    metrics: Metrics,
}

impl VirtualUser {
    pub fn new(id: usize, client: reqwest::Client) -> Self {
        Self {
            id,
            client,
            group: String::new(),
            metrics: Metrics::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Tag the following requests and checks with `name`
    pub fn group(&mut self, name: &str) {
        self.group = name.to_string();
    }

    pub fn current_group(&self) -> &str {
        &self.group
    }

    pub async fn get(&mut self, url: &str) -> ApiResponse {
        let request = self.client.get(url);
        self.send("GET", url, request).await
    }

    pub async fn post_json(&mut self, url: &str, body: &Value) -> ApiResponse {
        let request = self.client.post(url).json(body);
        self.send("POST", url, request).await
    }

    async fn send(&mut self, method: &str, url: &str, request: reqwest::RequestBuilder) -> ApiResponse {
        let start = Instant::now();
        let mut response = ApiResponse::default();

        match request.send().await {
            Ok(resp) => {
                response.status = resp.status().as_u16();
                response.content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match resp.text().await {
                    Ok(body) => response.body = body,
                    Err(e) => response.error = Some(e.to_string()),
                }
            }
            Err(e) => response.error = Some(e.to_string()),
        }
        response.duration = start.elapsed();

        let failed = response.error.is_some() || !(200..400).contains(&response.status);
        debug!(
            "vu{} [{}] {} {} -> {} in {:?}",
            self.id, self.group, method, url, response.status, response.duration
        );
        self.metrics.record_request(RequestSample {
            group: self.group.clone(),
            method: method.to_string(),
            url: url.to_string(),
            status: response.status,
            duration: response.duration,
            failed,
        });
        response
    }

    /// Count a named check under the current group
    pub fn check(&mut self, name: &str, passed: bool) -> bool {
        self.metrics.record_check(&self.group, name, passed);
        passed
    }

    pub async fn think(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn into_metrics(self) -> Metrics {
        self.metrics
    }
}

/// A scripted API workload
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Criteria the whole run is judged by
    fn thresholds(&self) -> Vec<Threshold>;

    /// One pass through the script. Errors count against the iteration, not
    /// the run.
    async fn iteration(&self, vu: &mut VirtualUser) -> E2eResult<()>;
}


#[cfg(test)]
mod tests {
    use super::fake::{serve, Reply};
    use super::*;
    use serde_json::json;

    fn handler(_method: &str, path: &str, _body: &str) -> Reply {
        match path {
            "/ok" => Reply::json(200, json!({"ok": true})),
            _ => Reply {
                status: 404,
                content_type: "text/plain",
                body: "not found".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_requests_are_tagged_and_timed() {
        let base = serve(handler).await;
        let mut vu = VirtualUser::new(0, reqwest::Client::new());

        vu.group(HAPPY);
        let ok = vu.get(&format!("{}/ok", base)).await;
        assert!(vu.check("status is 200", ok.status == 200));
        assert!(ok.is_json());
        assert_eq!(ok.json()["ok"], json!(true));

        vu.group(EDGE_CASE);
        let missing = vu.get(&format!("{}/missing", base)).await;
        assert!(!missing.is_json());
        assert_eq!(missing.json(), Value::Null);

        let metrics = vu.into_metrics();
        assert_eq!(metrics.failed_rate(HAPPY), Some(0.0));
        assert_eq!(metrics.failed_rate(EDGE_CASE), Some(1.0));
        assert_eq!(metrics.checks().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_a_failed_sample() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut vu = VirtualUser::new(0, reqwest::Client::new());
        vu.group(HAPPY);
        let response = vu.get(&format!("http://127.0.0.1:{}/", port)).await;

        assert_eq!(response.status, 0);
        assert!(response.error.is_some());
        assert_eq!(vu.metrics().failed_rate(HAPPY), Some(1.0));
    }
}
