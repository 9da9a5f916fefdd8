//! Request samples, check counters and thresholds

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One HTTP request as seen by a virtual user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSample {
    pub group: String,
    pub method: String,
    pub url: String,
    /// 0 when no response arrived
    pub status: u16,
    pub duration: Duration,
    /// Transport error or a status outside 200..=399
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCount {
    pub passes: u64,
    pub fails: u64,
}

impl CheckCount {
    pub fn rate(&self) -> f64 {
        let total = self.passes + self.fails;
        if total == 0 {
            return 0.0;
        }
        self.passes as f64 / total as f64
    }
}

/// Everything recorded during a run, mergeable across virtual users
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub iterations: u64,
    pub iteration_errors: u64,
    samples: Vec<RequestSample>,
    checks: BTreeMap<(String, String), CheckCount>,
}

impl Metrics {
    pub fn record_request(&mut self, sample: RequestSample) {
        self.samples.push(sample);
    }

    pub fn record_check(&mut self, group: &str, name: &str, passed: bool) {
        let count = self
            .checks
            .entry((group.to_string(), name.to_string()))
            .or_default();
        if passed {
            count.passes += 1;
        } else {
            count.fails += 1;
        }
    }

    pub fn merge(&mut self, other: Metrics) {
        self.iterations += other.iterations;
        self.iteration_errors += other.iteration_errors;
        self.samples.extend(other.samples);
        for (key, count) in other.checks {
            let entry = self.checks.entry(key).or_default();
            entry.passes += count.passes;
            entry.fails += count.fails;
        }
    }

    pub fn samples(&self) -> &[RequestSample] {
        &self.samples
    }

    pub fn checks(&self) -> &BTreeMap<(String, String), CheckCount> {
        &self.checks
    }

    fn group_samples<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a RequestSample> + 'a {
        self.samples.iter().filter(move |s| s.group == group)
    }

    /// Duration percentile of a group's requests in milliseconds
    pub fn duration_percentile(&self, group: &str, p: f64) -> Option<f64> {
        let mut millis: Vec<f64> = self
            .group_samples(group)
            .map(|s| s.duration.as_secs_f64() * 1000.0)
            .collect();
        millis.sort_by(|a, b| a.total_cmp(b));
        percentile(&millis, p)
    }

    /// Share of a group's requests that failed
    pub fn failed_rate(&self, group: &str) -> Option<f64> {
        let (total, failed) = self
            .group_samples(group)
            .fold((0u64, 0u64), |(t, f), s| (t + 1, f + s.failed as u64));
        if total == 0 {
            return None;
        }
        Some(failed as f64 / total as f64)
    }

    pub fn group_stats(&self) -> BTreeMap<String, GroupStats> {
        let mut totals: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
        for sample in &self.samples {
            let entry = totals.entry(sample.group.as_str()).or_default();
            entry.0 += 1;
            entry.1 += sample.duration.as_secs_f64() * 1000.0;
        }

        totals
            .into_iter()
            .map(|(group, (requests, total_ms))| {
                let stats = GroupStats {
                    requests,
                    failed_rate: self.failed_rate(group).unwrap_or(0.0),
                    avg_ms: total_ms / requests as f64,
                    p95_ms: self.duration_percentile(group, 95.0).unwrap_or(0.0),
                };
                (group.to_string(), stats)
            })
            .collect()
    }
}

/// Percentile of sorted values with linear interpolation between ranks
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub requests: u64,
    pub failed_rate: f64,
    pub avg_ms: f64,
    pub p95_ms: f64,
}

/// Pass/fail criterion over a group's request metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Threshold {
    /// p(95) of request duration below `limit_ms`
    P95Below { group: String, limit_ms: f64 },
    /// Failed request rate below `rate`
    FailedRateBelow { group: String, rate: f64 },
}

impl Threshold {
    pub fn p95_below(group: &str, limit_ms: f64) -> Self {
        Threshold::P95Below {
            group: group.to_string(),
            limit_ms,
        }
    }

    pub fn failed_rate_below(group: &str, rate: f64) -> Self {
        Threshold::FailedRateBelow {
            group: group.to_string(),
            rate,
        }
    }

    /// A group without samples passes
    pub fn evaluate(&self, metrics: &Metrics) -> ThresholdResult {
        let (observed, passed) = match self {
            Threshold::P95Below { group, limit_ms } => {
                let observed = metrics.duration_percentile(group, 95.0);
                (observed, observed.map(|v| v < *limit_ms).unwrap_or(true))
            }
            Threshold::FailedRateBelow { group, rate } => {
                let observed = metrics.failed_rate(group);
                (observed, observed.map(|v| v < *rate).unwrap_or(true))
            }
        };
        ThresholdResult {
            threshold: self.to_string(),
            observed,
            passed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::P95Below { group, limit_ms } => {
                write!(f, "http_req_duration{{group:{}}} p(95)<{}", group, limit_ms)
            }
            Threshold::FailedRateBelow { group, rate } => {
                write!(f, "http_req_failed{{group:{}}} rate<{}", group, rate)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub threshold: String,
    pub observed: Option<f64>,
    pub passed: bool,
}
