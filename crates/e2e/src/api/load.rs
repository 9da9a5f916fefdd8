//! Staged virtual-user ramps

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::metrics::{CheckCount, GroupStats, Metrics, ThresholdResult};
use super::{Scenario, VirtualUser};
use crate::error::E2eResult;

const TICK: Duration = Duration::from_millis(100);

/// Ramp linearly from the previous stage's target to `target` virtual users
/// over `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "millis")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// How many virtual users run, and for how long
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub stages: Vec<Stage>,
    #[serde(skip, default = "default_request_timeout")]
    request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for LoadProfile {
    /// Smoke, light load, ramp down
    fn default() -> Self {
        Self::new(vec![
            Stage::new(Duration::from_secs(5), 1),
            Stage::new(Duration::from_secs(10), 3),
            Stage::new(Duration::from_secs(5), 0),
        ])
    }
}

impl LoadProfile {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            request_timeout: default_request_timeout(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_vus(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Target virtual users `elapsed` into the run
    pub fn vus_at(&self, elapsed: Duration) -> usize {
        let mut from = 0usize;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = if stage.duration.is_zero() {
                    1.0
                } else {
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64()
                };
                let vus = from as f64 + (stage.target as f64 - from as f64) * progress;
                return vus.round() as usize;
            }
            from = stage.target;
            stage_start = stage_end;
        }
        0
    }

    fn client(&self) -> E2eResult<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.request_timeout).build()?)
    }

    /// Single virtual user, single iteration
    pub async fn run_once(&self, scenario: &dyn Scenario) -> E2eResult<LoadSummary> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut vu = VirtualUser::new(0, self.client()?);

        if let Err(e) = scenario.iteration(&mut vu).await {
            warn!("{} iteration failed: {}", scenario.name(), e);
            vu.metrics.iteration_errors += 1;
        }
        vu.metrics.iterations += 1;

        Ok(LoadSummary::new(scenario, vu.into_metrics(), started_at, start.elapsed()))
    }

    /// Run the stages, spawning and retiring virtual users as the target
    /// moves. Iterations in flight when the last stage ends are allowed to
    /// finish.
    pub async fn run(&self, scenario: Arc<dyn Scenario>) -> E2eResult<LoadSummary> {
        let client = self.client()?;
        let total = self.total_duration();
        let active = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let mut slots: Vec<Option<JoinHandle<Metrics>>> = Vec::new();
        let mut metrics = Metrics::default();

        info!(
            "Running {} for {:?} with up to {} VU(s)",
            scenario.name(),
            total,
            self.max_vus()
        );

        let started_at = Utc::now();
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }
            let target = self.vus_at(elapsed);
            active.store(target, Ordering::SeqCst);

            for slot in slots.iter_mut() {
                if slot.as_ref().map(JoinHandle::is_finished).unwrap_or(false) {
                    if let Some(handle) = slot.take() {
                        collect(&mut metrics, handle).await;
                    }
                }
            }

            if slots.len() < target {
                slots.resize_with(target, || None);
            }
            for (id, slot) in slots.iter_mut().enumerate().take(target) {
                if slot.is_none() {
                    *slot = Some(tokio::spawn(virtual_user(
                        id,
                        client.clone(),
                        Arc::clone(&scenario),
                        Arc::clone(&active),
                        Arc::clone(&stop),
                    )));
                }
            }

            tokio::time::sleep(TICK).await;
        }

        stop.store(true, Ordering::SeqCst);
        active.store(0, Ordering::SeqCst);
        for handle in slots.into_iter().flatten() {
            collect(&mut metrics, handle).await;
        }

        Ok(LoadSummary::new(scenario.as_ref(), metrics, started_at, start.elapsed()))
    }
}

async fn collect(metrics: &mut Metrics, handle: JoinHandle<Metrics>) {
    match handle.await {
        Ok(vu_metrics) => metrics.merge(vu_metrics),
        Err(e) => error!("Virtual user task failed: {}", e),
    }
}

/// Iterate while this user's slot is inside the active range
async fn virtual_user(
    id: usize,
    client: reqwest::Client,
    scenario: Arc<dyn Scenario>,
    active: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
) -> Metrics {
    let mut vu = VirtualUser::new(id, client);
    while !stop.load(Ordering::SeqCst) && id < active.load(Ordering::SeqCst) {
        if let Err(e) = scenario.iteration(&mut vu).await {
            warn!("vu{} iteration failed: {}", id, e);
            vu.metrics.iteration_errors += 1;
        }
        vu.metrics.iterations += 1;
    }
    vu.into_metrics()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub group: String,
    pub name: String,
    #[serde(flatten)]
    pub count: CheckCount,
}

/// End-of-run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSummary {
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub iterations: u64,
    pub iteration_errors: u64,
    pub groups: BTreeMap<String, GroupStats>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,
}

impl LoadSummary {
    fn new(scenario: &dyn Scenario, metrics: Metrics, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        let thresholds = scenario
            .thresholds()
            .iter()
            .map(|t| t.evaluate(&metrics))
            .collect();
        let checks = metrics
            .checks()
            .iter()
            .map(|((group, name), count)| CheckSummary {
                group: group.clone(),
                name: name.clone(),
                count: *count,
            })
            .collect();

        Self {
            scenario: scenario.name().to_string(),
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            iterations: metrics.iterations,
            iteration_errors: metrics.iteration_errors,
            groups: metrics.group_stats(),
            checks,
            thresholds,
        }
    }

    /// All thresholds held
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckSummary> {
        self.checks.iter().filter(|c| c.count.fails > 0)
    }

    pub fn log(&self) {
        info!(
            "{}: {} iteration(s) in {} ms",
            self.scenario, self.iterations, self.duration_ms
        );
        for check in &self.checks {
            if check.count.fails == 0 {
                info!("  ✓ [{}] {}", check.group, check.name);
            } else {
                warn!(
                    "  ✗ [{}] {} ({:.0}% of {})",
                    check.group,
                    check.name,
                    check.count.rate() * 100.0,
                    check.count.passes + check.count.fails
                );
            }
        }
        for (group, stats) in &self.groups {
            info!(
                "  {} requests={} avg={:.1}ms p(95)={:.1}ms failed={:.2}%",
                group,
                stats.requests,
                stats.avg_ms,
                stats.p95_ms,
                stats.failed_rate * 100.0
            );
        }
        for threshold in &self.thresholds {
            if threshold.passed {
                info!("  ✓ {}", threshold.threshold);
            } else {
                error!("  ✗ {} (observed {:?})", threshold.threshold, threshold.observed);
            }
        }
    }
}
