//! Per-phase outcome records
//!
//! A test runs in three phases. The runner wraps each phase with
//! [`run_phase`], which turns whatever the phase produced (success, an error,
//! or a panic) into a [`PhaseReport`] and hands it to the installed
//! [`PhaseHook`]s together with the test's [`TestReport`]. Teardown logic reads
//! the call-phase record back from the same `TestReport` to decide whether to
//! capture a screenshot.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::E2eResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        }
    }

    /// Key the record is attached under
    pub fn report_key(&self) -> &'static str {
        match self {
            Phase::Setup => "rep_setup",
            Phase::Call => "rep_call",
            Phase::Teardown => "rep_teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Result of one phase of one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PhaseReport {
    pub fn passed(phase: Phase, duration_ms: u64) -> Self {
        Self {
            phase,
            outcome: Outcome::Passed,
            duration_ms,
            message: None,
        }
    }

    pub fn failed(phase: Phase, duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            phase,
            outcome: Outcome::Failed,
            duration_ms,
            message: Some(message.into()),
        }
    }

    pub fn skipped(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            outcome: Outcome::Skipped,
            duration_ms: 0,
            message: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// Phase records of a single test, keyed by phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub test: String,
    #[serde(rename = "rep_setup", skip_serializing_if = "Option::is_none")]
    setup: Option<PhaseReport>,
    #[serde(rename = "rep_call", skip_serializing_if = "Option::is_none")]
    call: Option<PhaseReport>,
    #[serde(rename = "rep_teardown", skip_serializing_if = "Option::is_none")]
    teardown: Option<PhaseReport>,
}

impl TestReport {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            ..Default::default()
        }
    }

    /// Attach a record, replacing any earlier record for the same phase
    pub fn record(&mut self, report: PhaseReport) {
        let slot = match report.phase {
            Phase::Setup => &mut self.setup,
            Phase::Call => &mut self.call,
            Phase::Teardown => &mut self.teardown,
        };
        *slot = Some(report);
    }

    pub fn get(&self, phase: Phase) -> Option<&PhaseReport> {
        match phase {
            Phase::Setup => self.setup.as_ref(),
            Phase::Call => self.call.as_ref(),
            Phase::Teardown => self.teardown.as_ref(),
        }
    }

    /// True only when a call record exists and says failed. A missing record
    /// reads as not failed.
    pub fn call_failed(&self) -> bool {
        self.call.as_ref().map(PhaseReport::is_failed).unwrap_or(false)
    }

    /// Failed if any recorded phase failed; skipped if the call never ran
    pub fn outcome(&self) -> Outcome {
        summarize(&self.phases()).0
    }

    /// First failure message, preferring the call phase
    pub fn failure_message(&self) -> Option<String> {
        summarize(&self.phases()).1
    }

    pub fn phases(&self) -> Vec<PhaseReport> {
        [&self.setup, &self.call, &self.teardown]
            .into_iter()
            .filter_map(|p| p.clone())
            .collect()
    }
}

/// Overall outcome and first failure message of a set of phase records.
///
/// Failed if any phase failed; Skipped if the call phase was skipped;
/// otherwise Passed. The call phase's message wins over setup and teardown.
pub fn summarize(phases: &[PhaseReport]) -> (Outcome, Option<String>) {
    let message = [Phase::Call, Phase::Setup, Phase::Teardown]
        .into_iter()
        .filter_map(|phase| phases.iter().find(|r| r.phase == phase && r.is_failed()))
        .next()
        .map(|r| format!("{}: {}", r.phase, r.message.as_deref().unwrap_or("failed")));

    let outcome = if message.is_some() {
        Outcome::Failed
    } else if phases
        .iter()
        .any(|r| r.phase == Phase::Call && r.outcome == Outcome::Skipped)
    {
        Outcome::Skipped
    } else {
        Outcome::Passed
    };
    (outcome, message)
}

/// Extension point observing completed phases.
///
/// Hooks receive the test's report explicitly; there is no registry of the
/// "current" test.
pub trait PhaseHook: Send + Sync {
    fn after_phase(&self, report: &mut TestReport, result: &PhaseReport);
}

/// Attaches each phase record to the report
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordPhase;

impl PhaseHook for RecordPhase {
    fn after_phase(&self, report: &mut TestReport, result: &PhaseReport) {
        report.record(result.clone());
    }
}

/// Logs each phase record
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPhase;

impl PhaseHook for LogPhase {
    fn after_phase(&self, report: &mut TestReport, result: &PhaseReport) {
        match result.outcome {
            Outcome::Failed => error!(
                "{} [{}] failed: {}",
                report.test,
                result.phase,
                result.message.as_deref().unwrap_or("")
            ),
            _ => debug!(
                "{} [{}] {:?} in {} ms",
                report.test, result.phase, result.outcome, result.duration_ms
            ),
        }
    }
}

/// Run one phase and pass its record through the hooks.
///
/// Returns the phase's value when it succeeded, plus the record itself. Both
/// `Err` results and panics count as failures. Neither a panicking phase nor a
/// panicking hook escapes.
pub async fn run_phase<T, F>(
    phase: Phase,
    report: &mut TestReport,
    hooks: &[Box<dyn PhaseHook>],
    future: F,
) -> (Option<T>, PhaseReport)
where
    F: Future<Output = E2eResult<T>>,
{
    let start = Instant::now();
    let result = AssertUnwindSafe(future).catch_unwind().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (value, phase_report) = match result {
        Ok(Ok(value)) => (Some(value), PhaseReport::passed(phase, duration_ms)),
        Ok(Err(e)) => (None, PhaseReport::failed(phase, duration_ms, e.to_string())),
        Err(panic) => (
            None,
            PhaseReport::failed(phase, duration_ms, panic_message(panic.as_ref())),
        ),
    };

    notify_hooks(report, hooks, &phase_report);
    (value, phase_report)
}

/// Pass a record through the hooks.
///
/// A hook that panics is logged and skipped; the remaining hooks still run.
/// Whatever it failed to attach reads as missing.
pub fn notify_hooks(report: &mut TestReport, hooks: &[Box<dyn PhaseHook>], result: &PhaseReport) {
    for hook in hooks {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| hook.after_phase(report, result)));
        if let Err(panic) = outcome {
            warn!(
                "{} [{}] phase hook {}",
                report.test,
                result.phase,
                panic_message(panic.as_ref())
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

pub fn default_hooks() -> Vec<Box<dyn PhaseHook>> {
    vec![Box::new(RecordPhase), Box::new(LogPhase)]
}
