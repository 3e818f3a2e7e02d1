/// Verdict Reducer - Pure Aggregation of Per-Test Outcomes
///
/// **Core Responsibility:**
/// Fold the judge's per-test outcomes into one verdict.
///
/// **Critical Properties:**
/// - Knows nothing about the judge transport
/// - Knows nothing about storage
/// - Pure function: outcomes → verdict
///
/// **Aggregation Rules:**
/// - passed = number of Accepted outcomes
/// - total = number of outcomes
/// - runtime = sum of time over Accepted outcomes only
/// - peak memory = max over all outcomes
///
/// **Status Precedence (strict severity):**
/// - any RuntimeError or CompileError → RuntimeError
/// - otherwise any non-Accepted → Wrong
/// - otherwise → Accepted
///
/// The error message is the error text of the first outcome at the winning
/// severity.

use gavel_common::{SubmissionStatus, TestOutcome, Verdict};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Severity {
    Accepted,
    Wrong,
    Runtime,
}

impl Severity {
    fn of(outcome: &TestOutcome) -> Self {
        if outcome.status.is_accepted() {
            Severity::Accepted
        } else if outcome.status.is_runtime_class() {
            Severity::Runtime
        } else {
            Severity::Wrong
        }
    }

    fn status(self) -> SubmissionStatus {
        match self {
            Severity::Accepted => SubmissionStatus::Accepted,
            Severity::Wrong => SubmissionStatus::Wrong,
            Severity::Runtime => SubmissionStatus::RuntimeError,
        }
    }
}

/// Runtime is reported at microsecond precision
fn round_seconds(seconds: f64) -> f64 {
    (seconds * 1_000_000.0).round() / 1_000_000.0
}

struct Totals {
    passed: u32,
    runtime_seconds: f64,
    peak_memory_kb: u64,
}

fn totals<'a>(outcomes: impl Iterator<Item = &'a TestOutcome>) -> Totals {
    let mut totals = Totals {
        passed: 0,
        runtime_seconds: 0.0,
        peak_memory_kb: 0,
    };

    for outcome in outcomes {
        if outcome.status.is_accepted() {
            totals.passed += 1;
            totals.runtime_seconds += outcome.time_seconds;
        }
        totals.peak_memory_kb = totals.peak_memory_kb.max(outcome.memory_kb);
    }

    totals.runtime_seconds = round_seconds(totals.runtime_seconds);
    totals
}

/// Reduce a complete set of outcomes into a verdict
///
/// ## Errors
/// `NoTestCases` when `outcomes` is empty.
pub fn reduce(outcomes: &[TestOutcome]) -> Result<Verdict, PipelineError> {
    if outcomes.is_empty() {
        return Err(PipelineError::NoTestCases);
    }

    let mut worst = Severity::Accepted;
    let mut error_message = None;
    for outcome in outcomes {
        let severity = Severity::of(outcome);
        if severity > worst {
            worst = severity;
            error_message = outcome.error_text().map(str::to_string);
        }
    }

    let totals = totals(outcomes.iter());

    Ok(Verdict {
        status: worst.status(),
        passed: totals.passed,
        total: outcomes.len() as u32,
        runtime_seconds: totals.runtime_seconds,
        peak_memory_kb: totals.peak_memory_kb,
        error_message,
    })
}

/// Reduce a batch the judge did not finish
///
/// Counts only the outcomes that were judged and always yields `SystemError`.
pub fn reduce_partial(outcomes: &[Option<TestOutcome>]) -> Verdict {
    let unresolved = outcomes.iter().filter(|o| o.is_none()).count();
    let totals = totals(outcomes.iter().flatten());

    Verdict {
        status: SubmissionStatus::SystemError,
        passed: totals.passed,
        total: outcomes.len() as u32,
        runtime_seconds: totals.runtime_seconds,
        peak_memory_kb: totals.peak_memory_kb,
        error_message: Some(format!(
            "Judge did not finish {} of {} test cases before the deadline",
            unresolved,
            outcomes.len()
        )),
    }
}
