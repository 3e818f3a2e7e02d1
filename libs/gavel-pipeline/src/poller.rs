use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gavel_common::{PollConfig, TestOutcome};
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::judge::{CaseStatus, Judge, JudgeToken};
use crate::metrics;

/// Lifecycle of one dispatched batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchState {
    Dispatched,
    Polling,
    AllTerminal,
    TimedOut,
    Aborted(AbortReason),
}

impl BatchState {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BatchState::AllTerminal | BatchState::TimedOut | BatchState::Aborted(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            BatchState::Dispatched => "dispatched",
            BatchState::Polling => "polling",
            BatchState::AllTerminal => "all_terminal",
            BatchState::TimedOut => "timed_out",
            BatchState::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    Cancelled,
    /// Too many consecutive transient failures
    JudgeUnavailable(String),
    JudgeRejected(String),
}

/// Outcome of polling one batch to a final state
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub state: BatchState,
    /// Ordinal-aligned with the dispatched tokens; `None` = never finished
    pub outcomes: Vec<Option<TestOutcome>>,
    pub polls: u32,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn unresolved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_none()).count()
    }

    /// Flat outcome list with unfinished cases rendered as inconclusive
    pub fn outcomes_or_inconclusive(&self) -> Vec<TestOutcome> {
        self.outcomes
            .iter()
            .map(|o| {
                o.clone()
                    .unwrap_or_else(|| TestOutcome::inconclusive("judge did not finish this test case"))
            })
            .collect()
    }

    /// All outcomes, or the error matching the final state
    ///
    /// A timed-out batch keeps its judged outcomes inside the error.
    pub fn into_outcomes(self) -> Result<Vec<TestOutcome>, PipelineError> {
        match self.state {
            BatchState::AllTerminal => Ok(self.outcomes.into_iter().flatten().collect()),
            BatchState::TimedOut => Err(PipelineError::TimedOut {
                unresolved: self.unresolved(),
                total: self.outcomes.len(),
                outcomes: self.outcomes_or_inconclusive(),
            }),
            BatchState::Aborted(AbortReason::Cancelled) => Err(PipelineError::Cancelled),
            BatchState::Aborted(AbortReason::JudgeUnavailable(msg)) => {
                Err(PipelineError::JudgeUnavailable(msg))
            }
            BatchState::Aborted(AbortReason::JudgeRejected(msg)) => {
                Err(PipelineError::JudgeRejected(msg))
            }
            BatchState::Dispatched | BatchState::Polling => {
                Err(PipelineError::JudgeUnavailable("batch polling did not finish".to_string()))
            }
        }
    }
}

/// Resolves once the signal reads `true`. Pends forever if the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A signal that never fires
pub fn uncancellable() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

/// Drives a batch from dispatch to a final state
///
/// Each round sleeps (exponential backoff) and then fetches the statuses of
/// the tokens that are still running. The whole batch shares one wall-clock
/// deadline; the cancel signal is checked during both the sleep and the fetch.
pub struct PollAggregator {
    judge: Arc<dyn Judge>,
    config: PollConfig,
}

impl PollAggregator {
    pub fn new(judge: Arc<dyn Judge>, config: PollConfig) -> Self {
        Self { judge, config }
    }

    pub async fn poll(&self, tokens: &[JudgeToken], cancel: &mut watch::Receiver<bool>) -> BatchReport {
        let started = Instant::now();
        let deadline = started + self.config.deadline();
        let index: HashMap<&JudgeToken, usize> = tokens.iter().enumerate().map(|(i, t)| (t, i)).collect();

        let mut outcomes: Vec<Option<TestOutcome>> = vec![None; tokens.len()];
        let mut state = BatchState::Dispatched;
        let mut interval = self.config.initial_interval();
        let mut polls = 0u32;
        let mut failures = 0u32;

        if tokens.is_empty() {
            state = BatchState::AllTerminal;
        }

        while !state.is_final() {
            let wake = (Instant::now() + interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    state = BatchState::Aborted(AbortReason::Cancelled);
                    break;
                }
                _ = sleep_until(wake) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                state = BatchState::TimedOut;
                break;
            }

            if state == BatchState::Dispatched {
                debug!(tokens = tokens.len(), "Batch entered polling");
            }
            state = BatchState::Polling;

            let pending: Vec<JudgeToken> = tokens
                .iter()
                .zip(&outcomes)
                .filter(|(_, outcome)| outcome.is_none())
                .map(|(token, _)| token.clone())
                .collect();

            polls += 1;
            let fetched = tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    state = BatchState::Aborted(AbortReason::Cancelled);
                    break;
                }
                result = timeout(deadline - now, self.judge.fetch_statuses(&pending)) => result,
            };

            match fetched {
                Err(_) => state = BatchState::TimedOut,
                Ok(Ok(statuses)) => {
                    failures = 0;
                    for (token, status) in statuses {
                        let CaseStatus::Done(outcome) = status else {
                            continue;
                        };
                        match index.get(&token) {
                            Some(&i) if outcomes[i].is_none() => outcomes[i] = Some(outcome),
                            Some(_) => {}
                            None => debug!(token = %token, "Ignoring status for unknown token"),
                        }
                    }
                    if outcomes.iter().all(Option::is_some) {
                        state = BatchState::AllTerminal;
                    }
                }
                Ok(Err(err)) if err.is_transient() => {
                    failures += 1;
                    metrics::record_judge_error("fetch", err.kind());
                    warn!(
                        error = %err,
                        consecutive_failures = failures,
                        "Transient failure fetching judge statuses"
                    );
                    if failures > self.config.max_transient_failures {
                        state = BatchState::Aborted(AbortReason::JudgeUnavailable(err.to_string()));
                    }
                }
                Ok(Err(err)) => {
                    metrics::record_judge_error("fetch", err.kind());
                    state = BatchState::Aborted(AbortReason::JudgeRejected(err.to_string()));
                }
            }

            interval = self.config.next_interval(interval);
        }

        let report = BatchReport {
            state,
            outcomes,
            polls,
            elapsed: started.elapsed(),
        };

        metrics::record_batch(report.state.label(), report.polls, report.elapsed.as_secs_f64() * 1000.0);
        info!(
            state = report.state.label(),
            polls = report.polls,
            unresolved = report.unresolved(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch polling finished"
        );

        report
    }
}
