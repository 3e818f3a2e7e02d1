/// Evaluation Orchestrator - High-Level Pipeline
///
/// **Responsibility:**
/// Sequence resolve → dispatch → poll → reduce → persist for every entry
/// point (ad-hoc run, graded submit, reference validation).
///
/// **Architecture:**
/// 1. Resolve the language to a judge environment (language.rs)
/// 2. Dispatch one batch to the judge (judge.rs)
/// 3. Poll the batch to a final state (poller.rs)
/// 4. Reduce outcomes to a verdict (reducer.rs)
/// 5. Persist the verdict on the submission record (store.rs)
///
/// **Failure Rules:**
/// - Failures before the pending record exists surface as errors
/// - Failures after it exists end in a terminal `SystemError` record

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use gavel_common::{
    EnvironmentId, JudgeConfig, Language, LanguageRegistry, NewSubmission, PollConfig, Problem,
    SubmissionRecord, SubmissionStatus, TestCase, TestOutcome, Verdict, MAX_SUBMIT_BACKOFF_MS,
};
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::judge::{Judge, JudgeRequest, JudgeToken};
use crate::metrics;
use crate::poller::{cancelled, BatchReport, BatchState, PollAggregator};
use crate::reducer::{reduce, reduce_partial};
use crate::store::{ProblemStore, SubmissionStore};

/// Graded submission against a problem's hidden test cases
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: String,
    pub problem_id: String,
    pub code: String,
    pub language: String,
}

/// Result of an ad-hoc run. Nothing is persisted.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<TestOutcome>,
    pub passed: bool,
    pub verdict: Verdict,
}

#[derive(Debug, Clone)]
pub struct ReferenceResult {
    pub language: Language,
    pub verdict: Verdict,
}

/// Every reference solution of a problem passed its visible test cases
#[derive(Debug, Clone)]
pub struct ProblemValidation {
    pub problem_id: String,
    pub references: Vec<ReferenceResult>,
}

/// Retry policy for the batch submit call
#[derive(Debug, Clone, Copy)]
struct SubmitRetry {
    max_attempts: u32,
    backoff: Duration,
}

impl SubmitRetry {
    fn next_backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(Duration::from_millis(MAX_SUBMIT_BACKOFF_MS))
    }
}

impl From<&JudgeConfig> for SubmitRetry {
    fn from(config: &JudgeConfig) -> Self {
        Self {
            max_attempts: config.submit_max_attempts.max(1),
            backoff: config.submit_backoff(),
        }
    }
}

/// Finalizes a pending record as `SystemError` if evaluation is abandoned
///
/// Dropping the submit future (caller timeout, task abort) would otherwise
/// leave the record pending forever.
struct PendingGuard {
    store: Arc<dyn SubmissionStore>,
    id: Uuid,
    total: u32,
    armed: bool,
}

impl PendingGuard {
    fn new(store: Arc<dyn SubmissionStore>, id: Uuid, total: u32) -> Self {
        Self {
            store,
            id,
            total,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = self.store.clone();
        let id = self.id;
        let verdict = Verdict::system_error(self.total, "Evaluation interrupted before a verdict was recorded");

        // Cannot be async in Drop; finalize on a detached task
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.finalize(id, &verdict).await {
                        Ok(_) => {
                            metrics::record_verdict("system_error");
                            warn!(submission_id = %id, "Abandoned submission finalized as system error");
                        }
                        Err(e) => {
                            warn!(submission_id = %id, error = %e, "Failed to finalize abandoned submission");
                        }
                    }
                });
            }
            Err(_) => {
                warn!(submission_id = %id, "No runtime available; submission left pending");
            }
        }
    }
}

fn status_label(status: SubmissionStatus) -> &'static str {
    match status {
        SubmissionStatus::Pending => "pending",
        SubmissionStatus::Accepted => "accepted",
        SubmissionStatus::Wrong => "wrong",
        SubmissionStatus::RuntimeError => "runtime_error",
        SubmissionStatus::SystemError => "system_error",
    }
}

fn require(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Pair every test case's input with its own expected output
fn build_batch(code: &str, environment_id: EnvironmentId, test_cases: &[TestCase]) -> Vec<JudgeRequest> {
    test_cases
        .iter()
        .map(|case| JudgeRequest {
            source_code: code.to_string(),
            environment_id,
            stdin: case.input.clone(),
            expected_output: case.expected_output.clone(),
        })
        .collect()
}

/// The single evaluation pipeline shared by run, submit and validation
pub struct Orchestrator {
    judge: Arc<dyn Judge>,
    submissions: Arc<dyn SubmissionStore>,
    problems: Arc<dyn ProblemStore>,
    languages: Arc<LanguageRegistry>,
    retry: SubmitRetry,
    poll: PollConfig,
}

impl Orchestrator {
    pub fn new(
        judge: Arc<dyn Judge>,
        submissions: Arc<dyn SubmissionStore>,
        problems: Arc<dyn ProblemStore>,
    ) -> Self {
        Self {
            judge,
            submissions,
            problems,
            languages: Arc::new(LanguageRegistry::builtin()),
            retry: SubmitRetry::from(&JudgeConfig::default()),
            poll: PollConfig::default(),
        }
    }

    pub fn with_languages(mut self, languages: Arc<LanguageRegistry>) -> Self {
        self.languages = languages;
        self
    }

    /// Take the submit retry policy from the judge configuration
    pub fn with_judge_config(mut self, config: &JudgeConfig) -> Self {
        self.retry = SubmitRetry::from(config);
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Run code against caller-supplied test cases without persisting anything
    ///
    /// Judge failures, timeouts and cancellation are returned as errors.
    #[instrument(skip(self, code, test_cases, cancel), fields(language = %language, cases = test_cases.len()))]
    pub async fn run(
        &self,
        code: &str,
        language: &str,
        test_cases: &[TestCase],
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, PipelineError> {
        require("code", code)?;
        require("language", language)?;
        let (language, environment_id) = self.languages.resolve(language)?;
        if test_cases.is_empty() {
            return Err(PipelineError::NoTestCases);
        }

        metrics::record_evaluation_started("run", &language.to_string());
        self.run_resolved(code, environment_id, test_cases, &mut cancel).await
    }

    async fn run_resolved(
        &self,
        code: &str,
        environment_id: EnvironmentId,
        test_cases: &[TestCase],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<RunReport, PipelineError> {
        let report = self.execute(code, environment_id, test_cases, cancel).await?;
        let outcomes = report.into_outcomes()?;
        let verdict = reduce(&outcomes)?;

        Ok(RunReport {
            passed: verdict.status == SubmissionStatus::Accepted,
            outcomes,
            verdict,
        })
    }

    /// Grade code against a problem's hidden test cases
    ///
    /// Returns the finalized record. Only validation, language, problem lookup
    /// and record creation failures are returned as errors; everything after
    /// the pending record exists ends in a terminal record.
    #[instrument(
        skip(self, request, cancel),
        fields(user_id = %request.user_id, problem_id = %request.problem_id, language = %request.language)
    )]
    pub async fn submit(
        &self,
        request: SubmitRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SubmissionRecord, PipelineError> {
        require("user_id", &request.user_id)?;
        require("problem_id", &request.problem_id)?;
        require("code", &request.code)?;
        require("language", &request.language)?;

        let (language, environment_id) = self.languages.resolve(&request.language)?;

        let problem = self
            .problems
            .get_problem(&request.problem_id)
            .await?
            .ok_or_else(|| PipelineError::ProblemNotFound(request.problem_id.clone()))?;
        if problem.hidden_test_cases.is_empty() {
            return Err(PipelineError::NoTestCases);
        }
        let total = problem.hidden_test_cases.len() as u32;

        metrics::record_evaluation_started("submit", &language.to_string());

        let record = self
            .submissions
            .create_pending(NewSubmission {
                user_id: request.user_id.clone(),
                problem_id: request.problem_id.clone(),
                code: request.code.clone(),
                language,
                test_cases_total: total,
            })
            .await?;
        let guard = PendingGuard::new(self.submissions.clone(), record.id, total);

        info!(submission_id = %record.id, test_cases = total, "Submission pending");

        let verdict = match self
            .grade(&request.code, environment_id, &problem.hidden_test_cases, &mut cancel)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(submission_id = %record.id, error = %e, kind = e.kind(), "Evaluation failed");
                Verdict::system_error(total, e.to_string())
            }
        };

        // Not raced against the cancel signal
        let finalized = self.submissions.finalize(record.id, &verdict).await?;
        guard.disarm();

        metrics::record_verdict(status_label(finalized.status));
        info!(
            submission_id = %finalized.id,
            status = status_label(finalized.status),
            passed = finalized.test_cases_passed,
            total = finalized.test_cases_total,
            runtime_seconds = finalized.runtime_seconds,
            peak_memory_kb = finalized.peak_memory_kb,
            "Submission finalized"
        );

        Ok(finalized)
    }

    /// Verdict for a submission; a timed-out batch keeps its partial counts
    async fn grade(
        &self,
        code: &str,
        environment_id: EnvironmentId,
        test_cases: &[TestCase],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Verdict, PipelineError> {
        let report = self.execute(code, environment_id, test_cases, cancel).await?;
        if report.state == BatchState::TimedOut {
            return Ok(reduce_partial(&report.outcomes));
        }
        reduce(&report.into_outcomes()?)
    }

    /// Run every reference solution against the visible test cases
    ///
    /// Any failing solution blocks publication. No submission record is created.
    #[instrument(skip(self, problem, cancel), fields(problem_id = %problem.id))]
    pub async fn validate_problem(
        &self,
        problem: &Problem,
        cancel: watch::Receiver<bool>,
    ) -> Result<ProblemValidation, PipelineError> {
        require("problem id", &problem.id)?;
        if problem.visible_test_cases.is_empty() {
            return Err(PipelineError::NoTestCases);
        }
        if problem.reference_solutions.is_empty() {
            return Err(PipelineError::Validation(
                "problem has no reference solutions".to_string(),
            ));
        }

        let runs = problem.reference_solutions.iter().map(|(language, code)| {
            let mut cancel = cancel.clone();
            async move {
                metrics::record_evaluation_started("validate", &language.to_string());
                let result = match self.languages.environment_for(*language) {
                    Some(environment_id) => {
                        self.run_resolved(code, environment_id, &problem.visible_test_cases, &mut cancel)
                            .await
                    }
                    None => Err(PipelineError::UnsupportedLanguage(
                        gavel_common::UnsupportedLanguage(language.to_string()),
                    )),
                };
                (*language, result)
            }
        });

        let mut references = Vec::with_capacity(problem.reference_solutions.len());
        for (language, result) in join_all(runs).await {
            match result {
                Ok(report) if report.passed => references.push(ReferenceResult {
                    language,
                    verdict: report.verdict,
                }),
                Ok(report) => {
                    let verdict = report.verdict;
                    let mut detail = format!(
                        "{} ({}/{} passed)",
                        status_label(verdict.status),
                        verdict.passed,
                        verdict.total
                    );
                    if let Some(message) = verdict.error_message {
                        detail.push_str(": ");
                        detail.push_str(&message);
                    }
                    return Err(PipelineError::ReferenceSolutionFailed { language, detail });
                }
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    return Err(PipelineError::ReferenceSolutionFailed {
                        language,
                        detail: e.to_string(),
                    })
                }
            }
        }

        info!(references = references.len(), "Reference solutions validated");
        Ok(ProblemValidation {
            problem_id: problem.id.clone(),
            references,
        })
    }

    /// Dispatch one batch and poll it to a final state
    async fn execute(
        &self,
        code: &str,
        environment_id: EnvironmentId,
        test_cases: &[TestCase],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<BatchReport, PipelineError> {
        let requests = build_batch(code, environment_id, test_cases);
        let tokens = self.dispatch(&requests, cancel).await?;

        let aggregator = PollAggregator::new(self.judge.clone(), self.poll.clone());
        Ok(aggregator.poll(&tokens, cancel).await)
    }

    /// Submit a batch, retrying only while the judge is unavailable
    async fn dispatch(
        &self,
        requests: &[JudgeRequest],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Vec<JudgeToken>, PipelineError> {
        let mut backoff = self.retry.backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(PipelineError::Cancelled),
                result = self.judge.submit_batch(requests) => result,
            };

            let err = match result {
                Ok(tokens) if tokens.len() == requests.len() => {
                    info!(tokens = tokens.len(), attempt, "Batch accepted by judge");
                    return Ok(tokens);
                }
                Ok(tokens) => {
                    return Err(PipelineError::JudgeRejected(format!(
                        "judge returned {} tokens for {} test cases",
                        tokens.len(),
                        requests.len()
                    )))
                }
                Err(err) => err,
            };

            metrics::record_judge_error("submit", err.kind());
            if !err.is_transient() || attempt >= self.retry.max_attempts {
                return Err(err.into());
            }

            warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                error = %err,
                "Judge unavailable, retrying batch submit"
            );
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = self.retry.next_backoff(backoff);
        }
    }
}
