use gavel_common::{Language, StoreError, TestOutcome, UnsupportedLanguage};

use crate::judge::JudgeError;

/// Error taxonomy of the evaluation pipeline
///
/// Only pre-dispatch failures reach a `submit` caller as errors; everything
/// after the pending record exists is folded into a terminal record instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("judge unavailable: {0}")]
    JudgeUnavailable(String),

    #[error("judge rejected the request: {0}")]
    JudgeRejected(String),

    #[error("judge did not finish {unresolved} of {total} test cases before the deadline")]
    TimedOut {
        unresolved: usize,
        total: usize,
        /// Ordinal-aligned; unfinished cases are inconclusive `Other` outcomes
        outcomes: Vec<TestOutcome>,
    },

    #[error("no test cases to evaluate")]
    NoTestCases,

    #[error("problem {0} not found")]
    ProblemNotFound(String),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("reference solution for {language} failed: {detail}")]
    ReferenceSolutionFailed { language: Language, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<JudgeError> for PipelineError {
    fn from(err: JudgeError) -> Self {
        match err {
            JudgeError::Unavailable(msg) => PipelineError::JudgeUnavailable(msg),
            JudgeError::Rejected { status, body } => {
                PipelineError::JudgeRejected(format!("status {}: {}", status, body))
            }
            JudgeError::MalformedResponse(msg) => PipelineError::JudgeRejected(msg),
        }
    }
}

impl PipelineError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::UnsupportedLanguage(_) => "unsupported_language",
            PipelineError::JudgeUnavailable(_) => "judge_unavailable",
            PipelineError::JudgeRejected(_) => "judge_rejected",
            PipelineError::TimedOut { .. } => "timed_out",
            PipelineError::NoTestCases => "no_test_cases",
            PipelineError::ProblemNotFound(_) => "problem_not_found",
            PipelineError::Cancelled => "cancelled",
            PipelineError::ReferenceSolutionFailed { .. } => "reference_failed",
            PipelineError::Store(_) => "store",
        }
    }
}
