use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::language::Language;

/// Test Case Definition (Immutable Input)
/// Owned by a problem; the pipeline never mutates it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            explanation: None,
        }
    }
}

/// Problem as seen by the evaluation pipeline
///
/// Only the fields the pipeline reads. Storage and authoring of the rest of
/// the problem lives outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub visible_test_cases: Vec<TestCase>,
    #[serde(default)]
    pub hidden_test_cases: Vec<TestCase>,
    #[serde(default)]
    pub reference_solutions: BTreeMap<Language, String>,
}

/// Per-Test Status
/// Terminal classification reported by the judge for a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Accepted,
    WrongAnswer,
    RuntimeError,
    CompileError,
    TimeLimitExceeded,
    Other,
}

impl StatusKind {
    pub fn is_accepted(self) -> bool {
        self == StatusKind::Accepted
    }

    /// Runtime and compile failures share one verdict class
    pub fn is_runtime_class(self) -> bool {
        matches!(self, StatusKind::RuntimeError | StatusKind::CompileError)
    }
}

/// Per-Test Result
/// Terminal outcome of one test case as measured by the judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub status: StatusKind,
    pub stdout: String,
    pub stderr: String,
    pub time_seconds: f64,
    pub memory_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TestOutcome {
    /// Placeholder for a test case the judge never finished
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Other,
            stdout: String::new(),
            stderr: reason.into(),
            time_seconds: 0.0,
            memory_kb: 0,
            description: Some("Inconclusive".to_string()),
        }
    }

    /// First human-readable error text: stderr, else the judge's description
    pub fn error_text(&self) -> Option<&str> {
        if !self.stderr.trim().is_empty() {
            return Some(self.stderr.as_str());
        }
        self.description.as_deref().filter(|d| !d.is_empty())
    }
}

/// Submission State Machine
/// `Pending` until the orchestrator finalizes it exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Accepted,
    Wrong,
    RuntimeError,
    SystemError,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        self != SubmissionStatus::Pending
    }
}

/// Aggregate grading result of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub passed: u32,
    pub total: u32,
    pub runtime_seconds: f64,
    pub peak_memory_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Verdict {
    pub fn system_error(total: u32, message: impl Into<String>) -> Self {
        Self {
            status: SubmissionStatus::SystemError,
            passed: 0,
            total,
            runtime_seconds: 0.0,
            peak_memory_kb: 0,
            error_message: Some(message.into()),
        }
    }
}

/// Input for creating a pending submission record
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub user_id: String,
    pub problem_id: String,
    pub code: String,
    pub language: Language,
    pub test_cases_total: u32,
}

/// Durable submission record
///
/// ## Lifecycle
/// - Created as `Pending` before the judge is contacted
/// - Moved to a terminal status exactly once by the orchestrator
/// - Never deleted by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub code: String,
    pub language: Language,
    pub status: SubmissionStatus,
    pub test_cases_total: u32,
    pub test_cases_passed: u32,
    pub runtime_seconds: f64,
    pub peak_memory_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

/// Result of applying a verdict to a stored record
#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    /// Record moved from pending to the verdict's status
    Applied(SubmissionRecord),
    /// Record already carries this exact verdict
    Unchanged,
}

impl SubmissionRecord {
    pub fn pending(new: NewSubmission) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            problem_id: new.problem_id,
            code: new.code,
            language: new.language,
            status: SubmissionStatus::Pending,
            test_cases_total: new.test_cases_total,
            test_cases_passed: 0,
            runtime_seconds: 0.0,
            peak_memory_kb: 0,
            error_message: None,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Whether the record's grading fields equal the verdict
    pub fn matches_verdict(&self, verdict: &Verdict) -> bool {
        self.status == verdict.status
            && self.test_cases_passed == verdict.passed
            && self.test_cases_total == verdict.total
            && self.runtime_seconds == verdict.runtime_seconds
            && self.peak_memory_kb == verdict.peak_memory_kb
            && self.error_message == verdict.error_message
    }

    /// Compute the terminal transition for `verdict`
    ///
    /// Re-applying the verdict a record already carries is a no-op; any other
    /// verdict on a terminal record is a conflict.
    pub fn finalize_with(&self, verdict: &Verdict) -> Result<Finalization, StoreError> {
        if !verdict.status.is_terminal() {
            return Err(StoreError::NotTerminal(self.id));
        }

        if self.status.is_terminal() {
            return if self.matches_verdict(verdict) {
                Ok(Finalization::Unchanged)
            } else {
                Err(StoreError::AlreadyFinalized(self.id))
            };
        }

        let mut record = self.clone();
        record.status = verdict.status;
        record.test_cases_passed = verdict.passed;
        record.test_cases_total = verdict.total;
        record.runtime_seconds = verdict.runtime_seconds;
        record.peak_memory_kb = verdict.peak_memory_kb;
        record.error_message = verdict.error_message.clone();
        record.finalized_at = Some(Utc::now());
        Ok(Finalization::Applied(record))
    }

    pub fn summary(&self) -> SubmissionSummary {
        SubmissionSummary {
            status: self.status,
            test_cases_passed: self.test_cases_passed,
            test_cases_total: self.test_cases_total,
            runtime: self.runtime_seconds,
            memory: self.peak_memory_kb,
            error_message: self.error_message.clone(),
        }
    }
}

/// Read model consumed by the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub status: SubmissionStatus,
    pub test_cases_passed: u32,
    pub test_cases_total: u32,
    pub runtime: f64,
    pub memory: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_submission() -> NewSubmission {
        NewSubmission {
            user_id: "user-1".to_string(),
            problem_id: "two-sum".to_string(),
            code: "print(1)".to_string(),
            language: Language::Python,
            test_cases_total: 3,
        }
    }

    fn accepted_verdict() -> Verdict {
        Verdict {
            status: SubmissionStatus::Accepted,
            passed: 3,
            total: 3,
            runtime_seconds: 0.06,
            peak_memory_kb: 1200,
            error_message: None,
        }
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SubmissionStatus::SystemError).unwrap();
        assert_eq!(json, "\"system_error\"");

        let json = serde_json::to_string(&StatusKind::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time_limit_exceeded\"");
    }

    #[test]
    fn test_problem_deserialization_with_defaults() {
        let json = r#"{
            "id": "sum",
            "hidden_test_cases": [{"input": "1 2", "expected_output": "3"}],
            "reference_solutions": {"cpp": "int main() {}", "python": "print(3)"}
        }"#;

        let problem: Problem = serde_json::from_str(json).unwrap();

        assert!(problem.visible_test_cases.is_empty());
        assert_eq!(problem.hidden_test_cases.len(), 1);
        assert_eq!(problem.hidden_test_cases[0].explanation, None);
        assert_eq!(problem.reference_solutions.len(), 2);
        assert!(problem.reference_solutions.contains_key(&Language::Cpp));
    }

    #[test]
    fn test_pending_record() {
        let record = SubmissionRecord::pending(new_submission());

        assert_eq!(record.status, SubmissionStatus::Pending);
        assert_eq!(record.test_cases_total, 3);
        assert_eq!(record.test_cases_passed, 0);
        assert!(record.finalized_at.is_none());
    }

    #[test]
    fn test_finalize_applies_verdict() {
        let record = SubmissionRecord::pending(new_submission());

        let finalized = match record.finalize_with(&accepted_verdict()).unwrap() {
            Finalization::Applied(r) => r,
            Finalization::Unchanged => panic!("expected transition"),
        };

        assert_eq!(finalized.id, record.id);
        assert_eq!(finalized.status, SubmissionStatus::Accepted);
        assert_eq!(finalized.test_cases_passed, 3);
        assert_eq!(finalized.peak_memory_kb, 1200);
        assert!(finalized.finalized_at.is_some());
    }

    #[test]
    fn test_finalize_same_verdict_is_noop() {
        let record = SubmissionRecord::pending(new_submission());
        let finalized = match record.finalize_with(&accepted_verdict()).unwrap() {
            Finalization::Applied(r) => r,
            Finalization::Unchanged => panic!("expected transition"),
        };

        let again = finalized.finalize_with(&accepted_verdict()).unwrap();
        assert_eq!(again, Finalization::Unchanged);
    }

    #[test]
    fn test_finalize_conflicting_verdict_rejected() {
        let record = SubmissionRecord::pending(new_submission());
        let finalized = match record.finalize_with(&accepted_verdict()).unwrap() {
            Finalization::Applied(r) => r,
            Finalization::Unchanged => panic!("expected transition"),
        };

        let err = finalized
            .finalize_with(&Verdict::system_error(3, "judge down"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyFinalized(id) if id == record.id));
    }

    #[test]
    fn test_finalize_with_pending_status_rejected() {
        let record = SubmissionRecord::pending(new_submission());
        let mut verdict = accepted_verdict();
        verdict.status = SubmissionStatus::Pending;

        assert!(matches!(
            record.finalize_with(&verdict),
            Err(StoreError::NotTerminal(_))
        ));
    }

    #[test]
    fn test_summary_shape() {
        let record = SubmissionRecord::pending(new_submission());
        let json = serde_json::to_value(record.summary()).unwrap();

        assert_eq!(json["status"], "pending");
        assert_eq!(json["testCasesTotal"], 3);
        assert_eq!(json["testCasesPassed"], 0);
        assert!(json.get("errorMessage").is_none());
    }

    #[test]
    fn test_outcome_error_text() {
        let mut outcome = TestOutcome::inconclusive("");
        assert_eq!(outcome.error_text(), Some("Inconclusive"));

        outcome.stderr = "Traceback".to_string();
        assert_eq!(outcome.error_text(), Some("Traceback"));
    }
}
