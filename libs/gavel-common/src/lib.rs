pub mod config;
pub mod error;
pub mod language;
pub mod redis;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{Config, JudgeConfig, PollConfig, MAX_SUBMIT_BACKOFF_MS, MIN_POLL_INTERVAL_MS};
pub use error::StoreError;
pub use language::{EnvironmentId, Language, LanguageRegistry, RegistryError, UnsupportedLanguage};
pub use types::{
    Finalization, NewSubmission, Problem, StatusKind, SubmissionRecord, SubmissionStatus, SubmissionSummary,
    TestCase, TestOutcome, Verdict,
};
