pub mod error;
pub mod judge;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod reducer;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::PipelineError;
pub use judge::{CaseStatus, HttpJudge, Judge, JudgeError, JudgeRequest, JudgeToken};
pub use orchestrator::{Orchestrator, ProblemValidation, ReferenceResult, RunReport, SubmitRequest};
pub use poller::{uncancellable, AbortReason, BatchReport, BatchState, PollAggregator};
pub use reducer::{reduce, reduce_partial};
pub use store::{
    MemoryProblemStore, MemorySubmissionStore, ProblemStore, RedisProblemStore, RedisSubmissionStore,
    SubmissionStore,
};
