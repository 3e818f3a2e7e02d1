use std::collections::HashMap;

use async_trait::async_trait;
use gavel_common::redis as keys;
use gavel_common::{Finalization, NewSubmission, Problem, StoreError, SubmissionRecord, Verdict};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use uuid::Uuid;

/// Durable submission records
///
/// `finalize` is the only mutation after creation and applies at most one
/// terminal verdict per record.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create_pending(&self, new: NewSubmission) -> Result<SubmissionRecord, StoreError>;

    async fn finalize(&self, id: Uuid, verdict: &Verdict) -> Result<SubmissionRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<SubmissionRecord>, StoreError>;

    /// Newest first
    async fn list_for(
        &self,
        user_id: &str,
        problem_id: &str,
        limit: usize,
    ) -> Result<Vec<SubmissionRecord>, StoreError>;
}

/// Read-only view of published problems
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError>;
}

#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: ConnectionManager,
}

impl RedisSubmissionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn create_pending(&self, new: NewSubmission) -> Result<SubmissionRecord, StoreError> {
        let record = SubmissionRecord::pending(new);
        let mut conn = self.conn.clone();
        keys::store_pending(&mut conn, &record).await?;
        Ok(record)
    }

    async fn finalize(&self, id: Uuid, verdict: &Verdict) -> Result<SubmissionRecord, StoreError> {
        let mut conn = self.conn.clone();
        keys::finalize_submission(&mut conn, &id, verdict).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<SubmissionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        keys::get_submission(&mut conn, &id).await
    }

    async fn list_for(
        &self,
        user_id: &str,
        problem_id: &str,
        limit: usize,
    ) -> Result<Vec<SubmissionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        keys::list_submissions(&mut conn, user_id, problem_id, limit).await
    }
}

#[derive(Clone)]
pub struct RedisProblemStore {
    conn: ConnectionManager,
}

impl RedisProblemStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Publish a problem, replacing any previous version
    pub async fn put_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        keys::put_problem(&mut conn, problem).await
    }
}

#[async_trait]
impl ProblemStore for RedisProblemStore {
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError> {
        let mut conn = self.conn.clone();
        keys::get_problem(&mut conn, problem_id).await
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<Uuid, SubmissionRecord>,
    /// Insertion order per (user, problem)
    history: HashMap<(String, String), Vec<Uuid>>,
}

/// In-process submission store
#[derive(Default)]
pub struct MemorySubmissionStore {
    state: Mutex<MemoryState>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.state.lock().records.values().cloned().collect()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn create_pending(&self, new: NewSubmission) -> Result<SubmissionRecord, StoreError> {
        let record = SubmissionRecord::pending(new);
        let mut state = self.state.lock();
        state
            .history
            .entry((record.user_id.clone(), record.problem_id.clone()))
            .or_default()
            .push(record.id);
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn finalize(&self, id: Uuid, verdict: &Verdict) -> Result<SubmissionRecord, StoreError> {
        let mut state = self.state.lock();
        let current = state.records.get(&id).ok_or(StoreError::NotFound(id))?;

        match current.finalize_with(verdict)? {
            Finalization::Unchanged => Ok(current.clone()),
            Finalization::Applied(updated) => {
                state.records.insert(id, updated.clone());
                Ok(updated)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self.state.lock().records.get(&id).cloned())
    }

    async fn list_for(
        &self,
        user_id: &str,
        problem_id: &str,
        limit: usize,
    ) -> Result<Vec<SubmissionRecord>, StoreError> {
        let state = self.state.lock();
        let Some(ids) = state
            .history
            .get(&(user_id.to_string(), problem_id.to_string()))
        else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }
}

/// In-process problem catalogue
#[derive(Default)]
pub struct MemoryProblemStore {
    problems: Mutex<HashMap<String, Problem>>,
}

impl MemoryProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_problem(self, problem: Problem) -> Self {
        self.insert(problem);
        self
    }

    pub fn insert(&self, problem: Problem) {
        self.problems.lock().insert(problem.id.clone(), problem);
    }
}

#[async_trait]
impl ProblemStore for MemoryProblemStore {
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError> {
        Ok(self.problems.lock().get(problem_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_common::{Language, SubmissionStatus};

    fn new_submission(user_id: &str) -> NewSubmission {
        NewSubmission {
            user_id: user_id.to_string(),
            problem_id: "sum".to_string(),
            code: "print(3)".to_string(),
            language: Language::Python,
            test_cases_total: 2,
        }
    }

    fn verdict(status: SubmissionStatus) -> Verdict {
        Verdict {
            status,
            passed: 2,
            total: 2,
            runtime_seconds: 0.02,
            peak_memory_kb: 640,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_create_pending_is_visible() {
        let store = MemorySubmissionStore::new();
        let record = store.create_pending(new_submission("u1")).await.unwrap();

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SubmissionStatus::Pending);
        assert_eq!(fetched.test_cases_total, 2);
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let store = MemorySubmissionStore::new();
        let record = store.create_pending(new_submission("u1")).await.unwrap();

        let first = store
            .finalize(record.id, &verdict(SubmissionStatus::Accepted))
            .await
            .unwrap();
        let second = store
            .finalize(record.id, &verdict(SubmissionStatus::Accepted))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, SubmissionStatus::Accepted);
        assert_eq!(first.finalized_at, second.finalized_at);
    }

    #[tokio::test]
    async fn test_finalize_conflict_keeps_first_verdict() {
        let store = MemorySubmissionStore::new();
        let record = store.create_pending(new_submission("u1")).await.unwrap();
        store
            .finalize(record.id, &verdict(SubmissionStatus::Accepted))
            .await
            .unwrap();

        let err = store
            .finalize(record.id, &Verdict::system_error(2, "late"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::AlreadyFinalized(_)));
        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Accepted);
    }

    #[tokio::test]
    async fn test_finalize_unknown_id() {
        let store = MemorySubmissionStore::new();
        let err = store
            .finalize(Uuid::new_v4(), &verdict(SubmissionStatus::Accepted))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_for_newest_first() {
        let store = MemorySubmissionStore::new();
        let first = store.create_pending(new_submission("u1")).await.unwrap();
        let second = store.create_pending(new_submission("u1")).await.unwrap();
        store.create_pending(new_submission("u2")).await.unwrap();

        let history = store.list_for("u1", "sum", 10).await.unwrap();
        let ids: Vec<Uuid> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert_eq!(store.list_for("u1", "sum", 1).await.unwrap().len(), 1);
        assert!(store.list_for("u3", "sum", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_problem_store() {
        let store = MemoryProblemStore::new().with_problem(Problem {
            id: "sum".to_string(),
            title: "Sum".to_string(),
            visible_test_cases: vec![],
            hidden_test_cases: vec![],
            reference_solutions: Default::default(),
        });

        assert!(store.get_problem("sum").await.unwrap().is_some());
        assert!(store.get_problem("missing").await.unwrap().is_none());
    }
}
