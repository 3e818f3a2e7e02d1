use crate::error::StoreError;
use crate::types::{Finalization, Problem, SubmissionRecord, Verdict};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

/// Redis key semantics - defines the storage layout shared by every caller
/// Records are keyed by primary key only, so concurrent evaluations never
/// contend on a shared key

pub const SUBMISSION_PREFIX: &str = "gavel:submission";
pub const PROBLEM_PREFIX: &str = "gavel:problem";
pub const HISTORY_PREFIX: &str = "gavel:history";

/// Atomic pending -> terminal transition
/// Returns {1, new} when applied, {0, current} when the record was already
/// terminal, {-1, ''} when the record does not exist
const FINALIZE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return {-1, ''}
end
local decoded = cjson.decode(current)
if decoded['status'] == 'pending' then
  redis.call('SET', KEYS[1], ARGV[1])
  return {1, ARGV[1]}
end
return {0, current}
"#;

/// Generate the record key for a submission
pub fn submission_key(id: &Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

/// Generate the key for a published problem
pub fn problem_key(problem_id: &str) -> String {
    format!("{}:{}", PROBLEM_PREFIX, problem_id)
}

/// Generate the per user/problem submission history key
pub fn history_key(user_id: &str, problem_id: &str) -> String {
    format!("{}:{}:{}", HISTORY_PREFIX, user_id, problem_id)
}

/// Persist a freshly created pending record and index it in the history list
pub async fn store_pending(
    conn: &mut ConnectionManager,
    record: &SubmissionRecord,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(record)?;

    redis::pipe()
        .atomic()
        .set(submission_key(&record.id), payload)
        .ignore()
        .lpush(
            history_key(&record.user_id, &record.problem_id),
            record.id.to_string(),
        )
        .ignore()
        .query_async::<_, ()>(conn)
        .await?;

    Ok(())
}

/// Retrieve a submission record
pub async fn get_submission(
    conn: &mut ConnectionManager,
    id: &Uuid,
) -> Result<Option<SubmissionRecord>, StoreError> {
    let payload: Option<String> = conn.get(submission_key(id)).await?;
    match payload {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

/// Apply a terminal verdict exactly once
///
/// Writing the verdict a record already carries returns the stored record
/// unchanged.
pub async fn finalize_submission(
    conn: &mut ConnectionManager,
    id: &Uuid,
    verdict: &Verdict,
) -> Result<SubmissionRecord, StoreError> {
    let current = get_submission(conn, id)
        .await?
        .ok_or(StoreError::NotFound(*id))?;

    let updated = match current.finalize_with(verdict)? {
        Finalization::Unchanged => return Ok(current),
        Finalization::Applied(record) => record,
    };

    let payload = serde_json::to_string(&updated)?;
    let (applied, stored): (i64, String) = redis::Script::new(FINALIZE_SCRIPT)
        .key(submission_key(id))
        .arg(payload)
        .invoke_async(conn)
        .await?;

    match applied {
        1 => Ok(updated),
        -1 => Err(StoreError::NotFound(*id)),
        _ => {
            // Another writer finalized between our read and the script
            let existing: SubmissionRecord = serde_json::from_str(&stored)?;
            debug!(submission_id = %id, status = ?existing.status, "Finalize raced with another writer");
            if existing.matches_verdict(verdict) {
                Ok(existing)
            } else {
                Err(StoreError::AlreadyFinalized(*id))
            }
        }
    }
}

/// Most recent submissions of a user for one problem, newest first
pub async fn list_submissions(
    conn: &mut ConnectionManager,
    user_id: &str,
    problem_id: &str,
    limit: usize,
) -> Result<Vec<SubmissionRecord>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = conn
        .lrange(history_key(user_id, problem_id), 0, limit as isize - 1)
        .await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let keys: Vec<String> = ids
        .iter()
        .map(|id| format!("{}:{}", SUBMISSION_PREFIX, id))
        .collect();
    let payloads: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

    payloads
        .into_iter()
        .flatten()
        .map(|data| serde_json::from_str(&data).map_err(StoreError::from))
        .collect()
}

/// Retrieve a published problem
pub async fn get_problem(
    conn: &mut ConnectionManager,
    problem_id: &str,
) -> Result<Option<Problem>, StoreError> {
    let payload: Option<String> = conn.get(problem_key(problem_id)).await?;
    match payload {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

/// Publish (or replace) a problem
pub async fn put_problem(conn: &mut ConnectionManager, problem: &Problem) -> Result<(), StoreError> {
    let payload = serde_json::to_string(problem)?;
    let _: () = conn.set(problem_key(&problem.id), payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::types::{NewSubmission, SubmissionStatus};

    #[test]
    fn test_key_naming() {
        let id = Uuid::new_v4();
        assert_eq!(submission_key(&id), format!("gavel:submission:{}", id));
        assert_eq!(problem_key("two-sum"), "gavel:problem:two-sum");
        assert_eq!(history_key("u1", "two-sum"), "gavel:history:u1:two-sum");
    }

    #[test]
    fn test_submission_key_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(submission_key(&id), submission_key(&id));
    }

    async fn create_redis_conn() -> ConnectionManager {
        let client = redis::Client::open("redis://127.0.0.1:6379")
            .expect("Failed to create Redis client");
        client
            .get_connection_manager()
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_finalize_roundtrip_against_redis() {
        let mut conn = create_redis_conn().await;
        let record = SubmissionRecord::pending(NewSubmission {
            user_id: format!("user-{}", Uuid::new_v4()),
            problem_id: "sum".to_string(),
            code: "print(3)".to_string(),
            language: Language::Python,
            test_cases_total: 2,
        });
        store_pending(&mut conn, &record).await.unwrap();

        let verdict = Verdict {
            status: SubmissionStatus::Accepted,
            passed: 2,
            total: 2,
            runtime_seconds: 0.03,
            peak_memory_kb: 900,
            error_message: None,
        };
        let first = finalize_submission(&mut conn, &record.id, &verdict).await.unwrap();
        let second = finalize_submission(&mut conn, &record.id, &verdict).await.unwrap();
        assert_eq!(first, second);

        let conflict = finalize_submission(&mut conn, &record.id, &Verdict::system_error(2, "x")).await;
        assert!(matches!(conflict, Err(StoreError::AlreadyFinalized(_))));

        let history = list_submissions(&mut conn, &record.user_id, "sum", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SubmissionStatus::Accepted);
    }
}
