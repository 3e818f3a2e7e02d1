use uuid::Uuid;

/// Failures of the submission and problem stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("submission {0} not found")]
    NotFound(Uuid),

    #[error("submission {0} already finalized with a different verdict")]
    AlreadyFinalized(Uuid),

    #[error("refusing to finalize submission {0} with a non-terminal status")]
    NotTerminal(Uuid),
}
