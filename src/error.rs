//! Top-level error types for Switchboard.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. All of these are startup-time failures —
/// a bad threshold combination is rejected here, never at runtime.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Identity resolution errors.
///
/// "Unknown user" is not an error — `resolve` returns `Ok(None)` for that.
/// This enum covers storage outages only, so callers can never conflate the
/// two conditions.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Checkpoint store errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The stored version advanced since the caller loaded — the whole
    /// load-mutate-save cycle must be retried.
    #[error("checkpoint version conflict for {thread_id}: base version {expected} is stale")]
    Conflict { thread_id: String, expected: i64 },

    /// The shared throughput budget stayed exhausted past the wait ceiling.
    #[error("checkpoint {operation} capacity exceeded after waiting {waited_ms}ms")]
    CapacityExceeded {
        operation: &'static str,
        waited_ms: u64,
    },

    #[error("checkpoint backend error: {0}")]
    Backend(String),
}

impl CheckpointError {
    /// Whether the failure is worth a bounded retry (outage or throttling).
    /// Conflicts are not transient — they need a fresh load, not a re-send.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CheckpointError::Backend(_) | CheckpointError::CapacityExceeded { .. }
        )
    }
}

/// Reasoning invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),

    #[error("provider request failed: {0}")]
    Provider(String),
}

/// Downstream workflow dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("workflow trigger request failed: {0}")]
    Request(String),

    #[error("workflow engine rejected execution ({status}): {body}")]
    Rejected { status: u16, body: String },
}
