use std::env;
use std::time::Duration;

/// Floor for every poll sleep
pub const MIN_POLL_INTERVAL_MS: u64 = 50;

/// Ceiling for the delay between batch submit attempts
pub const MAX_SUBMIT_BACKOFF_MS: u64 = 10_000;

/// Connection settings for the external judge
/// Injected into the judge client at construction, never compiled in
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub base_url: String,
    pub auth_header: String,
    pub auth_token: Option<String>,
    pub base64_encoded: bool,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Attempts for the batch submit call when the judge is unavailable
    pub submit_max_attempts: u32,
    pub submit_backoff_ms: u64,
}

impl JudgeConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("GAVEL_JUDGE_URL")
                .unwrap_or_else(|_| "http://localhost:2358".to_string()),
            auth_header: env::var("GAVEL_JUDGE_AUTH_HEADER")
                .unwrap_or_else(|_| "X-Auth-Token".to_string()),
            auth_token: env::var("GAVEL_JUDGE_AUTH_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            base64_encoded: env_parse("GAVEL_JUDGE_BASE64", true),
            request_timeout_ms: env_parse("GAVEL_JUDGE_TIMEOUT_MS", 10_000),
            connect_timeout_ms: env_parse("GAVEL_JUDGE_CONNECT_TIMEOUT_MS", 3_000),
            submit_max_attempts: env_parse("GAVEL_SUBMIT_MAX_ATTEMPTS", 3),
            submit_backoff_ms: env_parse("GAVEL_SUBMIT_BACKOFF_MS", 500),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn submit_backoff(&self) -> Duration {
        Duration::from_millis(self.submit_backoff_ms.min(MAX_SUBMIT_BACKOFF_MS))
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Polling policy for one dispatched batch
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Hard wall-clock budget for the whole batch
    pub deadline_ms: u64,
    /// Consecutive transient fetch failures tolerated before aborting
    pub max_transient_failures: u32,
}

impl PollConfig {
    pub fn from_env() -> Self {
        Self {
            initial_interval_ms: env_parse("GAVEL_POLL_INITIAL_MS", 1_000),
            max_interval_ms: env_parse("GAVEL_POLL_MAX_MS", 8_000),
            deadline_ms: env_parse("GAVEL_POLL_DEADLINE_MS", 60_000),
            max_transient_failures: env_parse("GAVEL_POLL_MAX_FAILURES", 5),
        }
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Exponential backoff: double the interval, capped at the maximum
    pub fn next_interval(&self, current: Duration) -> Duration {
        let max = Duration::from_millis(self.max_interval_ms).max(self.initial_interval());
        current
            .saturating_mul(2)
            .clamp(Duration::from_millis(MIN_POLL_INTERVAL_MS), max)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub languages_path: Option<String>,
    pub judge: JudgeConfig,
    pub poll: PollConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            languages_path: env::var("GAVEL_LANGUAGES_PATH").ok(),
            judge: JudgeConfig::from_env(),
            poll: PollConfig::from_env(),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
