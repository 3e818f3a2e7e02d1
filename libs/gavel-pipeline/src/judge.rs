use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gavel_common::{EnvironmentId, JudgeConfig, StatusKind, TestOutcome};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const STATUS_FIELDS: &str = "token,status,stdout,stderr,compile_output,message,time,memory";

/// Opaque per-test-case handle issued by the judge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JudgeToken(pub String);

impl JudgeToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JudgeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One batch entry. Input and expected output always come from the same test case.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeRequest {
    pub source_code: String,
    pub environment_id: EnvironmentId,
    pub stdin: String,
    pub expected_output: String,
}

/// Status of a single token at the time of a fetch
#[derive(Debug, Clone, PartialEq)]
pub enum CaseStatus {
    Pending,
    Done(TestOutcome),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JudgeError {
    /// Transport failure, 5xx or throttling. Worth retrying.
    #[error("judge unavailable: {0}")]
    Unavailable(String),

    #[error("judge rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed judge response: {0}")]
    MalformedResponse(String),
}

impl JudgeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JudgeError::Unavailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JudgeError::Unavailable(_) => "unavailable",
            JudgeError::Rejected { .. } => "rejected",
            JudgeError::MalformedResponse(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for JudgeError {
    fn from(err: reqwest::Error) -> Self {
        JudgeError::Unavailable(err.to_string())
    }
}

/// External code-execution service
///
/// Implementations must be safe for unlimited concurrent use.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Dispatch a batch in one call. Tokens are ordinal-aligned with `requests`.
    async fn submit_batch(&self, requests: &[JudgeRequest]) -> Result<Vec<JudgeToken>, JudgeError>;

    /// Current status of each token. Never waits for completion; tokens
    /// missing from the returned map are still pending.
    async fn fetch_statuses(
        &self,
        tokens: &[JudgeToken],
    ) -> Result<HashMap<JudgeToken, CaseStatus>, JudgeError>;
}

/// Map a Judge0 status id onto a terminal classification (`None` = still running)
pub fn classify_status(id: u32) -> Option<StatusKind> {
    match id {
        0..=2 => None,
        3 => Some(StatusKind::Accepted),
        4 => Some(StatusKind::WrongAnswer),
        5 => Some(StatusKind::TimeLimitExceeded),
        6 => Some(StatusKind::CompileError),
        7..=12 => Some(StatusKind::RuntimeError),
        _ => Some(StatusKind::Other),
    }
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    submissions: Vec<SubmitItem<'a>>,
}

#[derive(Serialize)]
struct SubmitItem<'a> {
    language_id: u32,
    source_code: std::borrow::Cow<'a, str>,
    stdin: std::borrow::Cow<'a, str>,
    expected_output: std::borrow::Cow<'a, str>,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    submissions: Vec<Option<RawSubmission>>,
}

#[derive(Deserialize)]
struct RawSubmission {
    token: Option<String>,
    status: Option<RawStatus>,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    time: Option<Value>,
    memory: Option<Value>,
}

#[derive(Deserialize)]
struct RawStatus {
    id: u32,
    #[serde(default)]
    description: String,
}

/// Judge0-compatible HTTP adapter
#[derive(Clone)]
pub struct HttpJudge {
    client: reqwest::Client,
    config: JudgeConfig,
}

impl HttpJudge {
    pub fn new(config: JudgeConfig) -> Result<Self, JudgeError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.header(self.config.auth_header.as_str(), token.as_str()),
            None => request,
        }
    }

    fn base64_flag(&self) -> &'static str {
        if self.config.base64_encoded {
            "true"
        } else {
            "false"
        }
    }

    fn encode<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        if self.config.base64_encoded {
            STANDARD.encode(text.as_bytes()).into()
        } else {
            text.into()
        }
    }

    fn decode(&self, field: Option<String>) -> Result<String, JudgeError> {
        let Some(raw) = field else {
            return Ok(String::new());
        };
        if !self.config.base64_encoded {
            return Ok(raw);
        }

        // Judge0 wraps encoded output at 60 columns
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| JudgeError::MalformedResponse(format!("invalid base64 field: {}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn to_outcome(&self, raw: RawSubmission, kind: StatusKind, description: String) -> Result<TestOutcome, JudgeError> {
        let stdout = self.decode(raw.stdout)?;
        let stderr = self.decode(raw.stderr)?;
        let compile_output = self.decode(raw.compile_output)?;
        let message = self.decode(raw.message)?;

        let mut error_text = if kind == StatusKind::CompileError && !compile_output.trim().is_empty() {
            compile_output
        } else {
            stderr
        };
        if error_text.trim().is_empty() && !message.trim().is_empty() {
            error_text = message;
        }

        Ok(TestOutcome {
            status: kind,
            stdout,
            stderr: error_text,
            time_seconds: raw.time.as_ref().and_then(number_field).unwrap_or(0.0),
            memory_kb: raw
                .memory
                .as_ref()
                .and_then(number_field)
                .map(|kb| kb.max(0.0).round() as u64)
                .unwrap_or(0),
            description: Some(description).filter(|d| !d.is_empty()),
        })
    }
}

/// Judge0 reports `time` as a string and `memory` as a number; accept either
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn read_success_body(response: reqwest::Response) -> Result<(StatusCode, String), JudgeError> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok((status, body));
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(JudgeError::Unavailable(format!("status {}: {}", status.as_u16(), body)));
    }
    Err(JudgeError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Judge for HttpJudge {
    async fn submit_batch(&self, requests: &[JudgeRequest]) -> Result<Vec<JudgeToken>, JudgeError> {
        let body = SubmitBody {
            submissions: requests
                .iter()
                .map(|r| SubmitItem {
                    language_id: r.environment_id.0,
                    source_code: self.encode(&r.source_code),
                    stdin: self.encode(&r.stdin),
                    expected_output: self.encode(&r.expected_output),
                })
                .collect(),
        };

        let request = self
            .client
            .post(self.url("/submissions/batch"))
            .query(&[("base64_encoded", self.base64_flag())])
            .json(&body);

        let (status, text) = read_success_body(self.authorize(request).send().await?).await?;

        let items: Vec<Value> = serde_json::from_str(&text)
            .map_err(|e| JudgeError::MalformedResponse(format!("submit response: {}", e)))?;

        if items.len() != requests.len() {
            return Err(JudgeError::MalformedResponse(format!(
                "expected {} tokens, got {}",
                requests.len(),
                items.len()
            )));
        }

        let mut tokens = Vec::with_capacity(items.len());
        for item in items {
            match item.get("token").and_then(Value::as_str) {
                Some(token) => tokens.push(JudgeToken(token.to_string())),
                // Per-item validation errors come back in place of the token
                None => {
                    return Err(JudgeError::Rejected {
                        status: status.as_u16(),
                        body: item.to_string(),
                    })
                }
            }
        }

        debug!(tokens = tokens.len(), "Batch dispatched to judge");
        Ok(tokens)
    }

    async fn fetch_statuses(
        &self,
        tokens: &[JudgeToken],
    ) -> Result<HashMap<JudgeToken, CaseStatus>, JudgeError> {
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = tokens.iter().map(JudgeToken::as_str).collect::<Vec<_>>().join(",");
        let request = self.client.get(self.url("/submissions/batch")).query(&[
            ("tokens", joined.as_str()),
            ("base64_encoded", self.base64_flag()),
            ("fields", STATUS_FIELDS),
        ]);

        let (_, text) = read_success_body(self.authorize(request).send().await?).await?;
        let body: StatusBody = serde_json::from_str(&text)
            .map_err(|e| JudgeError::MalformedResponse(format!("status response: {}", e)))?;

        let mut statuses = HashMap::with_capacity(body.submissions.len());
        for raw in body.submissions.into_iter().flatten() {
            let Some(token) = raw.token.clone().map(JudgeToken) else {
                warn!("Judge status entry without a token, skipping");
                continue;
            };

            let classified = raw
                .status
                .as_ref()
                .and_then(|s| classify_status(s.id).map(|kind| (kind, s.description.clone())));
            let status = match classified {
                None => CaseStatus::Pending,
                Some((kind, description)) => CaseStatus::Done(self.to_outcome(raw, kind, description)?),
            };
            statuses.insert(token, status);
        }

        Ok(statuses)
    }
}
