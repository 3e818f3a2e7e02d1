//! Scripted judge used by the pipeline tests

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use gavel_common::{StatusKind, TestOutcome};
use parking_lot::Mutex;

use crate::judge::{CaseStatus, Judge, JudgeError, JudgeRequest, JudgeToken};

pub fn outcome(status: StatusKind, time_seconds: f64, memory_kb: u64) -> TestOutcome {
    TestOutcome {
        status,
        stdout: String::new(),
        stderr: String::new(),
        time_seconds,
        memory_kb,
        description: None,
    }
}

pub fn accepted(time_seconds: f64, memory_kb: u64) -> TestOutcome {
    outcome(StatusKind::Accepted, time_seconds, memory_kb)
}

pub fn runtime_error(stderr: &str) -> TestOutcome {
    TestOutcome {
        stderr: stderr.to_string(),
        description: Some("Runtime Error (NZEC)".to_string()),
        ..outcome(StatusKind::RuntimeError, 0.01, 512)
    }
}

fn script_key(source: Option<&str>, stdin: &str) -> String {
    match source {
        Some(source) => format!("{}\u{0}{}", source, stdin),
        None => stdin.to_string(),
    }
}

struct Script {
    /// Pending rounds before the outcome is reported
    delay: u32,
    outcome: TestOutcome,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, Script>,
    /// token -> (source, stdin, fetches seen)
    issued: HashMap<JudgeToken, (String, String, u32)>,
    submit_errors: VecDeque<JudgeError>,
    fetch_errors: VecDeque<JudgeError>,
    submitted: Vec<JudgeRequest>,
    fetched: Vec<Vec<JudgeToken>>,
    submit_calls: u32,
    fetch_calls: u32,
    next_token: u32,
}

/// Judge whose results are keyed by each request's stdin, optionally
/// narrowed to one source
///
/// Inputs without a script stay pending forever.
#[derive(Default)]
pub struct ScriptedJudge {
    state: Mutex<State>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, stdin: &str, outcome: TestOutcome) -> Self {
        self.with_delayed_outcome(stdin, 0, outcome)
    }

    pub fn with_delayed_outcome(self, stdin: &str, delay: u32, outcome: TestOutcome) -> Self {
        self.state
            .lock()
            .scripts
            .insert(script_key(None, stdin), Script { delay, outcome });
        self
    }

    /// Outcome for `stdin` only when submitted with `source`
    pub fn with_source_outcome(self, source: &str, stdin: &str, outcome: TestOutcome) -> Self {
        self.state
            .lock()
            .scripts
            .insert(script_key(Some(source), stdin), Script { delay: 0, outcome });
        self
    }

    /// Errors returned by the next submit calls, in order
    pub fn fail_submits(self, errors: Vec<JudgeError>) -> Self {
        self.state.lock().submit_errors.extend(errors);
        self
    }

    /// Errors returned by the next fetch calls, in order
    pub fn fail_fetches(self, errors: Vec<JudgeError>) -> Self {
        self.state.lock().fetch_errors.extend(errors);
        self
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().submit_calls
    }

    pub fn fetch_calls(&self) -> u32 {
        self.state.lock().fetch_calls
    }

    pub fn submitted(&self) -> Vec<JudgeRequest> {
        self.state.lock().submitted.clone()
    }

    pub fn fetched_tokens(&self) -> Vec<Vec<JudgeToken>> {
        self.state.lock().fetched.clone()
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn submit_batch(&self, requests: &[JudgeRequest]) -> Result<Vec<JudgeToken>, JudgeError> {
        let mut state = self.state.lock();
        state.submit_calls += 1;
        if let Some(err) = state.submit_errors.pop_front() {
            return Err(err);
        }

        let mut tokens = Vec::with_capacity(requests.len());
        for request in requests {
            state.next_token += 1;
            let token = JudgeToken(format!("tok-{}", state.next_token));
            state.issued.insert(
                token.clone(),
                (request.source_code.clone(), request.stdin.clone(), 0),
            );
            state.submitted.push(request.clone());
            tokens.push(token);
        }
        Ok(tokens)
    }

    async fn fetch_statuses(
        &self,
        tokens: &[JudgeToken],
    ) -> Result<HashMap<JudgeToken, CaseStatus>, JudgeError> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;
        if let Some(err) = state.fetch_errors.pop_front() {
            return Err(err);
        }
        state.fetched.push(tokens.to_vec());

        let State { scripts, issued, .. } = &mut *state;
        let mut statuses = HashMap::new();
        for token in tokens {
            let Some((source, stdin, seen)) = issued.get_mut(token) else {
                continue;
            };
            *seen += 1;
            let script = scripts
                .get(&script_key(Some(source.as_str()), stdin))
                .or_else(|| scripts.get(&script_key(None, stdin)));
            let status = match script {
                Some(script) if *seen > script.delay => CaseStatus::Done(script.outcome.clone()),
                _ => CaseStatus::Pending,
            };
            statuses.insert(token.clone(), status);
        }
        Ok(statuses)
    }
}
