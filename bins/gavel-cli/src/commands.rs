// CLI commands for driving the evaluation pipeline
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use gavel_common::{Config, LanguageRegistry, Problem, SubmissionRecord, TestOutcome};
use gavel_pipeline::{
    HttpJudge, MemoryProblemStore, MemorySubmissionStore, Orchestrator, PipelineError, ProblemStore,
    RedisProblemStore, RedisSubmissionStore, SubmissionStore, SubmitRequest,
};
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

const DEFAULT_LANGUAGES_PATH: &str = "config/languages.json";

/// Language registry from GAVEL_LANGUAGES_PATH, then config/languages.json,
/// then the built-in table
pub fn load_languages(config: &Config) -> Result<LanguageRegistry> {
    if let Some(path) = &config.languages_path {
        return LanguageRegistry::load_from_file(path)
            .with_context(|| format!("Failed to load language configuration from {}", path));
    }

    if Path::new(DEFAULT_LANGUAGES_PATH).exists() {
        return LanguageRegistry::load_from_file(DEFAULT_LANGUAGES_PATH)
            .context("Failed to load config/languages.json");
    }

    Ok(LanguageRegistry::builtin())
}

pub fn load_problem(path: &Path) -> Result<Problem> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read problem file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse problem file {}", path.display()))
}

fn read_source(path: &Path) -> Result<String> {
    let code = fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file {}", path.display()))?;
    if code.trim().is_empty() {
        bail!("Source file {} is empty", path.display());
    }
    Ok(code)
}

async fn connect_redis(config: &Config) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let conn = ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    info!(redis_url = %config.redis_url, "Connected to Redis");
    Ok(conn)
}

fn build_orchestrator(
    config: &Config,
    submissions: Arc<dyn SubmissionStore>,
    problems: Arc<dyn ProblemStore>,
) -> Result<Orchestrator> {
    let languages = load_languages(config)?;
    let judge = HttpJudge::new(config.judge.clone()).context("Failed to build judge client")?;
    info!(judge_url = %config.judge.base_url, "Judge client ready");

    Ok(Orchestrator::new(Arc::new(judge), submissions, problems)
        .with_languages(Arc::new(languages))
        .with_judge_config(&config.judge)
        .with_poll_config(config.poll.clone()))
}

fn print_outcomes(outcomes: &[TestOutcome]) {
    for (i, outcome) in outcomes.iter().enumerate() {
        let mark = if outcome.status.is_accepted() { "✓" } else { "✗" };
        println!(
            "  {} Test {} → {:?} ({:.3}s, {} KB)",
            mark,
            i + 1,
            outcome.status,
            outcome.time_seconds,
            outcome.memory_kb
        );
        if let Some(error) = outcome.error_text() {
            println!("    {}", error.trim());
        }
    }
}

fn print_record(record: &SubmissionRecord) -> Result<()> {
    println!("🧾 Submission {}", record.id);
    println!("  User:     {}", record.user_id);
    println!("  Problem:  {}", record.problem_id);
    println!("  Language: {}", record.language);
    println!("  Created:  {}", record.created_at);
    if let Some(finalized_at) = record.finalized_at {
        println!("  Finalized: {}", finalized_at);
    }
    let summary = serde_json::to_string_pretty(&record.summary()).context("Failed to serialize summary")?;
    println!("{}", summary);
    Ok(())
}

pub fn list_languages(config: &Config) -> Result<()> {
    let registry = load_languages(config)?;
    let languages = registry.enabled_languages();

    println!("📋 Enabled Languages:\n");
    println!("{:<12} {:<10}", "LANGUAGE", "ENV ID");
    println!("{}", "─".repeat(24));
    for language in &languages {
        if let Some(env) = registry.environment_for(*language) {
            println!("{:<12} {:<10}", language.to_string(), env.to_string());
        }
    }
    println!("\n✅ Total: {} language(s)", languages.len());
    Ok(())
}

/// Run against the problem's visible test cases. Nothing touches Redis.
pub async fn run_problem(
    config: &Config,
    problem_path: &Path,
    language: &str,
    code_path: &Path,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    let problem = load_problem(problem_path)?;
    let code = read_source(code_path)?;
    let orchestrator = build_orchestrator(
        config,
        Arc::new(MemorySubmissionStore::new()),
        Arc::new(MemoryProblemStore::new()),
    )?;

    println!(
        "🚀 Running {} against {} visible test case(s) of '{}'",
        language,
        problem.visible_test_cases.len(),
        problem.id
    );

    let report = match orchestrator
        .run(&code, language, &problem.visible_test_cases, cancel)
        .await
    {
        Ok(report) => report,
        Err(PipelineError::TimedOut {
            unresolved,
            total,
            outcomes,
        }) => {
            print_outcomes(&outcomes);
            bail!("Run timed out: judge did not finish {} of {} test case(s)", unresolved, total);
        }
        Err(e) => return Err(e).context("Run failed"),
    };

    print_outcomes(&report.outcomes);
    if report.passed {
        println!("\n✅ All {} test case(s) passed", report.verdict.total);
    } else {
        println!(
            "\n❌ {}/{} test case(s) passed",
            report.verdict.passed, report.verdict.total
        );
    }
    Ok(())
}

pub async fn submit(
    config: &Config,
    user_id: &str,
    problem_id: &str,
    language: &str,
    code_path: &Path,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    let code = read_source(code_path)?;
    let conn = connect_redis(config).await?;
    let orchestrator = build_orchestrator(
        config,
        Arc::new(RedisSubmissionStore::new(conn.clone())),
        Arc::new(RedisProblemStore::new(conn)),
    )?;

    println!("📨 Submitting {} solution for '{}'", language, problem_id);

    let record = orchestrator
        .submit(
            SubmitRequest {
                user_id: user_id.to_string(),
                problem_id: problem_id.to_string(),
                code,
                language: language.to_string(),
            },
            cancel,
        )
        .await
        .context("Submission rejected")?;

    print_record(&record)
}

/// A published problem must be gradable
fn check_publishable(problem: &Problem) -> Result<()> {
    if problem.hidden_test_cases.is_empty() {
        bail!("Problem '{}' has no hidden test cases and cannot be published", problem.id);
    }
    Ok(())
}

pub async fn validate_problem(
    config: &Config,
    problem_path: &Path,
    publish: bool,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    let problem = load_problem(problem_path)?;
    if publish {
        check_publishable(&problem)?;
    }

    // Validation only needs a problem store when publishing
    let problems = if publish {
        Some(RedisProblemStore::new(connect_redis(config).await?))
    } else {
        None
    };

    let orchestrator = build_orchestrator(
        config,
        Arc::new(MemorySubmissionStore::new()),
        Arc::new(MemoryProblemStore::new()),
    )?;

    println!(
        "🔍 Validating {} reference solution(s) for '{}'",
        problem.reference_solutions.len(),
        problem.id
    );

    let validation = orchestrator
        .validate_problem(&problem, cancel)
        .await
        .context("Problem validation failed")?;

    for reference in &validation.references {
        println!(
            "  ✓ {:<12} {}/{} passed ({:.3}s)",
            reference.language.to_string(),
            reference.verdict.passed,
            reference.verdict.total,
            reference.verdict.runtime_seconds
        );
    }
    println!("✅ All reference solutions passed");

    if let Some(store) = problems {
        store
            .put_problem(&problem)
            .await
            .with_context(|| format!("Failed to publish problem '{}'", problem.id))?;
        println!("📦 Published problem '{}'", problem.id);
    }

    Ok(())
}

pub async fn show_submission(config: &Config, id: Uuid) -> Result<()> {
    let conn = connect_redis(config).await?;
    let store = RedisSubmissionStore::new(conn);

    match store.get(id).await.context("Failed to load submission")? {
        Some(record) => print_record(&record),
        None => bail!("Submission {} not found", id),
    }
}

pub async fn show_history(config: &Config, user_id: &str, problem_id: &str, limit: usize) -> Result<()> {
    let conn = connect_redis(config).await?;
    let store = RedisSubmissionStore::new(conn);
    let records = store
        .list_for(user_id, problem_id, limit)
        .await
        .context("Failed to load submission history")?;

    if records.is_empty() {
        println!("No submissions from '{}' for '{}'.", user_id, problem_id);
        return Ok(());
    }

    println!("{:<38} {:<14} {:<8} {:<10} {}", "ID", "STATUS", "PASSED", "RUNTIME", "CREATED");
    println!("{}", "─".repeat(100));
    for record in &records {
        println!(
            "{:<38} {:<14} {:<8} {:<10} {}",
            record.id.to_string(),
            format!("{:?}", record.status),
            format!("{}/{}", record.test_cases_passed, record.test_cases_total),
            format!("{:.3}s", record.runtime_seconds),
            record.created_at
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_common::{JudgeConfig, Language, PollConfig};
    use std::io::Write;

    fn config_with_languages(path: Option<String>) -> Config {
        Config {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            languages_path: path,
            judge: JudgeConfig::default(),
            poll: PollConfig::default(),
        }
    }

    #[test]
    fn test_load_problem_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "id": "sum",
                "title": "Sum",
                "visible_test_cases": [{{"input": "1 2", "expected_output": "3"}}],
                "hidden_test_cases": [{{"input": "5 5", "expected_output": "10"}}],
                "reference_solutions": {{"python": "print(sum(map(int, input().split())))"}}
            }}"#
        )
        .unwrap();

        let problem = load_problem(file.path()).unwrap();
        assert_eq!(problem.id, "sum");
        assert_eq!(problem.hidden_test_cases[0].expected_output, "10");
        assert!(problem.reference_solutions.contains_key(&Language::Python));
    }

    #[test]
    fn test_load_problem_missing_file() {
        let err = load_problem(Path::new("/nonexistent/problem.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read problem file"));
    }

    #[test]
    fn test_load_languages_from_configured_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"languages": [{{"name": "python", "environment_id": 92}}]}}"#).unwrap();

        let config = config_with_languages(Some(file.path().display().to_string()));
        let registry = load_languages(&config).unwrap();

        assert_eq!(registry.enabled_languages(), vec![Language::Python]);
        assert_eq!(registry.environment_for(Language::Python).map(|e| e.0), Some(92));
    }

    #[test]
    fn test_publish_requires_hidden_cases() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "id": "draft",
                "title": "Draft",
                "visible_test_cases": [{{"input": "1 2", "expected_output": "3"}}],
                "hidden_test_cases": [],
                "reference_solutions": {{"python": "print(3)"}}
            }}"#
        )
        .unwrap();

        let problem = load_problem(file.path()).unwrap();
        let err = check_publishable(&problem).unwrap_err();
        assert!(err.to_string().contains("no hidden test cases"));
    }

    #[tokio::test]
    async fn test_validate_publish_rejects_problem_without_hidden_cases() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"id": "draft", "title": "Draft", "visible_test_cases": [{{"input": "1", "expected_output": "1"}}], "hidden_test_cases": [], "reference_solutions": {{"python": "print(1)"}}}}"#
        )
        .unwrap();

        // Rejected before Redis or the judge are contacted
        let config = config_with_languages(None);
        let (_tx, rx) = watch::channel(false);
        let err = validate_problem(&config, file.path(), true, rx).await.unwrap_err();
        assert!(err.to_string().contains("cannot be published"));
    }

    #[test]
    fn test_read_source_rejects_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(read_source(file.path()).is_err());
    }
}
