// CLI commands: enqueue jobs, seed problems and contests, inspect outcomes
use anyhow::{bail, Context, Result};
use arena_common::redis as store;
use arena_common::types::{
    Contest, ContestContext, ContestMilestone, GradeRequest, Job, JobOutcome, JobRecord, Language,
    Problem, RunOutput, RunRequest, SubmissionVerdict, Verdict,
};
use redis::aio::ConnectionManager;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
    ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn parse_job_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("'{}' is not a valid job id", id))
}

/// Warn early about names the worker will reject; the worker stays authoritative.
fn check_language(language: &str) {
    if Language::from_str(language).is_none() {
        eprintln!("⚠️  '{}' is not a known language, the job will be rejected", language);
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    conn: &mut ConnectionManager,
    language: &str,
    file: &Path,
    problem_id: &str,
    user_id: &str,
    contest_id: Option<&str>,
    timeout_ms: Option<u64>,
    wait: bool,
) -> Result<()> {
    check_language(language);

    let request = GradeRequest {
        id: Uuid::new_v4(),
        language: language.to_string(),
        source_code: read_source(file)?,
        problem_id: problem_id.to_string(),
        submitter_id: user_id.to_string(),
        contest: contest_id.map(|id| ContestContext {
            contest_id: id.to_string(),
        }),
        timeout_ms,
    };
    let job_id = request.id;

    store::push_job(conn, &Job::Grade(request))
        .await
        .context("Failed to enqueue submission")?;
    println!("📨 Submitted job {}", job_id);

    if wait {
        let record = wait_for_result(conn, &job_id).await?;
        print_record(&record);
    }
    Ok(())
}

pub async fn run(
    conn: &mut ConnectionManager,
    language: &str,
    file: &Path,
    timeout_ms: Option<u64>,
    wait: bool,
) -> Result<()> {
    check_language(language);

    let request = RunRequest {
        id: Uuid::new_v4(),
        language: language.to_string(),
        source_code: read_source(file)?,
        timeout_ms,
    };
    let job_id = request.id;

    store::push_job(conn, &Job::Run(request))
        .await
        .context("Failed to enqueue run")?;
    println!("📨 Queued run {}", job_id);

    if wait {
        let record = wait_for_result(conn, &job_id).await?;
        print_record(&record);
    }
    Ok(())
}

async fn wait_for_result(conn: &mut ConnectionManager, job_id: &Uuid) -> Result<JobRecord> {
    let started = Instant::now();
    println!("⏳ Waiting for result...");

    loop {
        if let Some(record) = store::get_result(conn, job_id)
            .await
            .context("Failed to read result")?
        {
            return Ok(record);
        }
        if started.elapsed() > WAIT_TIMEOUT {
            bail!(
                "No result after {}s; check later with: arena result {}",
                WAIT_TIMEOUT.as_secs(),
                job_id
            );
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

pub async fn show_result(conn: &mut ConnectionManager, id: &str) -> Result<()> {
    let job_id = parse_job_id(id)?;
    match store::get_result(conn, &job_id).await.context("Failed to read result")? {
        Some(record) => print_record(&record),
        None => println!("No result yet for {} (queued, running, or expired)", job_id),
    }
    Ok(())
}

pub async fn cancel(conn: &mut ConnectionManager, id: &str) -> Result<()> {
    let job_id = parse_job_id(id)?;
    store::request_cancel(conn, &job_id)
        .await
        .context("Failed to request cancellation")?;
    println!("🛑 Cancellation requested for {}", job_id);
    Ok(())
}

fn print_record(record: &JobRecord) {
    println!("\nJob {} finished at {}", record.job_id, record.finished_at);
    match &record.outcome {
        JobOutcome::Graded(verdict) => print_verdict(verdict),
        JobOutcome::Ran(output) => print_run_output(output),
        JobOutcome::Rejected(rejection) => {
            println!("❌ Rejected ({:?}): {}", rejection.kind, rejection.message);
        }
        JobOutcome::Cancelled => println!("🛑 Cancelled"),
    }
}

fn print_verdict(verdict: &SubmissionVerdict) {
    let icon = if verdict.all_passed { "✅" } else { "❌" };
    println!("{} {}\n", icon, verdict.message());

    println!("{:<6} {:<8} {:<14} {:>8}  {}", "TEST", "VERDICT", "FAULT", "TIME", "DETAIL");
    println!("{}", "─".repeat(80));
    for result in &verdict.results {
        let status = match result.verdict {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Error => "error",
        };
        let fault = result
            .fault
            .map(|f| format!("{:?}", f))
            .unwrap_or_else(|| "-".to_string());
        let detail = result.detail.lines().next().unwrap_or("");
        println!(
            "{:<6} {:<8} {:<14} {:>6}ms  {}",
            result.test_case, status, fault, result.execution_time_ms, detail
        );
    }

    if verdict.xp_awarded {
        println!("\n🏆 +{} XP", verdict.xp_amount);
    }
    if verdict.contest_completion_awarded {
        println!("🎉 Contest completed!");
    }
}

fn print_run_output(output: &RunOutput) {
    if output.timed_out {
        println!("⏱️  Timed out after {}ms", output.execution_time_ms);
    } else {
        let icon = if output.success { "✅" } else { "❌" };
        println!("{} Finished in {}ms", icon, output.execution_time_ms);
    }
    if !output.stdout.is_empty() {
        println!("\n--- stdout ---\n{}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        println!("\n--- stderr ---\n{}", output.stderr.trim_end());
    }
}

fn read_json<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", file.display()))
}

pub async fn put_problem(conn: &mut ConnectionManager, file: &Path) -> Result<()> {
    let problem: Problem = read_json(file)?;
    if problem.id.trim().is_empty() {
        bail!("Problem id cannot be empty");
    }
    if problem.test_cases.is_empty() {
        eprintln!("⚠️  Problem '{}' has no test cases; submissions will be rejected", problem.id);
    }

    store::put_problem(conn, &problem)
        .await
        .context("Failed to store problem")?;
    println!(
        "✅ Stored problem '{}' with {} test case(s)",
        problem.id,
        problem.test_cases.len()
    );
    Ok(())
}

pub async fn show_problem(conn: &mut ConnectionManager, id: &str) -> Result<()> {
    match store::get_problem(conn, id).await.context("Failed to load problem")? {
        Some(problem) => println!("{}", serde_json::to_string_pretty(&problem)?),
        None => bail!("Problem '{}' not found", id),
    }
    Ok(())
}

pub async fn put_contest(conn: &mut ConnectionManager, file: &Path) -> Result<()> {
    let contest: Contest = read_json(file)?;
    if contest.id.trim().is_empty() {
        bail!("Contest id cannot be empty");
    }

    for problem_id in &contest.problem_ids {
        if store::get_problem(conn, problem_id).await?.is_none() {
            eprintln!("⚠️  Contest references unknown problem '{}'", problem_id);
        }
    }

    store::put_contest(conn, &contest)
        .await
        .context("Failed to store contest")?;
    println!(
        "✅ Stored contest '{}' with {} problem(s)",
        contest.id,
        contest.problem_ids.len()
    );
    Ok(())
}

pub async fn join_contest(conn: &mut ConnectionManager, user_id: &str, contest_id: &str) -> Result<()> {
    if store::get_contest(conn, contest_id)
        .await
        .context("Failed to load contest")?
        .is_none()
    {
        bail!("Contest '{}' not found", contest_id);
    }

    let milestone = ContestMilestone::Joined;
    let credited = store::award_contest_milestone(conn, user_id, contest_id, &milestone, milestone.xp())
        .await
        .context("Failed to join contest")?;

    if credited {
        println!("✅ {} joined '{}' (+{} XP)", user_id, contest_id, milestone.xp());
    } else {
        println!("{} has already joined '{}'", user_id, contest_id);
    }
    Ok(())
}

pub async fn show_progress(conn: &mut ConnectionManager, user_id: &str) -> Result<()> {
    let progress = store::get_progress(conn, user_id)
        .await
        .context("Failed to load progress")?;

    println!("📊 Progress for {}\n", user_id);
    println!("  Total XP:              {}", progress.total_xp);
    println!("  Problem XP:            {}", progress.problems_solved_xp);
    println!("  Contest XP:            {}", progress.contests_xp);
    println!("  Problems solved:       {}", progress.solved_questions);
    println!("  Contests joined:       {}", progress.contests_participated);
    println!("  Contests finished:     {}", progress.contests_finished);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LanguageEntry {
    name: String,
    version: String,
    image: String,
    memory_limit_mb: u32,
    cpu_limit: f32,
    #[serde(default)]
    compile: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageEntry>,
}

pub fn list_languages(config: &Path) -> Result<()> {
    let languages: LanguagesJson = read_json(config)?;

    if languages.languages.is_empty() {
        println!("No languages configured.");
        return Ok(());
    }

    println!("📋 Configured Languages:\n");
    println!(
        "{:<12} {:<10} {:<24} {:<10} {:<8} {}",
        "NAME", "VERSION", "IMAGE", "COMPILED", "CPU", "MEMORY"
    );
    println!("{}", "─".repeat(80));

    for lang in &languages.languages {
        println!(
            "{:<12} {:<10} {:<24} {:<10} {:<8.1} {} MB",
            lang.name,
            lang.version,
            lang.image,
            if lang.compile.is_some() { "yes" } else { "no" },
            lang.cpu_limit,
            lang.memory_limit_mb
        );
    }

    println!("\n✅ Total: {} language(s)", languages.languages.len());
    Ok(())
}
