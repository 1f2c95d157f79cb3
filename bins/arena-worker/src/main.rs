mod catalog;
mod config;
mod docker;
mod engine;
mod error;
mod evaluator;
mod executor;
mod harness;
mod language;
mod marshal;
mod progression;
mod scratch;

#[cfg(test)]
mod engine_tests;

use arena_common::redis;
use arena_common::types::{Job, JobOutcome, JobRecord};
use catalog::RedisCatalog;
use config::{EngineKind, LanguageConfigManager, Settings};
use docker::DockerEngine;
use engine::{ExecutionEngine, ProcessEngine};
use error::GradeError;
use executor::Grader;
use progression::RedisProgression;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // LOG_FORMAT=json for log shippers, human readable otherwise
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Arena worker booting...");

    let settings = Settings::from_env()?;

    let languages = LanguageConfigManager::load(&settings.languages_path).map_err(|e| {
        error!(path = %settings.languages_path.display(), "Failed to load language configurations: {:#}", e);
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let engine: Arc<dyn ExecutionEngine> = match settings.engine {
        EngineKind::Docker => Arc::new(DockerEngine::new(&languages)?),
        EngineKind::Process => {
            warn!("Process engine selected: submissions run on the host with rlimits only, no container isolation");
            Arc::new(ProcessEngine::new(&languages))
        }
    };
    info!(engine = engine.name(), scratch_root = %settings.scratch_root.display(), "Execution engine ready");

    let client = ::redis::Client::open(settings.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", settings.redis_url);

    let grader = Arc::new(Grader::new(
        Arc::new(languages),
        engine,
        Arc::new(RedisCatalog::new(redis_conn.clone())),
        Arc::new(RedisProgression::new(redis_conn.clone())),
        settings.clone(),
    ));

    let workers = (0..settings.concurrency).map(|slot| {
        let grader = grader.clone();
        let settings = settings.clone();
        let conn = redis_conn.clone();
        async move { worker_loop(slot, conn, grader, settings).await }
    });

    info!(concurrency = settings.concurrency, "Waiting for jobs");

    tokio::select! {
        result = futures_util::future::try_join_all(workers) => {
            result?;
        }
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => warn!("Received shutdown signal, abandoning in-flight jobs"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip(conn, grader, settings))]
async fn worker_loop(
    slot: usize,
    mut conn: ::redis::aio::ConnectionManager,
    grader: Arc<Grader>,
    settings: Settings,
) -> anyhow::Result<()> {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(&mut conn, 5.0).await {
            Ok(Some(job)) => {
                let job_id = job.id();
                info!(
                    job_id = %job_id,
                    language = %job.language(),
                    kind = match &job { Job::Grade(_) => "grade", Job::Run(_) => "run" },
                    "Received job"
                );

                let started = Instant::now();
                let outcome = process_job(&mut conn, &grader, job).await;
                info!(
                    job_id = %job_id,
                    outcome = outcome_label(&outcome),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );

                let record = JobRecord::new(job_id, outcome);
                match redis::store_result(&mut conn, &record, settings.result_ttl_secs).await {
                    Ok(_) => debug!(job_id = %job_id, "Result persisted to Redis"),
                    // Non-fatal - worker continues
                    Err(e) => error!(job_id = %job_id, error = %e, "Failed to persist result"),
                }
                if let Err(e) = redis::clear_cancel(&mut conn, &job_id).await {
                    warn!(job_id = %job_id, error = %e, "Failed to clear cancellation flag");
                }
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn outcome_label(outcome: &JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Graded(v) if v.all_passed => "accepted",
        JobOutcome::Graded(_) => "graded",
        JobOutcome::Ran(_) => "ran",
        JobOutcome::Rejected(_) => "rejected",
        JobOutcome::Cancelled => "cancelled",
    }
}

fn reject(job_id: uuid::Uuid, e: GradeError) -> JobOutcome {
    if e.is_system_error() {
        error!(job_id = %job_id, error = %e, "Job rejected");
    } else {
        warn!(job_id = %job_id, error = %e, "Job rejected");
    }
    JobOutcome::Rejected(e.to_rejection())
}

/// Run one job while polling its cancellation flag. Cancelling drops the
/// grading future, which kills the running step and removes its scratch directory.
async fn process_job(
    conn: &mut ::redis::aio::ConnectionManager,
    grader: &Grader,
    job: Job,
) -> JobOutcome {
    let job_id = job.id();
    let work = async {
        match &job {
            Job::Grade(request) => match grader.grade(request).await {
                Ok(verdict) => JobOutcome::Graded(verdict),
                Err(e) => reject(job_id, e),
            },
            Job::Run(request) => match grader.run(request).await {
                Ok(output) => JobOutcome::Ran(output),
                Err(e) => reject(job_id, e),
            },
        }
    };
    tokio::pin!(work);

    let mut poll = tokio::time::interval(CANCEL_POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outcome = &mut work => return outcome,
            _ = poll.tick() => {
                match redis::is_job_cancelled(conn, &job_id).await {
                    Ok(true) => {
                        warn!(job_id = %job_id, "Job cancelled");
                        return JobOutcome::Cancelled;
                    }
                    Ok(false) => {}
                    Err(e) => debug!(job_id = %job_id, error = %e, "Cancellation check failed"),
                }
            }
        }
    }
}
