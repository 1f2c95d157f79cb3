use crate::types::{Contest, ContestMilestone, Job, JobRecord, Problem, UserProgress};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

/// Redis key scheme shared by the worker and the CLI.
/// Keys are deterministic so producers and consumers never drift.

pub const QUEUE_KEY: &str = "arena:queue";
pub const RESULT_PREFIX: &str = "arena:result";
pub const CANCEL_PREFIX: &str = "arena:cancel";
pub const PROBLEM_PREFIX: &str = "arena:problem";
pub const CONTEST_PREFIX: &str = "arena:contest";
pub const USER_PREFIX: &str = "arena:user";

pub const FIELD_TOTAL_XP: &str = "total_xp";
pub const FIELD_PROBLEMS_SOLVED_XP: &str = "problems_solved_xp";
pub const FIELD_CONTESTS_XP: &str = "contests_xp";
pub const FIELD_SOLVED_QUESTIONS: &str = "solved_questions";
pub const FIELD_CONTESTS_PARTICIPATED: &str = "contests_participated";
pub const FIELD_CONTESTS_FINISHED: &str = "contests_finished";

/// Cancellation flags outlive any realistic job.
const CANCEL_TTL_SECS: u64 = 3600;

pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

pub fn cancel_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, job_id)
}

pub fn problem_key(problem_id: &str) -> String {
    format!("{}:{}", PROBLEM_PREFIX, problem_id)
}

pub fn contest_key(contest_id: &str) -> String {
    format!("{}:{}", CONTEST_PREFIX, contest_id)
}

pub fn xp_key(user_id: &str) -> String {
    format!("{}:{}:xp", USER_PREFIX, user_id)
}

pub fn solved_key(user_id: &str) -> String {
    format!("{}:{}:solved", USER_PREFIX, user_id)
}

pub fn contests_joined_key(user_id: &str) -> String {
    format!("{}:{}:contests:joined", USER_PREFIX, user_id)
}

pub fn contests_completed_key(user_id: &str) -> String {
    format!("{}:{}:contests:completed", USER_PREFIX, user_id)
}

pub fn contest_solved_key(user_id: &str, contest_id: &str) -> String {
    format!("{}:{}:contest:{}:solved", USER_PREFIX, user_id, contest_id)
}

fn encode<T: Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })
}

fn decode<T: DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
    })
}

/// Push a job onto the queue. RPUSH + BLPOP gives FIFO order.
pub async fn push_job(conn: &mut ConnectionManager, job: &Job) -> RedisResult<()> {
    let payload = encode(job)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop the next job, waiting at most `timeout_seconds` so callers can observe shutdown.
pub async fn pop_job(
    conn: &mut ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<Job>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(decode(&payload)?)),
        None => Ok(None),
    }
}

/// Store a finished job record with a TTL.
pub async fn store_result(
    conn: &mut ConnectionManager,
    record: &JobRecord,
    ttl_secs: u64,
) -> RedisResult<()> {
    let payload = encode(record)?;
    conn.set_ex(result_key(&record.job_id), payload, ttl_secs).await
}

pub async fn get_result(
    conn: &mut ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobRecord>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;
    payload.map(|data| decode(&data)).transpose()
}

pub async fn request_cancel(conn: &mut ConnectionManager, job_id: &uuid::Uuid) -> RedisResult<()> {
    conn.set_ex(cancel_key(job_id), "1", CANCEL_TTL_SECS).await
}

pub async fn is_job_cancelled(
    conn: &mut ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(job_id)).await
}

pub async fn clear_cancel(conn: &mut ConnectionManager, job_id: &uuid::Uuid) -> RedisResult<()> {
    conn.del(cancel_key(job_id)).await
}

pub async fn put_problem(conn: &mut ConnectionManager, problem: &Problem) -> RedisResult<()> {
    let payload = encode(problem)?;
    conn.set(problem_key(&problem.id), payload).await
}

pub async fn get_problem(
    conn: &mut ConnectionManager,
    problem_id: &str,
) -> RedisResult<Option<Problem>> {
    let payload: Option<String> = conn.get(problem_key(problem_id)).await?;
    payload.map(|data| decode(&data)).transpose()
}

pub async fn put_contest(conn: &mut ConnectionManager, contest: &Contest) -> RedisResult<()> {
    let payload = encode(contest)?;
    conn.set(contest_key(&contest.id), payload).await
}

pub async fn get_contest(
    conn: &mut ConnectionManager,
    contest_id: &str,
) -> RedisResult<Option<Contest>> {
    let payload: Option<String> = conn.get(contest_key(contest_id)).await?;
    payload.map(|data| decode(&data)).transpose()
}

/// Membership check and XP increments run as one script so an award is
/// applied at most once even with several workers racing on the same user.
///
/// KEYS[1] membership set, KEYS[2] xp hash.
/// ARGV[1] member, ARGV[2] xp, ARGV[3] category field, ARGV[4] counter field or "".
const AWARD_SCRIPT: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HINCRBY', KEYS[2], 'total_xp', ARGV[2])
redis.call('HINCRBY', KEYS[2], ARGV[3], ARGV[2])
if ARGV[4] ~= '' then
    redis.call('HINCRBY', KEYS[2], ARGV[4], 1)
end
return 1
"#;

async fn apply_award(
    conn: &mut ConnectionManager,
    user_id: &str,
    membership_key: String,
    member: &str,
    xp: u32,
    category_field: &str,
    counter_field: Option<&str>,
) -> RedisResult<bool> {
    let applied: i64 = Script::new(AWARD_SCRIPT)
        .key(membership_key)
        .key(xp_key(user_id))
        .arg(member)
        .arg(xp)
        .arg(category_field)
        .arg(counter_field.unwrap_or(""))
        .invoke_async(conn)
        .await?;
    Ok(applied == 1)
}

/// Credit a solved problem. Returns false when the user had already solved it.
pub async fn award_problem_solved(
    conn: &mut ConnectionManager,
    user_id: &str,
    problem_id: &str,
    xp: u32,
) -> RedisResult<bool> {
    apply_award(
        conn,
        user_id,
        solved_key(user_id),
        problem_id,
        xp,
        FIELD_PROBLEMS_SOLVED_XP,
        Some(FIELD_SOLVED_QUESTIONS),
    )
    .await
}

/// Credit a contest milestone. Returns false when it was already credited.
pub async fn award_contest_milestone(
    conn: &mut ConnectionManager,
    user_id: &str,
    contest_id: &str,
    milestone: &ContestMilestone,
    xp: u32,
) -> RedisResult<bool> {
    let (membership_key, member, counter) = match milestone {
        ContestMilestone::Joined => (
            contests_joined_key(user_id),
            contest_id,
            Some(FIELD_CONTESTS_PARTICIPATED),
        ),
        ContestMilestone::Solved { problem_id } => (
            contest_solved_key(user_id, contest_id),
            problem_id.as_str(),
            None,
        ),
        ContestMilestone::Completed => (
            contests_completed_key(user_id),
            contest_id,
            Some(FIELD_CONTESTS_FINISHED),
        ),
    };

    apply_award(conn, user_id, membership_key, member, xp, FIELD_CONTESTS_XP, counter).await
}

pub async fn is_participating(
    conn: &mut ConnectionManager,
    user_id: &str,
    contest_id: &str,
) -> RedisResult<bool> {
    conn.sismember(contests_joined_key(user_id), contest_id).await
}

pub async fn contest_solved_problems(
    conn: &mut ConnectionManager,
    user_id: &str,
    contest_id: &str,
) -> RedisResult<Vec<String>> {
    conn.smembers(contest_solved_key(user_id, contest_id)).await
}

pub async fn get_progress(conn: &mut ConnectionManager, user_id: &str) -> RedisResult<UserProgress> {
    let fields: HashMap<String, i64> = conn.hgetall(xp_key(user_id)).await?;
    Ok(progress_from_fields(&fields))
}

fn progress_from_fields(fields: &HashMap<String, i64>) -> UserProgress {
    let field = |name: &str| fields.get(name).copied().unwrap_or(0);
    UserProgress {
        total_xp: field(FIELD_TOTAL_XP),
        problems_solved_xp: field(FIELD_PROBLEMS_SOLVED_XP),
        contests_xp: field(FIELD_CONTESTS_XP),
        solved_questions: field(FIELD_SOLVED_QUESTIONS),
        contests_participated: field(FIELD_CONTESTS_PARTICIPATED),
        contests_finished: field(FIELD_CONTESTS_FINISHED),
    }
}
