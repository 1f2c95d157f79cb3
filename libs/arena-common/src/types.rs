use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Languages the judge knows how to grade.
///
/// Requests carry the language as free text so that an unknown value can be
/// reported as a grading rejection instead of a deserialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    CSharp,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::JavaScript, Language::Python, Language::CSharp];

    /// Parse a language name, accepting the aliases clients commonly send.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "python" | "py" | "python3" => Some(Language::Python),
            "csharp" | "c#" | "cs" => Some(Language::CSharp),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::JavaScript => write!(f, "javascript"),
            Language::Python => write!(f, "python"),
            Language::CSharp => write!(f, "csharp"),
        }
    }
}

/// One (input, expected output) pair. Position in `Problem::test_cases` is its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub expected_input: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub problem_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestContext {
    pub contest_id: String,
}

/// A graded submission. Lives for the duration of one grading request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRequest {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    pub problem_id: String,
    pub submitter_id: String,
    #[serde(default)]
    pub contest: Option<ContestContext>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Ungraded execution of raw source, no harness and no test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Envelope pushed onto the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Grade(GradeRequest),
    Run(RunRequest),
}

impl Job {
    pub fn id(&self) -> Uuid {
        match self {
            Job::Grade(req) => req.id,
            Job::Run(req) => req.id,
        }
    }

    pub fn language(&self) -> &str {
        match self {
            Job::Grade(req) => &req.language,
            Job::Run(req) => &req.language,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    Failed,
    Error,
}

/// Why a test case ended in an `Error` verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFault {
    Timeout,
    Crash,
    CompileError,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// 1-based position of the test case in the problem.
    pub test_case: usize,
    pub verdict: Verdict,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ExecutionFault>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionVerdict {
    pub submission_id: Uuid,
    pub all_passed: bool,
    pub results: Vec<TestCaseResult>,
    pub xp_awarded: bool,
    pub xp_amount: u32,
    pub contest_completion_awarded: bool,
}

impl SubmissionVerdict {
    pub fn message(&self) -> &'static str {
        if self.all_passed {
            "Correct Answer!"
        } else {
            "Wrong Answer!"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// stdout on success, otherwise stderr or the fault description.
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub timed_out: bool,
    pub execution_time_ms: u64,
}

/// Submission-level failure categories reported instead of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    EmptySubmission,
    SourceTooLarge,
    NoEntryPointFound,
    InvalidInputFormat,
    NoTestCases,
    ProblemNotFound,
    ContestNotFound,
    ProblemNotInContest,
    NotParticipating,
    UnsupportedLanguage,
    ToolchainUnavailable,
    Internal,
}

impl RejectionKind {
    /// HTTP-style status class for callers that sit behind a web layer.
    pub fn status_code(&self) -> u16 {
        match self {
            RejectionKind::ProblemNotFound | RejectionKind::ContestNotFound => 404,
            RejectionKind::UnsupportedLanguage
            | RejectionKind::ToolchainUnavailable
            | RejectionKind::Internal => 500,
            _ => 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRejection {
    pub kind: RejectionKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum JobOutcome {
    Graded(SubmissionVerdict),
    Ran(RunOutput),
    Rejected(JobRejection),
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
    pub finished_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: Uuid, outcome: JobOutcome) -> Self {
        Self {
            job_id,
            outcome,
            finished_at: Utc::now(),
        }
    }
}

/// XP and solve counters for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub total_xp: i64,
    pub problems_solved_xp: i64,
    pub contests_xp: i64,
    pub solved_questions: i64,
    pub contests_participated: i64,
    pub contests_finished: i64,
}

// XP awards, shared by the worker and the CLI.
pub const PROBLEM_SOLVED_XP: u32 = 50;
pub const CONTEST_JOIN_XP: u32 = 10;
pub const CONTEST_SOLVE_XP: u32 = 50;
pub const CONTEST_COMPLETE_XP: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContestMilestone {
    Joined,
    Solved { problem_id: String },
    Completed,
}

impl ContestMilestone {
    pub fn xp(&self) -> u32 {
        match self {
            ContestMilestone::Joined => CONTEST_JOIN_XP,
            ContestMilestone::Solved { .. } => CONTEST_SOLVE_XP,
            ContestMilestone::Completed => CONTEST_COMPLETE_XP,
        }
    }
}
