use arena_common::types::{JobRejection, RejectionKind};
use thiserror::Error;

/// Submission-level failures. Any of these aborts grading as a whole;
/// per-test execution faults never surface here.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Toolchain unavailable for {language}: {reason}")]
    ToolchainUnavailable { language: String, reason: String },
    #[error("No code submitted")]
    EmptySubmission,
    #[error("Source code exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },
    #[error("Problem not found: {0}")]
    ProblemNotFound(String),
    #[error("No test cases available for problem {0}")]
    NoTestCases(String),
    #[error("No valid function found in the submitted code")]
    NoEntryPointFound,
    #[error("Invalid input format in test case {test_case}: {reason}")]
    InvalidInputFormat { test_case: usize, reason: String },
    #[error("Contest not found: {0}")]
    ContestNotFound(String),
    #[error("Problem {problem_id} is not part of contest {contest_id}")]
    ProblemNotInContest {
        problem_id: String,
        contest_id: String,
    },
    #[error("User has not joined contest {0}")]
    NotParticipating(String),
    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GradeError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            GradeError::UnsupportedLanguage(_) => RejectionKind::UnsupportedLanguage,
            GradeError::ToolchainUnavailable { .. } => RejectionKind::ToolchainUnavailable,
            GradeError::EmptySubmission => RejectionKind::EmptySubmission,
            GradeError::SourceTooLarge { .. } => RejectionKind::SourceTooLarge,
            GradeError::ProblemNotFound(_) => RejectionKind::ProblemNotFound,
            GradeError::NoTestCases(_) => RejectionKind::NoTestCases,
            GradeError::NoEntryPointFound => RejectionKind::NoEntryPointFound,
            GradeError::InvalidInputFormat { .. } => RejectionKind::InvalidInputFormat,
            GradeError::ContestNotFound(_) => RejectionKind::ContestNotFound,
            GradeError::ProblemNotInContest { .. } => RejectionKind::ProblemNotInContest,
            GradeError::NotParticipating(_) => RejectionKind::NotParticipating,
            GradeError::Storage(_) | GradeError::Io(_) => RejectionKind::Internal,
        }
    }

    /// Configuration and infrastructure failures, as opposed to bad submissions or bad problem data.
    pub fn is_system_error(&self) -> bool {
        self.kind().status_code() >= 500
    }

    pub fn to_rejection(&self) -> JobRejection {
        JobRejection {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
