/// End-to-end grading tests
///
/// These drive `Grader` through whole submissions:
/// 1. Judging, aggregation and XP for standalone problems
/// 2. Submission-level rejections that must happen before any execution
/// 3. Per-test faults that must not stop later test cases
/// 4. Contest preconditions, milestones and completion
/// 5. Real execution through the process engine when python3 is installed

use crate::catalog::InMemoryCatalog;
use crate::config::{EngineKind, LanguageConfig, LanguageConfigManager, Settings, TEST_LANGUAGES_JSON};
use crate::engine::{ExecutionEngine, ProcessEngine, ResourceLimits, StepOutput};
use crate::error::GradeError;
use crate::evaluator::TestExecutionOutput;
use crate::executor::Grader;
use crate::harness::{ExecutionPlan, Step};
use crate::progression::{InMemoryProgression, ProgressionUpdater};
use crate::scratch::ScratchDir;
use anyhow::{anyhow, Result};
use arena_common::types::{
    Contest, ContestContext, ContestMilestone, ExecutionFault, GradeRequest, Problem, RunRequest,
    TestCase, Verdict, CONTEST_JOIN_XP,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SUM_SOURCE: &str = "def sum_list(nums):\n    return sum(nums)\n";

/// Engine that answers from a table keyed by a fragment of the generated program.
/// A program matching no entry is reported as an infrastructure failure.
struct ScriptedEngine {
    responses: Vec<(&'static str, TestExecutionOutput)>,
    executions: AtomicUsize,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            responses: Vec::new(),
            executions: AtomicUsize::new(0),
        }
    }

    fn respond(mut self, needle: &'static str, output: TestExecutionOutput) -> Self {
        self.responses.push((needle, output));
        self
    }

    fn prints(self, needle: &'static str, stdout: &str) -> Self {
        self.respond(
            needle,
            TestExecutionOutput {
                stdout: format!("{}\n", stdout),
                exit_code: Some(0),
                execution_time_ms: 3,
                ..Default::default()
            },
        )
    }

    fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn ensure_toolchain(&self, _config: &LanguageConfig) -> Result<(), GradeError> {
        Ok(())
    }

    async fn run_step(
        &self,
        _plan: &ExecutionPlan,
        _step: &Step,
        _scratch: &ScratchDir,
        _limits: &ResourceLimits,
    ) -> Result<StepOutput> {
        Ok(StepOutput::default())
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        scratch: &ScratchDir,
        _limits: &ResourceLimits,
    ) -> Result<TestExecutionOutput> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        assert!(scratch.path().join(&plan.source_file).exists());

        self.responses
            .iter()
            .find(|(needle, _)| plan.program.contains(needle))
            .map(|(_, output)| output.clone())
            .ok_or_else(|| anyhow!("sandbox unavailable"))
    }
}

struct Fixture {
    grader: Grader,
    engine: Arc<ScriptedEngine>,
    progression: Arc<InMemoryProgression>,
    scratch_root: tempfile::TempDir,
}

fn settings(scratch_root: &std::path::Path) -> Settings {
    Settings {
        engine: EngineKind::Process,
        scratch_root: scratch_root.to_path_buf(),
        ..Settings::default()
    }
}

fn sum_problem() -> Problem {
    Problem {
        id: "sum".to_string(),
        title: "Sum of a list".to_string(),
        expected_input: "[1,2,3]".to_string(),
        expected_output: "6".to_string(),
        test_cases: vec![
            TestCase {
                input: "[1,2,3]".to_string(),
                output: "6".to_string(),
            },
            TestCase {
                input: "[10, -4]".to_string(),
                output: "6".to_string(),
            },
        ],
    }
}

fn max_problem() -> Problem {
    Problem {
        id: "max".to_string(),
        title: "Largest element".to_string(),
        expected_input: String::new(),
        expected_output: String::new(),
        test_cases: vec![TestCase {
            input: "[4,9,2]".to_string(),
            output: "9".to_string(),
        }],
    }
}

fn weekly() -> Contest {
    Contest {
        id: "weekly".to_string(),
        name: "Weekly".to_string(),
        problem_ids: vec!["sum".to_string(), "max".to_string()],
    }
}

fn fixture(engine: ScriptedEngine, catalog: InMemoryCatalog) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine);
    let progression = Arc::new(InMemoryProgression::new());
    let grader = Grader::new(
        Arc::new(LanguageConfigManager::from_json(TEST_LANGUAGES_JSON).unwrap()),
        engine.clone(),
        Arc::new(catalog),
        progression.clone(),
        settings(root.path()),
    );

    Fixture {
        grader,
        engine,
        progression,
        scratch_root: root,
    }
}

fn default_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_problem(sum_problem())
        .with_problem(max_problem())
        .with_problem(Problem {
            id: "empty".to_string(),
            title: "No tests".to_string(),
            expected_input: String::new(),
            expected_output: String::new(),
            test_cases: vec![],
        })
        .with_problem(Problem {
            id: "broken".to_string(),
            title: "Bad data".to_string(),
            expected_input: String::new(),
            expected_output: String::new(),
            test_cases: vec![
                TestCase {
                    input: "[1,2]".to_string(),
                    output: "3".to_string(),
                },
                TestCase {
                    input: "[1,2".to_string(),
                    output: "3".to_string(),
                },
            ],
        })
        .with_contest(weekly())
}

fn request(problem_id: &str, source: &str) -> GradeRequest {
    GradeRequest {
        id: Uuid::new_v4(),
        language: "python".to_string(),
        source_code: source.to_string(),
        problem_id: problem_id.to_string(),
        submitter_id: "alice".to_string(),
        contest: None,
        timeout_ms: None,
    }
}

fn contest_request(problem_id: &str, source: &str) -> GradeRequest {
    GradeRequest {
        contest: Some(ContestContext {
            contest_id: "weekly".to_string(),
        }),
        ..request(problem_id, source)
    }
}

fn passing_engine() -> ScriptedEngine {
    ScriptedEngine::new()
        .prints("sum_list([1, 2, 3])", "6")
        .prints("sum_list([10, -4])", "6")
        .prints("largest([4, 9, 2])", "9")
}

#[tokio::test]
async fn test_all_passed_awards_problem_xp() {
    let fx = fixture(passing_engine(), default_catalog());

    let verdict = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert!(verdict.all_passed);
    assert_eq!(verdict.results.len(), 2);
    assert!(verdict.results.iter().all(|r| r.verdict == Verdict::Passed));
    assert_eq!(verdict.results[0].test_case, 1);
    assert_eq!(verdict.results[1].test_case, 2);
    assert!(verdict.xp_awarded);
    assert_eq!(verdict.xp_amount, 50);
    assert!(!verdict.contest_completion_awarded);

    let progress = fx.progression.progress("alice").await.unwrap();
    assert_eq!(progress.total_xp, 50);
    assert_eq!(progress.solved_questions, 1);
}

#[tokio::test]
async fn test_resubmission_earns_no_xp() {
    let fx = fixture(passing_engine(), default_catalog());

    let first = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();
    let second = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert!(first.xp_awarded);
    assert!(second.all_passed);
    assert!(!second.xp_awarded);
    assert_eq!(second.xp_amount, 0);
    assert_eq!(fx.progression.progress("alice").await.unwrap().total_xp, 50);
}

#[tokio::test]
async fn test_wrong_answer_fails_without_xp() {
    let engine = ScriptedEngine::new()
        .prints("sum_list([1, 2, 3])", "5")
        .prints("sum_list([10, -4])", "6");
    let fx = fixture(engine, default_catalog());

    let verdict = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert!(!verdict.all_passed);
    assert_eq!(verdict.results[0].verdict, Verdict::Failed);
    assert!(verdict.results[0].detail.contains("Expected: 6"));
    assert!(verdict.results[0].detail.contains("Got: 5"));
    assert_eq!(verdict.results[1].verdict, Verdict::Passed);
    assert!(!verdict.xp_awarded);
    assert_eq!(fx.progression.progress("alice").await.unwrap().total_xp, 0);
}

#[tokio::test]
async fn test_timeout_does_not_stop_later_tests() {
    let engine = ScriptedEngine::new()
        .respond(
            "sum_list([1, 2, 3])",
            TestExecutionOutput {
                timed_out: true,
                execution_time_ms: 5000,
                ..Default::default()
            },
        )
        .prints("sum_list([10, -4])", "6");
    let fx = fixture(engine, default_catalog());

    let verdict = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert_eq!(fx.engine.executions(), 2);
    assert_eq!(verdict.results[0].verdict, Verdict::Error);
    assert_eq!(verdict.results[0].fault, Some(ExecutionFault::Timeout));
    assert_eq!(verdict.results[1].verdict, Verdict::Passed);
    assert!(!verdict.all_passed);
}

#[tokio::test]
async fn test_stderr_is_a_crash_even_with_correct_stdout() {
    let engine = passing_engine().respond(
        "sum_list([10, -4])",
        TestExecutionOutput {
            stdout: "6\n".to_string(),
            stderr: "DeprecationWarning: something".to_string(),
            exit_code: Some(0),
            ..Default::default()
        },
    );
    // The first matching entry wins, so put the noisy one in front.
    let engine = ScriptedEngine {
        responses: engine.responses.into_iter().rev().collect(),
        executions: AtomicUsize::new(0),
    };
    let fx = fixture(engine, default_catalog());

    let verdict = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert_eq!(verdict.results[0].verdict, Verdict::Passed);
    assert_eq!(verdict.results[1].verdict, Verdict::Error);
    assert_eq!(verdict.results[1].fault, Some(ExecutionFault::Crash));
    assert!(!verdict.xp_awarded);
}

#[tokio::test]
async fn test_engine_failure_becomes_error_result() {
    let engine = ScriptedEngine::new().prints("sum_list([10, -4])", "6");
    let fx = fixture(engine, default_catalog());

    let verdict = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert_eq!(verdict.results.len(), 2);
    assert_eq!(verdict.results[0].verdict, Verdict::Error);
    assert_eq!(verdict.results[0].fault, Some(ExecutionFault::Internal));
    assert!(verdict.results[0].detail.contains("sandbox unavailable"));
    assert_eq!(verdict.results[1].verdict, Verdict::Passed);
}

#[tokio::test]
async fn test_compile_error_is_reported_per_test() {
    let engine = ScriptedEngine::new().respond(
        "sum_list(",
        TestExecutionOutput {
            stderr: "SyntaxError: invalid syntax".to_string(),
            exit_code: Some(1),
            compilation_failed: true,
            ..Default::default()
        },
    );
    let fx = fixture(engine, default_catalog());

    let verdict = fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    assert!(verdict
        .results
        .iter()
        .all(|r| r.fault == Some(ExecutionFault::CompileError)));
    assert!(verdict.results[0].detail.contains("SyntaxError"));
}

#[tokio::test]
async fn test_rejections_happen_before_execution() {
    let fx = fixture(passing_engine(), default_catalog());

    let err = fx.grader.grade(&request("sum", "   \n")).await.unwrap_err();
    assert!(matches!(err, GradeError::EmptySubmission));

    let cobol = GradeRequest {
        language: "cobol".to_string(),
        ..request("sum", SUM_SOURCE)
    };
    let err = fx.grader.grade(&cobol).await.unwrap_err();
    assert!(matches!(err, GradeError::UnsupportedLanguage(_)));

    let err = fx.grader.grade(&request("nope", SUM_SOURCE)).await.unwrap_err();
    assert!(matches!(err, GradeError::ProblemNotFound(_)));

    let err = fx.grader.grade(&request("empty", SUM_SOURCE)).await.unwrap_err();
    assert!(matches!(err, GradeError::NoTestCases(_)));

    let err = fx
        .grader
        .grade(&request("sum", "total = 0\nprint(total)\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, GradeError::NoEntryPointFound));

    // Test case 1 is fine; the malformed second one still rejects everything.
    let err = fx.grader.grade(&request("broken", SUM_SOURCE)).await.unwrap_err();
    assert!(matches!(err, GradeError::InvalidInputFormat { test_case: 2, .. }), "{}", err);
    assert!(!err.is_system_error());

    assert_eq!(fx.engine.executions(), 0);
}

#[tokio::test]
async fn test_oversized_source_is_rejected() {
    let fx = fixture(passing_engine(), default_catalog());
    let source = format!("{}# {}\n", SUM_SOURCE, "x".repeat(crate::executor::MAX_SOURCE_CODE_BYTES));

    let err = fx.grader.grade(&request("sum", &source)).await.unwrap_err();
    assert!(matches!(err, GradeError::SourceTooLarge { .. }));
}

#[tokio::test]
async fn test_contest_preconditions() {
    let catalog = default_catalog().with_problem(Problem {
        id: "outside".to_string(),
        ..max_problem()
    });
    let fx = fixture(passing_engine(), catalog);

    let not_joined = fx.grader.grade(&contest_request("sum", SUM_SOURCE)).await.unwrap_err();
    assert!(matches!(not_joined, GradeError::NotParticipating(_)));

    let missing = GradeRequest {
        contest: Some(ContestContext {
            contest_id: "monthly".to_string(),
        }),
        ..request("sum", SUM_SOURCE)
    };
    let err = fx.grader.grade(&missing).await.unwrap_err();
    assert!(matches!(err, GradeError::ContestNotFound(_)));

    let err = fx
        .grader
        .grade(&contest_request("outside", SUM_SOURCE))
        .await
        .unwrap_err();
    assert!(matches!(err, GradeError::ProblemNotInContest { .. }));

    assert_eq!(fx.engine.executions(), 0);
}

#[tokio::test]
async fn test_contest_solves_then_completes() {
    let fx = fixture(passing_engine(), default_catalog());
    fx.progression
        .award_contest_milestone("alice", "weekly", &ContestMilestone::Joined, CONTEST_JOIN_XP)
        .await
        .unwrap();

    let first = fx.grader.grade(&contest_request("sum", SUM_SOURCE)).await.unwrap();
    assert!(first.all_passed);
    assert!(first.xp_awarded);
    assert_eq!(first.xp_amount, 50);
    assert!(!first.contest_completion_awarded);

    let max_source = "def largest(nums):\n    return max(nums)\n";
    let second = fx.grader.grade(&contest_request("max", max_source)).await.unwrap();
    assert!(second.contest_completion_awarded);
    assert_eq!(second.xp_amount, 250);

    let again = fx.grader.grade(&contest_request("max", max_source)).await.unwrap();
    assert!(!again.xp_awarded);
    assert!(!again.contest_completion_awarded);

    let progress = fx.progression.progress("alice").await.unwrap();
    assert_eq!(progress.contests_xp, 10 + 50 + 50 + 200);
    assert_eq!(progress.contests_finished, 1);
    // Contest solves do not count toward standalone problem XP.
    assert_eq!(progress.problems_solved_xp, 0);
}

#[tokio::test]
async fn test_run_reports_engine_failure_as_output() {
    let fx = fixture(ScriptedEngine::new(), default_catalog());

    let output = fx
        .grader
        .run(&RunRequest {
            id: Uuid::new_v4(),
            language: "js".to_string(),
            source_code: "console.log(1)".to_string(),
            timeout_ms: None,
        })
        .await
        .unwrap();

    assert!(!output.success);
    assert!(output.output.contains("sandbox unavailable"));
}

#[tokio::test]
async fn test_scratch_directories_are_removed() {
    let fx = fixture(passing_engine(), default_catalog());
    fx.grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();

    let leftovers = std::fs::read_dir(fx.scratch_root.path())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

mod process {
    use super::*;

    fn python_grader(catalog: InMemoryCatalog, root: &std::path::Path) -> Option<Grader> {
        process_grader("python3", catalog, root)
    }

    fn process_grader(binary: &str, catalog: InMemoryCatalog, root: &std::path::Path) -> Option<Grader> {
        if which::which(binary).is_err() {
            eprintln!("{} not installed, skipping", binary);
            return None;
        }
        let languages = LanguageConfigManager::from_json(TEST_LANGUAGES_JSON).unwrap();
        let engine = Arc::new(ProcessEngine::new(&languages));
        Some(Grader::new(
            Arc::new(languages),
            engine,
            Arc::new(catalog),
            Arc::new(InMemoryProgression::new()),
            settings(root),
        ))
    }

    #[tokio::test]
    async fn test_python_sum_passes() {
        let root = tempfile::tempdir().unwrap();
        let Some(grader) = python_grader(default_catalog(), root.path()) else {
            return;
        };

        let verdict = grader.grade(&request("sum", SUM_SOURCE)).await.unwrap();
        assert!(verdict.all_passed, "{:?}", verdict.results);
        assert_eq!(verdict.xp_amount, 50);
    }

    #[tokio::test]
    async fn test_python_infinite_loop_times_out() {
        let root = tempfile::tempdir().unwrap();
        let Some(grader) = python_grader(default_catalog(), root.path()) else {
            return;
        };

        let source = "def sum_list(nums):\n    if nums[0] == 1:\n        while True:\n            pass\n    return sum(nums)\n";
        let verdict = grader
            .grade(&GradeRequest {
                timeout_ms: Some(500),
                ..request("sum", source)
            })
            .await
            .unwrap();

        assert_eq!(verdict.results[0].fault, Some(ExecutionFault::Timeout));
        assert_eq!(verdict.results[1].verdict, Verdict::Passed);
        assert!(!verdict.xp_awarded);
    }

    #[tokio::test]
    async fn test_python_exception_is_a_crash() {
        let root = tempfile::tempdir().unwrap();
        let Some(grader) = python_grader(default_catalog(), root.path()) else {
            return;
        };

        let source = "def sum_list(nums):\n    raise ValueError('boom')\n";
        let verdict = grader.grade(&request("sum", source)).await.unwrap();

        assert!(verdict
            .results
            .iter()
            .all(|r| r.fault == Some(ExecutionFault::Crash)));
        assert!(verdict.results[0].detail.contains("ValueError"));
    }

    #[tokio::test]
    async fn test_python_raw_run() {
        let root = tempfile::tempdir().unwrap();
        let Some(grader) = python_grader(default_catalog(), root.path()) else {
            return;
        };

        let output = grader
            .run(&RunRequest {
                id: Uuid::new_v4(),
                language: "python".to_string(),
                source_code: "print('hello')".to_string(),
                timeout_ms: None,
            })
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_python_float_input_stays_float() {
        let root = tempfile::tempdir().unwrap();
        let catalog = InMemoryCatalog::new().with_problem(Problem {
            id: "double".to_string(),
            title: "Double it".to_string(),
            expected_input: String::new(),
            expected_output: String::new(),
            test_cases: vec![
                TestCase {
                    input: "2.0".to_string(),
                    output: "4.0".to_string(),
                },
                TestCase {
                    input: "12345678901234567890".to_string(),
                    output: "24691357802469135780".to_string(),
                },
            ],
        });
        let Some(grader) = python_grader(catalog, root.path()) else {
            return;
        };

        let source = "def double(x):\n    return x * 2\n";
        let verdict = grader.grade(&request("double", source)).await.unwrap();
        assert!(verdict.all_passed, "{:?}", verdict.results);
    }

    #[tokio::test]
    async fn test_javascript_function_and_arrow_pass() {
        let root = tempfile::tempdir().unwrap();
        let Some(grader) = process_grader("node", default_catalog(), root.path()) else {
            return;
        };
        let js_request = |problem_id: &str, source: &str| GradeRequest {
            language: "javascript".to_string(),
            ..request(problem_id, source)
        };

        let source = "function sumList(nums) {\n  return nums.reduce((a, b) => a + b, 0);\n}\n";
        let verdict = grader.grade(&js_request("sum", source)).await.unwrap();
        assert!(verdict.all_passed, "{:?}", verdict.results);
        assert_eq!(verdict.xp_amount, 50);

        let source = "const largest = (nums) => Math.max(...nums);\n";
        let verdict = grader.grade(&js_request("max", source)).await.unwrap();
        assert!(verdict.all_passed, "{:?}", verdict.results);
    }

    #[tokio::test]
    async fn test_javascript_wrong_answer_fails() {
        let root = tempfile::tempdir().unwrap();
        let Some(grader) = process_grader("node", default_catalog(), root.path()) else {
            return;
        };

        let verdict = grader
            .grade(&GradeRequest {
                language: "javascript".to_string(),
                ..request("sum", "const sumList = (nums) => nums.length;\n")
            })
            .await
            .unwrap();
        assert!(!verdict.all_passed);
        assert_eq!(verdict.results[0].verdict, Verdict::Failed);
        assert!(!verdict.xp_awarded);
    }
}
