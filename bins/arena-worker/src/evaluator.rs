/// Judge - Language-Agnostic Verdict Logic
///
/// **Core Responsibility:**
/// Compare raw execution outputs against expected outputs and classify each
/// test case as Passed, Failed or Error.
///
/// **Critical Properties:**
/// - Knows nothing about Docker, processes or language runtimes
/// - Pure functions: (execution output, test case) → TestCaseResult
///
/// **Classification order:**
/// 1. Compile failure → Error (fault: compile_error)
/// 2. Timeout → Error (fault: timeout)
/// 3. Non-zero exit or anything on stderr → Error (fault: crash), whatever stdout holds
/// 4. Trimmed stdout == trimmed expected output → Passed
/// 5. Otherwise → Failed, detail carries expected and actual
///
/// **Normalization Rules:**
/// - Leading and trailing whitespace trimmed (this also absorbs `\r\n` vs `\n` at the end)
/// - Case sensitive, no numeric tolerance: exact string match

use arena_common::types::{ExecutionFault, RunOutput, TestCase, TestCaseResult, Verdict};

/// Raw execution output for a single program.
/// Produced by an ExecutionEngine, consumed by the Judge.
#[derive(Debug, Clone, Default)]
pub struct TestExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    /// Non-zero exit status or killed by a signal.
    pub runtime_error: bool,
    /// A compile step failed; `stderr` holds the compiler diagnostics.
    pub compilation_failed: bool,
}

fn normalize_output(output: &str) -> &str {
    output.trim()
}

fn crash_detail(output: &TestExecutionOutput) -> String {
    let stderr = normalize_output(&output.stderr);
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match output.exit_code {
        Some(code) => format!("Process exited with code {}", code),
        None => "Process terminated by a signal".to_string(),
    }
}

/// Judge one test case. `index` is the 1-based test case position.
pub fn evaluate_test(index: usize, output: &TestExecutionOutput, test_case: &TestCase) -> TestCaseResult {
    let (verdict, fault, detail) = if output.compilation_failed {
        (
            Verdict::Error,
            Some(ExecutionFault::CompileError),
            format!("Compilation error: {}", normalize_output(&output.stderr)),
        )
    } else if output.timed_out {
        (
            Verdict::Error,
            Some(ExecutionFault::Timeout),
            format!("Execution timed out after {} ms", output.execution_time_ms),
        )
    } else if output.runtime_error || !normalize_output(&output.stderr).is_empty() {
        (Verdict::Error, Some(ExecutionFault::Crash), crash_detail(output))
    } else {
        let actual = normalize_output(&output.stdout);
        let expected = normalize_output(&test_case.output);

        if actual == expected {
            (Verdict::Passed, None, String::new())
        } else {
            (
                Verdict::Failed,
                None,
                format!("Expected: {}, Got: {}", expected, actual),
            )
        }
    };

    TestCaseResult {
        test_case: index,
        verdict,
        detail,
        fault,
        execution_time_ms: output.execution_time_ms,
    }
}

/// Result for a test case whose execution could not be carried out at all
/// (scratch allocation, engine or daemon failure).
pub fn infrastructure_error(index: usize, message: impl Into<String>) -> TestCaseResult {
    TestCaseResult {
        test_case: index,
        verdict: Verdict::Error,
        detail: message.into(),
        fault: Some(ExecutionFault::Internal),
        execution_time_ms: 0,
    }
}

/// True iff there is at least one result and every result passed.
pub fn all_passed(results: &[TestCaseResult]) -> bool {
    !results.is_empty() && results.iter().all(|r| r.verdict == Verdict::Passed)
}

/// (passed, failed, errored) counts, for logging.
pub fn tally(results: &[TestCaseResult]) -> (usize, usize, usize) {
    results.iter().fold((0, 0, 0), |(p, f, e), r| match r.verdict {
        Verdict::Passed => (p + 1, f, e),
        Verdict::Failed => (p, f + 1, e),
        Verdict::Error => (p, f, e + 1),
    })
}

/// Shape an ungraded execution for the caller.
pub fn to_run_output(output: TestExecutionOutput) -> RunOutput {
    let success = !output.compilation_failed
        && !output.timed_out
        && !output.runtime_error
        && normalize_output(&output.stderr).is_empty();
    let text = if success {
        output.stdout.clone()
    } else if output.timed_out {
        format!("Execution timed out after {} ms", output.execution_time_ms)
    } else if output.compilation_failed {
        format!("Compilation error: {}", normalize_output(&output.stderr))
    } else {
        crash_detail(&output)
    };

    RunOutput {
        output: text,
        stdout: output.stdout,
        stderr: output.stderr,
        success,
        timed_out: output.timed_out,
        execution_time_ms: output.execution_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_case(expected: &str) -> TestCase {
        TestCase {
            input: "[1,2,3]".to_string(),
            output: expected.to_string(),
        }
    }

    fn make_output(stdout: &str, time_ms: u64) -> TestExecutionOutput {
        TestExecutionOutput {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            execution_time_ms: time_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_match_passes() {
        let result = evaluate_test(1, &make_output("6\n", 12), &make_test_case("6"));

        assert_eq!(result.verdict, Verdict::Passed);
        assert_eq!(result.test_case, 1);
        assert_eq!(result.execution_time_ms, 12);
        assert!(result.fault.is_none());
    }

    #[test]
    fn test_mismatch_carries_expected_and_actual() {
        let result = evaluate_test(2, &make_output("7", 5), &make_test_case("6"));

        assert_eq!(result.verdict, Verdict::Failed);
        assert_eq!(result.detail, "Expected: 6, Got: 7");
    }

    #[test]
    fn test_whitespace_trimming() {
        let result = evaluate_test(1, &make_output("  hello  \r\n", 5), &make_test_case("hello"));
        assert_eq!(result.verdict, Verdict::Passed);
    }

    #[test]
    fn test_internal_whitespace_preserved() {
        let result = evaluate_test(1, &make_output("line1\nline2\n", 5), &make_test_case("line1\nline2"));
        assert_eq!(result.verdict, Verdict::Passed);

        let result = evaluate_test(1, &make_output("1  2", 5), &make_test_case("1 2"));
        assert_eq!(result.verdict, Verdict::Failed);
    }

    #[test]
    fn test_case_sensitivity() {
        let result = evaluate_test(1, &make_output("hello", 5), &make_test_case("Hello"));
        assert_eq!(result.verdict, Verdict::Failed);
    }

    #[test]
    fn test_numeric_formatting_is_not_normalized() {
        let result = evaluate_test(1, &make_output("6.0", 5), &make_test_case("6"));
        assert_eq!(result.verdict, Verdict::Failed);
    }

    #[test]
    fn test_stderr_is_error_even_with_correct_stdout() {
        let output = TestExecutionOutput {
            stderr: "DeprecationWarning: something".to_string(),
            ..make_output("6", 5)
        };
        let result = evaluate_test(1, &output, &make_test_case("6"));

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.fault, Some(ExecutionFault::Crash));
        assert!(result.detail.contains("DeprecationWarning"));
    }

    #[test]
    fn test_runtime_error() {
        let output = TestExecutionOutput {
            stderr: "ZeroDivisionError: division by zero\n".to_string(),
            exit_code: Some(1),
            runtime_error: true,
            execution_time_ms: 5,
            ..Default::default()
        };
        let result = evaluate_test(1, &output, &make_test_case("6"));

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.detail, "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_silent_nonzero_exit() {
        let output = TestExecutionOutput {
            exit_code: Some(3),
            runtime_error: true,
            ..Default::default()
        };
        let result = evaluate_test(1, &output, &make_test_case(""));
        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.detail, "Process exited with code 3");
    }

    #[test]
    fn test_timeout() {
        let output = TestExecutionOutput {
            stdout: "6".to_string(),
            execution_time_ms: 1001,
            timed_out: true,
            ..Default::default()
        };
        let result = evaluate_test(3, &output, &make_test_case("6"));

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.fault, Some(ExecutionFault::Timeout));
        assert!(result.detail.contains("timed out"));
    }

    #[test]
    fn test_compile_error_is_error_verdict() {
        let output = TestExecutionOutput {
            stderr: "Program.cs(3,5): error CS1002: ; expected".to_string(),
            compilation_failed: true,
            ..Default::default()
        };
        let result = evaluate_test(1, &output, &make_test_case("6"));

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.fault, Some(ExecutionFault::CompileError));
        assert!(result.detail.contains("CS1002"));
    }

    #[test]
    fn test_empty_output() {
        let result = evaluate_test(1, &make_output("   \n", 5), &make_test_case(""));
        assert_eq!(result.verdict, Verdict::Passed);
    }

    #[test]
    fn test_aggregation() {
        let pass = evaluate_test(1, &make_output("6", 1), &make_test_case("6"));
        let fail = evaluate_test(2, &make_output("5", 1), &make_test_case("6"));
        let error = infrastructure_error(3, "engine unavailable");

        assert!(all_passed(&[pass.clone(), pass.clone()]));
        assert!(!all_passed(&[pass.clone(), fail.clone()]));
        assert!(!all_passed(&[pass.clone(), error.clone()]));
        assert!(!all_passed(&[]));
        assert_eq!(tally(&[pass, fail, error.clone()]), (1, 1, 1));
        assert_eq!(error.fault, Some(ExecutionFault::Internal));
    }

    #[test]
    fn test_run_output_shapes() {
        let ok = to_run_output(make_output("hello\n", 3));
        assert!(ok.success);
        assert_eq!(ok.output, "hello\n");

        let crashed = to_run_output(TestExecutionOutput {
            stderr: "boom".to_string(),
            exit_code: Some(1),
            runtime_error: true,
            ..Default::default()
        });
        assert!(!crashed.success);
        assert_eq!(crashed.output, "boom");

        let slow = to_run_output(TestExecutionOutput {
            timed_out: true,
            execution_time_ms: 500,
            ..Default::default()
        });
        assert!(slow.timed_out);
        assert!(!slow.success);
    }
}
