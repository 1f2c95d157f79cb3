/// Grader - High-Level Orchestration
///
/// **Responsibility:**
/// Drive one submission from source text to a SubmissionVerdict:
///
/// 1. Validate language, source and problem (submission-level errors abort here)
/// 2. Check contest preconditions when the submission belongs to a contest
/// 3. Find the entry point and marshal every test input before running anything
/// 4. For each test case, in order: generate the harness, run it in a fresh
///    scratch directory, judge the output
/// 5. Aggregate, then apply XP awards under the submitter's lock
///
/// Per-test faults become Error results and never stop later test cases.
/// This module is the glue layer: it knows nothing about how code runs
/// (engine) or how outputs are compared (evaluator).

use crate::catalog::ProblemCatalog;
use crate::config::{LanguageConfig, LanguageConfigManager, Settings};
use crate::engine::{ExecutionEngine, ResourceLimits};
use crate::error::GradeError;
use crate::evaluator::{self, TestExecutionOutput};
use crate::harness::{self, ExecutionPlan};
use crate::language::{self, LanguageSupport};
use crate::marshal;
use crate::progression::{ProgressionUpdater, UserLocks};
use crate::scratch::ScratchArena;
use anyhow::Context;
use arena_common::types::{
    Contest, ContestMilestone, GradeRequest, Language, RunOutput, RunRequest, SubmissionVerdict,
    Verdict, PROBLEM_SOLVED_XP,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

pub struct Grader {
    languages: Arc<LanguageConfigManager>,
    engine: Arc<dyn ExecutionEngine>,
    catalog: Arc<dyn ProblemCatalog>,
    progression: Arc<dyn ProgressionUpdater>,
    scratch: ScratchArena,
    settings: Settings,
    user_locks: UserLocks,
}

impl Grader {
    pub fn new(
        languages: Arc<LanguageConfigManager>,
        engine: Arc<dyn ExecutionEngine>,
        catalog: Arc<dyn ProblemCatalog>,
        progression: Arc<dyn ProgressionUpdater>,
        settings: Settings,
    ) -> Self {
        Self {
            languages,
            engine,
            catalog,
            progression,
            scratch: ScratchArena::new(settings.scratch_root.clone()),
            settings,
            user_locks: UserLocks::new(),
        }
    }

    fn validate_source(source: &str) -> Result<(), GradeError> {
        if source.trim().is_empty() {
            return Err(GradeError::EmptySubmission);
        }
        if source.len() > MAX_SOURCE_CODE_BYTES {
            return Err(GradeError::SourceTooLarge {
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }
        Ok(())
    }

    /// Resolve the language and confirm its toolchain can run.
    async fn prepare_toolchain(
        &self,
        name: &str,
    ) -> Result<(&'static dyn LanguageSupport, &LanguageConfig), GradeError> {
        let language =
            Language::from_str(name).ok_or_else(|| GradeError::UnsupportedLanguage(name.to_string()))?;
        let config = self.languages.get_config(&language)?;
        self.engine.ensure_toolchain(config).await?;
        Ok((language::support_for(language), config))
    }

    async fn check_contest(&self, request: &GradeRequest, contest_id: &str) -> Result<Contest, GradeError> {
        let contest = self
            .catalog
            .get_contest(contest_id)
            .await
            .map_err(GradeError::Storage)?
            .ok_or_else(|| GradeError::ContestNotFound(contest_id.to_string()))?;

        if !contest.problem_ids.iter().any(|id| id == &request.problem_id) {
            return Err(GradeError::ProblemNotInContest {
                problem_id: request.problem_id.clone(),
                contest_id: contest_id.to_string(),
            });
        }

        let joined = self
            .progression
            .is_participating(&request.submitter_id, contest_id)
            .await
            .map_err(GradeError::Storage)?;
        if !joined {
            return Err(GradeError::NotParticipating(contest_id.to_string()));
        }

        Ok(contest)
    }

    /// Materialize and run one plan in its own scratch directory.
    /// The directory is gone when this returns, or when the future is dropped.
    async fn execute_plan(
        &self,
        job_id: &Uuid,
        label: &str,
        plan: &ExecutionPlan,
        limits: &ResourceLimits,
    ) -> anyhow::Result<TestExecutionOutput> {
        let scratch = self
            .scratch
            .acquire(job_id, label)
            .context("Failed to create scratch directory")?;
        scratch
            .materialize(plan)
            .await
            .context("Failed to write program to scratch directory")?;

        let output = self.engine.execute(plan, &scratch, limits).await;
        scratch.release();
        output
    }

    #[instrument(
        skip(self, request),
        fields(
            job_id = %request.id,
            language = %request.language,
            problem_id = %request.problem_id,
            submitter_id = %request.submitter_id,
        )
    )]
    pub async fn grade(&self, request: &GradeRequest) -> Result<SubmissionVerdict, GradeError> {
        Self::validate_source(&request.source_code)?;

        let problem = self
            .catalog
            .get_problem(&request.problem_id)
            .await
            .map_err(GradeError::Storage)?
            .ok_or_else(|| GradeError::ProblemNotFound(request.problem_id.clone()))?;
        if problem.test_cases.is_empty() {
            return Err(GradeError::NoTestCases(problem.id));
        }

        let contest = match &request.contest {
            Some(ctx) => Some(self.check_contest(request, &ctx.contest_id).await?),
            None => None,
        };

        let (support, config) = self.prepare_toolchain(&request.language).await?;
        let entry_point = support.normalize_entry_point(&request.source_code)?;
        debug!(entry_point = %entry_point, "Resolved entry point");

        // Bad test data rejects the whole submission before anything runs.
        let arguments = problem
            .test_cases
            .iter()
            .enumerate()
            .map(|(i, test_case)| {
                marshal::marshal_arguments(&test_case.input, support).map_err(|e| {
                    GradeError::InvalidInputFormat {
                        test_case: i + 1,
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let timeout_ms = self.settings.effective_timeout_ms(request.timeout_ms);
        let limits = ResourceLimits::for_language(config, &self.settings, timeout_ms);

        info!(
            test_count = problem.test_cases.len(),
            timeout_ms = timeout_ms,
            engine = self.engine.name(),
            "Grading submission"
        );

        let mut results = Vec::with_capacity(problem.test_cases.len());
        for (i, (test_case, args)) in problem.test_cases.iter().zip(&arguments).enumerate() {
            let index = i + 1;
            let plan = harness::generate(support, config, &request.source_code, &entry_point, args);

            let result = match self
                .execute_plan(&request.id, &format!("case{}", index), &plan, &limits)
                .await
            {
                Ok(output) => evaluator::evaluate_test(index, &output, test_case),
                Err(e) => {
                    error!(test_case = index, error = %format!("{:#}", e), "Execution infrastructure failure");
                    evaluator::infrastructure_error(index, format!("Execution failed: {:#}", e))
                }
            };

            if result.verdict == Verdict::Error {
                warn!(
                    test_case = index,
                    fault = ?result.fault,
                    execution_ms = result.execution_time_ms,
                    "Test case errored"
                );
            } else {
                debug!(
                    test_case = index,
                    verdict = ?result.verdict,
                    execution_ms = result.execution_time_ms,
                    "Test case judged"
                );
            }
            results.push(result);
        }

        let all_passed = evaluator::all_passed(&results);
        let (passed, failed, errored) = evaluator::tally(&results);

        let mut verdict = SubmissionVerdict {
            submission_id: request.id,
            all_passed,
            results,
            xp_awarded: false,
            xp_amount: 0,
            contest_completion_awarded: false,
        };

        if all_passed {
            self.award(request, contest.as_ref(), &mut verdict).await?;
        }

        info!(
            passed = passed,
            failed = failed,
            errored = errored,
            all_passed = verdict.all_passed,
            xp_amount = verdict.xp_amount,
            "Grading complete"
        );
        Ok(verdict)
    }

    async fn award(
        &self,
        request: &GradeRequest,
        contest: Option<&Contest>,
        verdict: &mut SubmissionVerdict,
    ) -> Result<(), GradeError> {
        let user_id = request.submitter_id.as_str();
        let _guard = self.user_locks.lock(user_id).await;

        let Some(contest) = contest else {
            let credited = self
                .progression
                .award_problem_solved(user_id, &request.problem_id, PROBLEM_SOLVED_XP)
                .await
                .map_err(GradeError::Storage)?;
            if credited {
                verdict.xp_awarded = true;
                verdict.xp_amount += PROBLEM_SOLVED_XP;
            } else {
                info!("Problem already solved, no XP awarded");
            }
            return Ok(());
        };

        let solved = ContestMilestone::Solved {
            problem_id: request.problem_id.clone(),
        };
        let credited = self
            .progression
            .award_contest_milestone(user_id, &contest.id, &solved, solved.xp())
            .await
            .map_err(GradeError::Storage)?;
        if credited {
            verdict.xp_awarded = true;
            verdict.xp_amount += solved.xp();
        }

        let solved_ids: HashSet<String> = self
            .progression
            .contest_solved_problems(user_id, &contest.id)
            .await
            .map_err(GradeError::Storage)?
            .into_iter()
            .collect();

        if contest.problem_ids.iter().all(|id| solved_ids.contains(id)) {
            let milestone = ContestMilestone::Completed;
            let completed = self
                .progression
                .award_contest_milestone(user_id, &contest.id, &milestone, milestone.xp())
                .await
                .map_err(GradeError::Storage)?;
            if completed {
                info!(contest_id = %contest.id, "Contest completed");
                verdict.xp_awarded = true;
                verdict.xp_amount += milestone.xp();
                verdict.contest_completion_awarded = true;
            }
        }

        Ok(())
    }

    /// Execute raw source without a harness or test cases.
    #[instrument(skip(self, request), fields(job_id = %request.id, language = %request.language))]
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutput, GradeError> {
        Self::validate_source(&request.source_code)?;
        let (support, config) = self.prepare_toolchain(&request.language).await?;

        let timeout_ms = self.settings.effective_timeout_ms(request.timeout_ms);
        let limits = ResourceLimits::for_language(config, &self.settings, timeout_ms);
        let plan = harness::raw(support, config, &request.source_code);

        let output = match self.execute_plan(&request.id, "run", &plan, &limits).await {
            Ok(output) => evaluator::to_run_output(output),
            Err(e) => {
                error!(error = %format!("{:#}", e), "Execution infrastructure failure");
                let message = format!("Execution failed: {:#}", e);
                RunOutput {
                    output: message.clone(),
                    stdout: String::new(),
                    stderr: message,
                    success: false,
                    timed_out: false,
                    execution_time_ms: 0,
                }
            }
        };

        info!(
            success = output.success,
            timed_out = output.timed_out,
            execution_ms = output.execution_time_ms,
            "Run complete"
        );
        Ok(output)
    }
}
