/// Harness Generator
///
/// Produces the complete program for one (submission, test case) pair and
/// the toolchain invocation that runs it. The program text comes from the
/// language's `LanguageSupport`; the invocation comes from languages.json.
///
/// Commands are argument vectors. File names are relative to the scratch
/// directory, which is the working directory of every step.

use crate::config::{CommandSpec, LanguageConfig};
use crate::language::LanguageSupport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Run,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub phase: Phase,
    pub program: String,
    pub args: Vec<String>,
}

impl Step {
    /// Human readable form for logs. Never passed to a shell.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Container image for engines that run inside Docker.
    pub image: String,
    /// File the program text is written to inside the scratch directory.
    pub source_file: String,
    pub program: String,
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    pub fn has_compile_step(&self) -> bool {
        self.steps.iter().any(|s| s.phase == Phase::Compile)
    }
}

fn expand(spec: &CommandSpec, phase: Phase, config: &LanguageConfig) -> Step {
    let binary = config.binary_file.as_deref().unwrap_or("");
    Step {
        phase,
        program: spec.command.clone(),
        args: spec
            .args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &config.source_file)
                    .replace("{binary}", binary)
            })
            .collect(),
    }
}

/// Build the compile (if any) and run steps for `program` from the language's configuration.
pub fn plan_from_config(config: &LanguageConfig, program: String) -> ExecutionPlan {
    let mut steps = Vec::with_capacity(2);
    if let Some(compile) = &config.compile {
        steps.push(expand(compile, Phase::Compile, config));
    }
    steps.push(expand(&config.run, Phase::Run, config));

    ExecutionPlan {
        image: config.image.clone(),
        source_file: config.source_file.clone(),
        program,
        steps,
    }
}

/// Plan for one test case: user code plus the generated invocation.
pub fn generate(
    support: &dyn LanguageSupport,
    config: &LanguageConfig,
    source: &str,
    entry_point: &str,
    args: &[String],
) -> ExecutionPlan {
    let program = support.generate_harness(source, entry_point, args);
    support.build_run_command(config, program)
}

/// Plan that runs the submitted source untouched.
pub fn raw(support: &dyn LanguageSupport, config: &LanguageConfig, source: &str) -> ExecutionPlan {
    support.build_run_command(config, source.to_string())
}
