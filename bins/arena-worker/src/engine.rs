/// Execution Engine - Abstraction for Sandboxed Code Execution
///
/// **Core Responsibility:**
/// Run a generated program (compile step, then run step) inside a scratch
/// directory and capture raw stdout/stderr/exit status.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (local process group, Docker container)
/// - Engine does NOT know expected outputs or verdict rules
/// - Engine returns raw outputs for the Judge
///
/// Every engine enforces a wall-clock timeout per step, and the child is
/// killed when the timeout fires or the calling future is dropped.

use crate::config::{LanguageConfig, LanguageConfigManager, Settings};
use crate::error::GradeError;
use crate::evaluator::TestExecutionOutput;
use crate::harness::{ExecutionPlan, Phase, Step};
use crate::scratch::ScratchDir;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Largest file a sandboxed process may write.
const FILE_SIZE_LIMIT_BYTES: u64 = 64 * 1024 * 1024;
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub timeout: Duration,
    pub compile_timeout: Duration,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub output_limit_bytes: usize,
    pub limit_address_space: bool,
}

impl ResourceLimits {
    pub fn for_language(config: &LanguageConfig, settings: &Settings, timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            compile_timeout: Duration::from_millis(settings.compile_timeout_ms),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit: config.cpu_limit,
            pids_limit: config.pids_limit,
            output_limit_bytes: settings.output_limit_bytes,
            limit_address_space: config.limit_address_space,
        }
    }

    pub fn timeout_for(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Compile => self.compile_timeout,
            Phase::Run => self.timeout,
        }
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        i64::from(self.memory_limit_mb) * 1024 * 1024
    }
}

/// Raw result of one step.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl StepOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Byte buffer that keeps at most `limit` bytes and remembers whether more arrived.
#[derive(Debug)]
pub struct CappedOutput {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedOutput {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Drain a pipe to EOF, keeping only the first `limit` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> std::io::Result<String> {
    let mut output = CappedOutput::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        output.push(&chunk[..n]);
    }
    Ok(output.into_string())
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Confirm every program the language needs can be launched.
    async fn ensure_toolchain(&self, config: &LanguageConfig) -> Result<(), GradeError>;

    /// Run a single step with the scratch directory as its working directory.
    async fn run_step(
        &self,
        plan: &ExecutionPlan,
        step: &Step,
        scratch: &ScratchDir,
        limits: &ResourceLimits,
    ) -> Result<StepOutput>;

    /// Run every step of the plan. A failed compile step ends the plan and
    /// reports the compiler output; otherwise the run step's output is returned.
    /// The program text must already be materialized in `scratch`.
    async fn execute(
        &self,
        plan: &ExecutionPlan,
        scratch: &ScratchDir,
        limits: &ResourceLimits,
    ) -> Result<TestExecutionOutput> {
        let mut last = StepOutput::default();

        for step in &plan.steps {
            debug!(engine = self.name(), command = %step.display(), "Running step");
            let output = self.run_step(plan, step, scratch, limits).await?;

            if step.phase == Phase::Compile && !output.succeeded() {
                let mut diagnostics = output.stderr.trim().to_string();
                // mcs reports errors on stdout
                let stdout = output.stdout.trim();
                if !stdout.is_empty() {
                    if !diagnostics.is_empty() {
                        diagnostics.push('\n');
                    }
                    diagnostics.push_str(stdout);
                }
                if output.timed_out {
                    diagnostics.push_str("\n[Compiler timed out]");
                }
                return Ok(TestExecutionOutput {
                    stderr: diagnostics,
                    exit_code: output.exit_code,
                    execution_time_ms: output.elapsed_ms,
                    compilation_failed: true,
                    ..Default::default()
                });
            }
            last = output;
        }

        let runtime_error = !last.timed_out && last.exit_code != Some(0);
        Ok(TestExecutionOutput {
            stdout: last.stdout,
            stderr: last.stderr,
            exit_code: last.exit_code,
            execution_time_ms: last.elapsed_ms,
            timed_out: last.timed_out,
            runtime_error,
            compilation_failed: false,
        })
    }
}

/// Kills the whole process group on drop, so grandchildren die with the child.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            // ESRCH when the group already exited is fine.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rlimits {
    cpu_seconds: u64,
    address_space_bytes: Option<u64>,
    data_bytes: Option<u64>,
    max_processes: Option<u64>,
}

impl Rlimits {
    /// `owned_tasks` is the number of tasks the worker's user already runs.
    /// RLIMIT_NPROC is charged per user, so the process ceiling sits on top of it.
    fn new(limits: &ResourceLimits, timeout: Duration, owned_tasks: Option<u64>) -> Self {
        let memory = limits.memory_limit_bytes() as u64;
        let pids = u64::try_from(limits.pids_limit).ok().filter(|&n| n > 0);

        Self {
            cpu_seconds: (timeout.as_millis() as u64).saturating_add(999) / 1000 + 1,
            address_space_bytes: limits.limit_address_space.then_some(memory),
            data_bytes: (!limits.limit_address_space).then_some(memory),
            max_processes: pids.zip(owned_tasks).map(|(pids, owned)| owned + pids),
        }
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn apply_rlimits(limits: &Rlimits) -> std::io::Result<()> {
    set_rlimit(libc::RLIMIT_CPU, limits.cpu_seconds)?;
    set_rlimit(libc::RLIMIT_FSIZE, FILE_SIZE_LIMIT_BYTES)?;
    set_rlimit(libc::RLIMIT_CORE, 0)?;

    if let Some(bytes) = limits.address_space_bytes {
        set_rlimit(libc::RLIMIT_AS, bytes)?;
    }
    if let Some(bytes) = limits.data_bytes {
        set_rlimit(libc::RLIMIT_DATA, bytes)?;
    }
    if let Some(count) = limits.max_processes {
        set_rlimit(libc::RLIMIT_NPROC, count)?;
    }
    Ok(())
}

/// Tasks (threads included) whose real uid is `uid`, read from /proc.
fn tasks_owned_by(uid: u32) -> Option<u64> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let count: u64 = entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("status")).ok())
        .filter_map(|status| {
            let mut owner = None;
            let mut threads = None;
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("Uid:") {
                    owner = rest.split_whitespace().next().and_then(|v| v.parse::<u32>().ok());
                } else if let Some(rest) = line.strip_prefix("Threads:") {
                    threads = rest.trim().parse::<u64>().ok();
                }
            }
            (owner? == uid).then_some(threads?)
        })
        .sum();
    Some(count)
}

/// Baseline for the per-user process ceiling. None for root, which the
/// kernel exempts from RLIMIT_NPROC.
async fn owned_task_baseline() -> Option<u64> {
    let uid = unsafe { libc::getuid() };
    if uid == 0 {
        return None;
    }
    tokio::task::spawn_blocking(move || tasks_owned_by(uid))
        .await
        .ok()
        .flatten()
}

fn exit_code_of(status: ExitStatus) -> Option<i64> {
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|signal| 128 + i64::from(signal)))
}

/// Runs toolchains as local child processes.
///
/// Isolation is best-effort: argv spawning with an allow-list, a cleared
/// environment, the scratch directory as cwd and HOME, a private process
/// group and rlimits. Use the Docker engine where network and filesystem
/// isolation are required.
pub struct ProcessEngine {
    allowed_binaries: HashSet<String>,
    search_path: OsString,
}

impl ProcessEngine {
    pub fn new(languages: &LanguageConfigManager) -> Self {
        Self {
            allowed_binaries: languages.allowed_binaries().clone(),
            search_path: std::env::var_os("PATH").unwrap_or_else(|| OsString::from(FALLBACK_PATH)),
        }
    }

    fn resolve(&self, program: &str) -> Result<std::path::PathBuf> {
        if !self.allowed_binaries.contains(program) {
            bail!("'{}' is not an allowed toolchain binary", program);
        }
        which::which_in(program, Some(&self.search_path), "/")
            .with_context(|| format!("'{}' not found on PATH", program))
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn ensure_toolchain(&self, config: &LanguageConfig) -> Result<(), GradeError> {
        let programs = config.compile.iter().chain(std::iter::once(&config.run));
        for spec in programs {
            self.resolve(&spec.command)
                .map_err(|e| GradeError::ToolchainUnavailable {
                    language: config.name.clone(),
                    reason: format!("{:#}", e),
                })?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        _plan: &ExecutionPlan,
        step: &Step,
        scratch: &ScratchDir,
        limits: &ResourceLimits,
    ) -> Result<StepOutput> {
        let program = self.resolve(&step.program)?;
        let timeout = limits.timeout_for(step.phase);

        let rlimits = Rlimits::new(limits, timeout, owned_task_baseline().await);

        let mut cmd = Command::new(&program);
        cmd.args(&step.args)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", &self.search_path)
            .env("HOME", scratch.path())
            .env("TMPDIR", scratch.path())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        unsafe {
            cmd.pre_exec(move || apply_rlimits(&rlimits));
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", step.program))?;
        let _group = ProcessGroupGuard {
            pgid: child.id().map(|pid| pid as i32),
        };

        let stdout = child.stdout.take().context("child stdout was not captured")?;
        let stderr = child.stderr.take().context("child stderr was not captured")?;
        let limit = limits.output_limit_bytes;

        let collect = async {
            tokio::try_join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                child.wait()
            )
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok((stdout, mut stderr, status))) => {
                if let Some(signal) = status.signal() {
                    if signal == libc::SIGXCPU {
                        stderr.push_str("\n[CPU time limit exceeded]");
                    } else {
                        stderr.push_str(&format!("\n[Killed by signal {}]", signal));
                    }
                }
                Ok(StepOutput {
                    stdout,
                    stderr,
                    exit_code: exit_code_of(status),
                    timed_out: false,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(e).context("Failed to collect child output"),
            Err(_) => {
                warn!(
                    command = %step.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Step timed out, killing process group"
                );
                Ok(StepOutput {
                    timed_out: true,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                })
            }
        }
    }
}
