/// Docker-based execution engine
///
/// **Container rules, one container per step:**
/// 1. Pulls the language image if it is not cached
/// 2. Bind-mounts the scratch directory at /sandbox, the only writable path
///    besides a small /tmp tmpfs; the root filesystem is read-only
/// 3. Network disabled, memory (+swap), CPU and pids limits enforced,
///    all capabilities dropped, no-new-privileges, unprivileged user
/// 4. Streams stdout/stderr up to the output limit
/// 5. Kills the container on timeout
/// 6. Removes the container on every exit path via a Drop guard

use crate::config::{LanguageConfig, LanguageConfigManager};
use crate::engine::{CappedOutput, ExecutionEngine, ResourceLimits, StepOutput};
use crate::error::GradeError;
use crate::harness::{ExecutionPlan, Step};
use crate::scratch::ScratchDir;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::time::Instant;
use tracing::{debug, info, warn};

const SANDBOX_DIR: &str = "/sandbox";
const SANDBOX_USER: &str = "65534:65534";
const TMPFS_OPTIONS: &str = "rw,noexec,nosuid,size=64m";

/// Container cleanup guard - guarantees container removal on drop,
/// including when the grading future is cancelled mid-step.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Drop cannot be async
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

pub struct DockerEngine {
    docker: Docker,
    allowed_binaries: HashSet<String>,
}

impl DockerEngine {
    pub fn new(languages: &LanguageConfigManager) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(DockerEngine {
            docker,
            allowed_binaries: languages.allowed_binaries().clone(),
        })
    }

    /// Pull the image when it is not cached locally.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    fn container_config(
        &self,
        plan: &ExecutionPlan,
        step: &Step,
        scratch: &ScratchDir,
        limits: &ResourceLimits,
    ) -> Config<String> {
        let cmd: Vec<String> = std::iter::once(step.program.clone())
            .chain(step.args.iter().cloned())
            .collect();

        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), TMPFS_OPTIONS.to_string());

        Config {
            image: Some(plan.image.clone()),
            cmd: Some(cmd),
            entrypoint: Some(vec![]),
            env: Some(vec!["HOME=/tmp".to_string(), "TMPDIR=/tmp".to_string()]),
            user: Some(SANDBOX_USER.to_string()),
            working_dir: Some(SANDBOX_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}:rw", scratch.path().display(), SANDBOX_DIR)]),
                tmpfs: Some(tmpfs),
                memory: Some(limits.memory_limit_bytes()),
                memory_swap: Some(limits.memory_limit_bytes()),
                nano_cpus: Some((f64::from(limits.cpu_limit) * 1_000_000_000.0) as i64),
                pids_limit: Some(limits.pids_limit),
                readonly_rootfs: Some(true),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_toolchain(&self, config: &LanguageConfig) -> Result<(), GradeError> {
        self.ensure_image(&config.image)
            .await
            .map_err(|e| GradeError::ToolchainUnavailable {
                language: config.name.clone(),
                reason: format!("image '{}' unavailable: {:#}", config.image, e),
            })
    }

    async fn run_step(
        &self,
        plan: &ExecutionPlan,
        step: &Step,
        scratch: &ScratchDir,
        limits: &ResourceLimits,
    ) -> Result<StepOutput> {
        if !self.allowed_binaries.contains(&step.program) {
            bail!("'{}' is not an allowed toolchain binary", step.program);
        }

        // The container user must be able to write build artifacts.
        std::fs::set_permissions(scratch.path(), std::fs::Permissions::from_mode(0o777))
            .context("Failed to open scratch directory to the sandbox user")?;

        let config = self.container_config(plan, step, scratch, limits);
        let container_name = format!("arena-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container_id.clone(),
        };

        let started = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let timeout = limits.timeout_for(step.phase);
        let limit = limits.output_limit_bytes;

        let execution = async {
            let mut stdout = CappedOutput::new(limit);
            let mut stderr = CappedOutput::new(limit);

            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(container_id = %container_id, error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait = self.docker.wait_container(&container_id, Some(wait_options));
            let exit_code = match wait.next().await {
                Some(Ok(response)) => Some(response.status_code),
                // bollard reports a non-zero exit as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => {
                    warn!(container_id = %container_id, error = %e, "Failed to get container exit code");
                    None
                }
                None => None,
            };

            (stdout.into_string(), stderr.into_string(), exit_code)
        };

        match tokio::time::timeout(timeout, execution).await {
            Ok((stdout, mut stderr, exit_code)) => {
                match exit_code {
                    Some(137) => stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]"),
                    Some(139) => stderr.push_str("\n[Container killed: segmentation fault]"),
                    _ => {}
                }
                debug!(container_id = %container_id, exit_code = ?exit_code, "Container finished");

                Ok(StepOutput {
                    stdout,
                    stderr,
                    exit_code,
                    timed_out: false,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(_) => {
                warn!(
                    container_id = %container_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Container timed out, killing"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }

                Ok(StepOutput {
                    timed_out: true,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                })
            }
        }
    }
}
