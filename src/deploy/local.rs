use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{plan, DeploymentContext, ExecutionStrategy, SetupAction};
use crate::compose::shell_escape;
use crate::docker::{ImageRef, ImageStore};

/// Runs the pipeline on this machine: the working directory is relative to
/// `root`, and the job is a plain `docker run`.
pub struct LocalStrategy {
    root: PathBuf,
    /// Shell words that launch docker in the job command
    docker: String,
}

impl LocalStrategy {
    /// Local strategy rooted at the current directory. Requires `docker`
    /// on `PATH`.
    pub fn new() -> Result<Self> {
        let docker = which::which("docker")
            .context("docker executable not found in PATH; required for --local")?;
        tracing::debug!("Using {}", docker.display());

        let root = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::with_root(root).with_docker(shell_escape(&docker.to_string_lossy())))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            docker: "docker".to_string(),
        }
    }

    pub fn with_docker(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    /// The composed `docker run ...` line, launched through our docker.
    fn job_command(&self, ctx: &DeploymentContext) -> Result<String> {
        let cmd = plan::local_command(ctx, &self.root)?;
        Ok(match cmd.strip_prefix("docker ") {
            Some(rest) => format!("{} {}", self.docker, rest),
            None => cmd,
        })
    }

    fn workdir(&self, ctx: &DeploymentContext) -> PathBuf {
        self.root.join(&ctx.workdir)
    }

    /// Run `cmd` through `sh -c` inside `dir`, stdout and stderr both going
    /// to `dir/stdout.txt`. Returns the exit code when `attach` is set,
    /// otherwise leaves the child running.
    pub fn execute(&self, dir: &Path, cmd: &str, attach: bool) -> Result<Option<i32>> {
        let log_path = dir.join("stdout.txt");
        let log = File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;
        let log_err = log.try_clone()?;

        tracing::debug!("Executing in {}: {}", dir.display(), cmd);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .context("Failed to spawn job process")?;

        if !attach {
            println!(
                "{} Job started (PID: {})",
                "✓".green().bold(),
                child.id()
            );
            println!("  Output: {}", log_path.display());
            return Ok(None);
        }

        let status = child.wait().context("Failed to wait for job process")?;
        let code = status.code().unwrap_or(-1);
        if !status.success() {
            anyhow::bail!(
                "Job exited with code {} (see {})",
                code,
                log_path.display()
            );
        }
        println!("{} Job completed successfully", "✓".green().bold());
        Ok(Some(code))
    }
}

#[async_trait]
impl ExecutionStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn setup(&self, ctx: &DeploymentContext) -> Result<()> {
        let dir = self.workdir(ctx);
        match ctx.policy.decide(&ctx.workdir, dir.exists())? {
            SetupAction::Reuse => {
                tracing::info!("Reusing existing working directory {}", dir.display());
            }
            SetupAction::Create { parents: true } => std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?,
            SetupAction::Create { parents: false } => std::fs::create_dir(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?,
        }
        Ok(())
    }

    async fn push(
        &self,
        ctx: &DeploymentContext,
        store: &dyn ImageStore,
        image: &ImageRef,
    ) -> Result<()> {
        let output = self.workdir(ctx).join(image.archive_name());
        let bytes = store.export_image(image, &output).await?;
        tracing::info!("Wrote {} ({} bytes)", output.display(), bytes);
        Ok(())
    }

    async fn build(&self, _ctx: &DeploymentContext, _image: &ImageRef) -> Result<()> {
        tracing::debug!("Docker runs the image directly; skipping SIF build");
        Ok(())
    }

    async fn submit(&self, ctx: &DeploymentContext, _image: &ImageRef) -> Result<()> {
        let cmd = self.job_command(ctx)?;
        println!("  {} {}", "•".yellow(), cmd);
        self.execute(&self.workdir(ctx), &cmd, ctx.attach)?;
        Ok(())
    }
}
