use anyhow::{Context, Result};
use colored::Colorize;

use crate::deploy::credentials;
use crate::deploy::local::LocalStrategy;
use crate::deploy::remote::{RemoteStrategy, SshTarget};
use crate::deploy::{plan, run_pipeline, DeploymentContext};
use crate::docker::client::DockerClient;
use crate::docker::ImageStore;

// ---------------------------------------------------------------------------
// docksing --ssh user@host
// ---------------------------------------------------------------------------

pub async fn deploy_remote(target: &SshTarget, ctx: &DeploymentContext) -> Result<()> {
    let docker = DockerClient::new().await?;

    println!("{} Connecting to {}...", "=>".blue().bold(), target.to_string().cyan());
    let provider = credentials::default_provider();
    let strategy = tokio::task::block_in_place(|| RemoteStrategy::connect(target, provider.as_ref()))?;

    run_pipeline(&strategy, &docker, ctx).await
}

// ---------------------------------------------------------------------------
// docksing --local
// ---------------------------------------------------------------------------

pub async fn deploy_local(ctx: &DeploymentContext) -> Result<()> {
    let strategy = LocalStrategy::new()?;
    let docker = DockerClient::new().await?;

    run_pipeline(&strategy, &docker, ctx).await
}

// ---------------------------------------------------------------------------
// docksing --cli
// ---------------------------------------------------------------------------

/// Print the `srun` command the remote submit stage would launch. Docker is
/// only asked for the image digest; no SSH connection is made, so paths are
/// printed relative to the login directory.
pub async fn print_remote_command(target: &SshTarget, ctx: &DeploymentContext) -> Result<()> {
    let docker = DockerClient::new().await?;
    let image = docker.resolve_image(&ctx.image).await?;
    tracing::debug!("Composing command for {}", target);

    let ctx = ctx.with_workdir(plan::absolute_workdir(".", &ctx.workdir));
    println!("{}", plan::remote_command(&ctx, &image.digest)?);
    Ok(())
}

/// Print the `docker run` command the local submit stage would execute.
pub fn print_local_command(ctx: &DeploymentContext) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    println!("{}", plan::local_command(ctx, &cwd)?);
    Ok(())
}
