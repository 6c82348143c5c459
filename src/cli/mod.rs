pub mod run;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use crate::config::deployment::DeploymentConfig;
use crate::deploy::remote::SshTarget;
use crate::deploy::{DeploymentContext, SetupPolicy};

#[derive(Parser)]
#[command(name = "docksing")]
#[command(author = "DockSing Team")]
#[command(version)]
#[command(
    about = "Run a local Docker image as a Singularity job on a SLURM cluster, or locally with Docker",
    long_about = None
)]
#[command(group(ArgGroup::new("target").required(true).args(["ssh", "local"])))]
pub struct Cli {
    /// Remote login node (format: user@host or user@host:port)
    #[arg(long, value_name = "USER@HOST")]
    ssh: Option<SshTarget>,

    /// Run the image locally with docker instead of submitting it
    #[arg(long)]
    local: bool,

    /// Deployment configuration file (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Print the composed run command instead of executing anything
    #[arg(long)]
    cli: bool,

    /// Wait for the job to finish and stream its output
    #[arg(long)]
    attach: bool,

    /// What to do when the working directory already exists
    #[arg(long, value_enum, value_name = "POLICY")]
    setup: Option<SetupPolicy>,

    /// Do not copy local volume directories to the remote working directory
    #[arg(long)]
    skip_transfer: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = DeploymentConfig::load(&self.config)?;
        let ctx = DeploymentContext::from_config(
            config,
            self.setup,
            self.attach,
            !self.skip_transfer,
        )?;

        match (self.ssh, self.cli) {
            (Some(target), true) => run::print_remote_command(&target, &ctx).await,
            (Some(target), false) => run::deploy_remote(&target, &ctx).await,
            (None, true) => run::print_local_command(&ctx),
            (None, false) => run::deploy_local(&ctx).await,
        }
    }
}
