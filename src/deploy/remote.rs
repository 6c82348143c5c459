use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use ssh2::{Session, Sftp};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::str::FromStr;

use super::credentials::CredentialProvider;
use super::volumes::{self, RemappedVolume};
use super::{plan, DeploymentContext, ExecutionStrategy, SetupAction};
use crate::docker::{ImageRef, ImageStore};
use crate::utils::paths;

const DEFAULT_SSH_PORT: u16 = 22;

/// Remote login target given as `user@host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for SshTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, rest) = s
            .split_once('@')
            .ok_or_else(|| format!("Invalid SSH target '{}'. Expected user@host", s))?;

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("Invalid port '{}' in SSH target '{}'", port, s))?;
                (host, port)
            }
            None => (rest, DEFAULT_SSH_PORT),
        };

        if user.is_empty() || host.is_empty() {
            return Err(format!("Invalid SSH target '{}'. Expected user@host", s));
        }

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_SSH_PORT {
            write!(f, "{}@{}", self.user, self.host)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

/// Runs the pipeline on a SLURM login node over one authenticated SSH
/// session: SFTP for directories, SCP for the image archive, `exec` for
/// `srun`.
///
/// `ssh2` is blocking, so every session call runs inside
/// `tokio::task::block_in_place`.
pub struct RemoteStrategy {
    session: Session,
    target: SshTarget,
    /// Login directory that relative working directories resolve against
    home: String,
}

impl RemoteStrategy {
    /// Open and authenticate the session. The password comes from
    /// `credentials`.
    pub fn connect(target: &SshTarget, credentials: &dyn CredentialProvider) -> Result<Self> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .with_context(|| format!("Failed to connect to {}:{}", target.host, target.port))?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .with_context(|| format!("SSH handshake with {} failed", target.host))?;

        let password = credentials.password(target)?;
        session
            .userauth_password(&target.user, &password)
            .with_context(|| format!("Authentication failed for {}", target))?;

        if !session.authenticated() {
            anyhow::bail!("Authentication failed for {}", target);
        }

        let home = session
            .sftp()
            .and_then(|sftp| sftp.realpath(Path::new(".")))
            .with_context(|| format!("Failed to resolve home directory on {}", target.host))?;
        let home = home.to_string_lossy().into_owned();

        tracing::info!("Connected to {} (home {})", target, home);
        Ok(Self {
            session,
            target: target.clone(),
            home,
        })
    }

    /// `ctx` with its working directory made absolute on the remote host,
    /// so composed paths stay valid after the job wrapper's `cd`.
    fn resolve(&self, ctx: &DeploymentContext) -> DeploymentContext {
        let workdir = plan::absolute_workdir(&self.home, &ctx.workdir);
        if workdir != ctx.workdir {
            tracing::debug!("Resolved working directory {} to {}", ctx.workdir, workdir);
        }
        ctx.with_workdir(workdir)
    }

    /// Run `command` and wait for it, returning its exit status and stdout.
    fn exec(&self, command: &str) -> Result<(i32, String)> {
        tracing::debug!("[{}] {}", self.target.host, command);
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut output = Vec::new();
        channel.read_to_end(&mut output)?;
        channel.wait_close()?;

        Ok((
            channel.exit_status()?,
            String::from_utf8_lossy(&output).into_owned(),
        ))
    }

    /// Run `command`, copying its output to our stdout as it arrives.
    fn exec_streaming(&self, command: &str) -> Result<i32> {
        tracing::debug!("[{}] {}", self.target.host, command);
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        std::io::copy(&mut channel, &mut std::io::stdout())?;
        std::io::copy(&mut channel.stderr(), &mut std::io::stderr())?;
        channel.wait_close()?;

        Ok(channel.exit_status()?)
    }

    fn sftp(&self) -> Result<Sftp> {
        self.session.sftp().context("Failed to open SFTP channel")
    }

    fn create_dir(&self, sftp: &Sftp, dir: &str, parents: bool) -> Result<()> {
        if !parents {
            return sftp
                .mkdir(Path::new(dir), 0o755)
                .with_context(|| format!("Failed to create {} on {}", dir, self.target.host));
        }

        let mut ancestors: Vec<&Path> = Path::new(dir)
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty() && *p != Path::new("/"))
            .collect();
        ancestors.reverse();

        for path in ancestors {
            if sftp.stat(path).is_err() {
                sftp.mkdir(path, 0o755).with_context(|| {
                    format!("Failed to create {} on {}", path.display(), self.target.host)
                })?;
            }
        }
        Ok(())
    }

    /// Copy a local file to `remote` over SCP, advancing `pb` per byte.
    fn upload_file(&self, local: &Path, remote: &str, pb: &ProgressBar) -> Result<()> {
        let file = File::open(local)
            .with_context(|| format!("Failed to open {}", local.display()))?;
        let size = file.metadata()?.len();
        pb.set_length(size);

        let mut channel = self
            .session
            .scp_send(Path::new(remote), 0o644, size, None)
            .with_context(|| format!("Failed to start SCP upload to {}", remote))?;
        std::io::copy(&mut pb.wrap_read(file), &mut channel)?;

        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;
        Ok(())
    }

    /// Recursively mirror a local directory to `remote`, returning the
    /// number of files copied.
    fn upload_dir(&self, sftp: &Sftp, local: &Path, remote: &str) -> Result<u64> {
        if sftp.stat(Path::new(remote)).is_err() {
            sftp.mkdir(Path::new(remote), 0o755)
                .with_context(|| format!("Failed to create {} on {}", remote, self.target.host))?;
        }

        let mut copied = 0;
        let entries = std::fs::read_dir(local)
            .with_context(|| format!("Failed to read directory {}", local.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let target = format!("{}/{}", remote, name);

            let metadata = std::fs::metadata(&path)
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            if metadata.is_dir() {
                copied += self.upload_dir(sftp, &path, &target)?;
            } else if metadata.is_file() {
                let mut src = File::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let mut dst = sftp
                    .create(Path::new(&target))
                    .with_context(|| format!("Failed to create {} on {}", target, self.target.host))?;
                std::io::copy(&mut src, &mut dst)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    fn sync_volumes(&self, remapped: &[RemappedVolume]) -> Result<()> {
        let pending: Vec<&RemappedVolume> = remapped.iter().filter(|v| !v.is_passthrough()).collect();
        if pending.is_empty() {
            return Ok(());
        }

        let sftp = self.sftp()?;
        let pb = ProgressBar::new(pending.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );

        for volume in pending {
            let Some(source) = &volume.source else { continue };
            if !source.is_dir() {
                pb.abandon();
                anyhow::bail!("Local volume directory not found: {}", source.display());
            }
            pb.set_message(source.display().to_string());
            let files = self.upload_dir(&sftp, source, &volume.target)?;
            tracing::debug!("Mirrored {} files to {}", files, volume.target);
            pb.inc(1);
        }

        pb.finish_and_clear();
        println!(
            "{} Transferred {} volume(s)",
            "✓".green().bold(),
            remapped.iter().filter(|v| !v.is_passthrough()).count()
        );
        Ok(())
    }
}

#[async_trait]
impl ExecutionStrategy for RemoteStrategy {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn setup(&self, ctx: &DeploymentContext) -> Result<()> {
        let ctx = &self.resolve(ctx);
        tokio::task::block_in_place(|| {
            let sftp = self.sftp()?;
            let exists = sftp.stat(Path::new(&ctx.workdir)).is_ok();
            match ctx.policy.decide(&ctx.workdir, exists)? {
                SetupAction::Reuse => {
                    tracing::info!("Reusing existing working directory {}", ctx.workdir);
                    Ok(())
                }
                SetupAction::Create { parents } => self.create_dir(&sftp, &ctx.workdir, parents),
            }
        })
    }

    async fn push(
        &self,
        ctx: &DeploymentContext,
        store: &dyn ImageStore,
        image: &ImageRef,
    ) -> Result<()> {
        let ctx = &self.resolve(ctx);
        let scratch = paths::temp_archive_path(&image.digest)?;
        let remote = format!("{}/{}", ctx.workdir.trim_end_matches('/'), image.archive_name());
        let spinner_style = ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?;
        let bar_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("=> ");

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style);
        spinner.set_message(format!("Saving {}...", image.tag));
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        let exported = store.export_image(image, &scratch).await;
        spinner.finish_and_clear();

        let result = exported.and_then(|bytes| {
            tracing::debug!("Saved {} bytes to {}", bytes, scratch.display());
            let pb = ProgressBar::new(bytes);
            pb.set_style(bar_style);
            let uploaded = tokio::task::block_in_place(|| self.upload_file(&scratch, &remote, &pb));
            pb.finish_and_clear();
            uploaded
        });

        if let Err(e) = std::fs::remove_file(&scratch) {
            tracing::debug!("Could not remove {}: {}", scratch.display(), e);
        }

        result?;
        println!("{} Uploaded {}", "✓".green().bold(), remote.cyan());
        Ok(())
    }

    async fn build(&self, ctx: &DeploymentContext, image: &ImageRef) -> Result<()> {
        let ctx = &self.resolve(ctx);
        println!(
            "{} Building {} on {}",
            "=>".blue().bold(),
            image.sif_name(),
            self.target.host.cyan()
        );

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        spinner.set_message("singularity build...");
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));

        let command = plan::remote_build(&ctx.workdir, &image.digest);
        let outcome = tokio::task::block_in_place(|| self.exec(&command));
        spinner.finish_and_clear();

        let (status, output) = outcome?;
        for line in output.lines() {
            tracing::debug!("{}", line);
        }
        if status != 0 {
            let tail: Vec<&str> = output.lines().rev().take(20).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            anyhow::bail!(
                "singularity build exited with code {}:\n{}",
                status,
                tail.join("\n")
            );
        }

        println!("{} Built {}", "✓".green().bold(), image.sif_name().cyan());
        Ok(())
    }

    async fn submit(&self, ctx: &DeploymentContext, image: &ImageRef) -> Result<()> {
        let ctx = &self.resolve(ctx);
        let remapped = volumes::remap_all(&ctx.container, &ctx.workdir)?;
        for volume in remapped.iter().filter(|v| v.is_passthrough()) {
            tracing::warn!(
                "Volume '{}' already points at the working directory; passing it through unchanged",
                volume.spec
            );
        }

        let cmd = plan::remote_command(ctx, &image.digest)?;
        println!("  {} {}", "•".yellow(), cmd);

        if ctx.transfer_volumes {
            tokio::task::block_in_place(|| self.sync_volumes(&remapped))?;
        }

        if ctx.attach {
            let status =
                tokio::task::block_in_place(|| self.exec_streaming(&plan::attached(&ctx.workdir, &cmd)))?;
            if status != 0 {
                anyhow::bail!("Job exited with code {}", status);
            }
            println!("{} Job completed successfully", "✓".green().bold());
        } else {
            let (status, output) =
                tokio::task::block_in_place(|| self.exec(&plan::detached(&ctx.workdir, &cmd)))?;
            if status != 0 {
                anyhow::bail!("Failed to launch job (exit code {}): {}", status, output.trim());
            }
            println!("{} Job submitted on {}", "✓".green().bold(), self.target.host.cyan());
            println!(
                "  Output: {}/stdout.txt",
                ctx.workdir.trim_end_matches('/')
            );
        }

        Ok(())
    }
}
