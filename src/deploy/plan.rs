//! Final command lines for the submit stage and the `--cli` preview.

use serde_yaml::Value;
use std::path::Path;

use crate::compose::{
    batch_flags, build_command, container_args, run_flags, shell_escape, ComposeError, Runtime,
};
use crate::deploy::volumes;
use crate::deploy::DeploymentContext;

/// Options only `docker run` understands.
const BATCH_IGNORED: &[&str] = &["container_name"];

/// `srun <batch flags> singularity run <run flags> <sif> <commands>`, with
/// the image replaced by the built SIF and volumes remapped under the
/// working directory.
pub fn remote_command(ctx: &DeploymentContext, digest: &str) -> Result<String, ComposeError> {
    let sif = format!("{}/{}.sif", ctx.workdir.trim_end_matches('/'), digest);
    let mut overrides = vec![("image", Value::String(sif))];

    if ctx.container.contains("volumes") {
        let remapped = volumes::remap_all(&ctx.container, &ctx.workdir)?
            .into_iter()
            .map(|volume| Value::String(volume.spec))
            .collect();
        overrides.push(("volumes", Value::Sequence(remapped)));
    }

    let options = ctx.container.with_overrides(&overrides, BATCH_IGNORED)?;

    let mut cmd = batch_flags(&ctx.slurm)?;
    cmd.extend(run_flags(&options, Runtime::Singularity)?);
    cmd.extend(container_args(&options)?);
    Ok(cmd.join(" "))
}

/// `docker run <run flags> <image> <commands>` with host paths resolved
/// against `base`.
pub fn local_command(ctx: &DeploymentContext, base: &Path) -> Result<String, ComposeError> {
    let options = match volumes::resolve_local(&ctx.container, base)? {
        Some(resolved) => ctx.container.with_overrides(&[("volumes", resolved)], &[])?,
        None => ctx.container.clone(),
    };

    let mut cmd = run_flags(&options, Runtime::Docker)?;
    cmd.extend(container_args(&options)?);
    Ok(cmd.join(" "))
}

/// Resolve a `remotedir` against the remote login directory. Relative and
/// `~/` paths are both taken from `home`; absolute paths are kept.
pub fn absolute_workdir(home: &str, workdir: &str) -> String {
    if workdir.starts_with('/') {
        return workdir.to_string();
    }

    let relative = match workdir {
        "~" => "",
        _ => workdir.strip_prefix("~/").unwrap_or(workdir),
    };
    let relative = relative.trim_start_matches("./").trim_end_matches('/');
    let home = home.trim_end_matches('/');

    if relative.is_empty() || relative == "." {
        home.to_string()
    } else {
        format!("{}/{}", home, relative)
    }
}

/// Build `<digest>.sif` inside the working directory, merging stderr so
/// the whole log arrives on one stream.
pub fn remote_build(workdir: &str, digest: &str) -> String {
    format!(
        "cd {} && {} 2>&1",
        shell_escape(workdir),
        build_command(digest).join(" ")
    )
}

/// Launch `cmd` in the background, detached from the SSH session.
pub fn detached(workdir: &str, cmd: &str) -> String {
    format!(
        "cd {} && nohup {} > stdout.txt 2>&1 < /dev/null &",
        shell_escape(workdir),
        cmd
    )
}

/// Run `cmd` in the foreground, teeing its combined output to `stdout.txt`.
pub fn attached(workdir: &str, cmd: &str) -> String {
    format!(
        "set -o pipefail; cd {} && {} 2>&1 | tee stdout.txt",
        shell_escape(workdir),
        cmd
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::options;
    use crate::deploy::SetupPolicy;

    fn context(container: &str, slurm: &str) -> DeploymentContext {
        DeploymentContext {
            workdir: "/scratch/run1".to_string(),
            image: "app:v1".to_string(),
            container: options(container),
            slurm: options(slurm),
            policy: SetupPolicy::default(),
            attach: false,
            transfer_volumes: true,
        }
    }

    #[test]
    fn remote_command_uses_sif_and_remapped_volumes() {
        let ctx = context(
            "image: app:v1\ncontainer_name: trainer\nvolumes: ['./data:/data']\ncommands: [python, train.py]\n",
            "partition: gpu\ntime: \"01:00:00\"\n",
        );
        assert_eq!(
            remote_command(&ctx, "abc").unwrap(),
            "srun --partition=gpu --time=01:00:00 singularity run \
             --bind /scratch/run1/data:/data /scratch/run1/abc.sif python train.py"
        );
    }

    #[test]
    fn remote_command_without_volumes() {
        let ctx = context("image: app:v1\nenvironment: {FOO: bar}\n", "{}");
        assert_eq!(
            remote_command(&ctx, "abc").unwrap(),
            "srun singularity run --env FOO=bar /scratch/run1/abc.sif"
        );
    }

    #[test]
    fn local_command_keeps_container_name() {
        let ctx = context(
            "image: app:v1\ncontainer_name: trainer\nvolumes: ['./data:/data']\n",
            "partition: gpu\n",
        );
        assert_eq!(
            local_command(&ctx, Path::new("/home/alice")).unwrap(),
            "docker run --name trainer --volume /home/alice/data:/data app:v1"
        );
    }

    #[test]
    fn unsupported_options_fail_both_targets() {
        let ctx = context("image: app:v1\nprivileged: true\n", "{}");
        let expected = ComposeError::UnsupportedOption("privileged".into());
        assert_eq!(remote_command(&ctx, "abc").unwrap_err(), expected);
        assert_eq!(local_command(&ctx, Path::new("/")).unwrap_err(), expected);
    }

    #[test]
    fn relative_workdir_is_resolved_before_composing() {
        let mut ctx = context("image: app:v1\nvolumes: ['./data:/data']\n", "partition: gpu\n");
        ctx.workdir = "run1".to_string();
        let ctx = ctx.with_workdir(absolute_workdir("/home/alice", &ctx.workdir));

        let cmd = remote_command(&ctx, "abc").unwrap();
        assert_eq!(
            detached(&ctx.workdir, &cmd),
            "cd /home/alice/run1 && nohup srun --partition=gpu singularity run \
             --bind /home/alice/run1/data:/data /home/alice/run1/abc.sif \
             > stdout.txt 2>&1 < /dev/null &"
        );
    }

    #[test]
    fn workdirs_resolve_against_home() {
        assert_eq!(absolute_workdir("/home/alice", "run1"), "/home/alice/run1");
        assert_eq!(absolute_workdir("/home/alice/", "./jobs/run1/"), "/home/alice/jobs/run1");
        assert_eq!(absolute_workdir("/home/alice", "~/run1"), "/home/alice/run1");
        assert_eq!(absolute_workdir("/home/alice", "~"), "/home/alice");
        assert_eq!(absolute_workdir("/home/alice", "/scratch/run1"), "/scratch/run1");
        assert_eq!(absolute_workdir(".", "~/run1"), "./run1");
    }

    #[test]
    fn wrappers_redirect_into_stdout_txt() {
        assert_eq!(
            detached("/scratch/run 1", "srun hostname"),
            "cd '/scratch/run 1' && nohup srun hostname > stdout.txt 2>&1 < /dev/null &"
        );
        assert!(attached("run1", "srun hostname").ends_with("srun hostname 2>&1 | tee stdout.txt"));
        assert_eq!(
            remote_build("run1", "abc"),
            "cd run1 && srun singularity build abc.sif docker-archive://abc.tar 2>&1"
        );
    }
}
