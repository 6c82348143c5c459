//! The deployment pipeline: setup → push → build → submit.
//!
//! Each stage runs through an [`ExecutionStrategy`], either over SSH to a
//! SLURM login node ([`remote::RemoteStrategy`]) or on this machine
//! ([`local::LocalStrategy`]). A failing stage aborts the ones after it;
//! nothing is rolled back.

pub mod credentials;
pub mod local;
pub mod plan;
pub mod remote;
pub mod setup;
pub mod volumes;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;

use crate::compose::{container_args, scalar, ComposeError, OptionSet};
use crate::config::deployment::DeploymentConfig;
use crate::docker::{ImageRef, ImageStore};

pub use setup::{SetupAction, SetupPolicy};

/// Everything a stage needs to know about one deployment
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    /// Working directory on the target
    pub workdir: String,
    /// Image tag as declared under `container.image`
    pub image: String,
    pub container: OptionSet,
    pub slurm: OptionSet,
    pub policy: SetupPolicy,
    /// Block on the submitted command instead of detaching
    pub attach: bool,
    /// Mirror local volume directories into the working directory
    pub transfer_volumes: bool,
}

impl DeploymentContext {
    /// Build the context from a loaded config. `policy` overrides the
    /// config's `setup` key when given.
    pub fn from_config(
        config: DeploymentConfig,
        policy: Option<SetupPolicy>,
        attach: bool,
        transfer_volumes: bool,
    ) -> Result<Self> {
        let container = OptionSet::from(config.container);
        // fail early on a missing image rather than after the upload
        container_args(&container)?;
        let image = container
            .get("image")
            .map(|value| scalar("image", value))
            .transpose()?
            .ok_or_else(|| ComposeError::MissingOption("image".to_string()))?;

        Ok(Self {
            workdir: config.remotedir,
            image,
            container,
            slurm: OptionSet::from(config.slurm),
            policy: policy.or(config.setup).unwrap_or_default(),
            attach,
            transfer_volumes,
        })
    }

    /// The same deployment with the working directory replaced
    pub fn with_workdir(&self, workdir: String) -> Self {
        Self {
            workdir,
            ..self.clone()
        }
    }
}

/// Where and how the pipeline stages are carried out
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Ensure the working directory exists, according to `ctx.policy`
    async fn setup(&self, ctx: &DeploymentContext) -> Result<()>;

    /// Save the image from `store` as `<digest>.tar` in the working directory
    async fn push(
        &self,
        ctx: &DeploymentContext,
        store: &dyn ImageStore,
        image: &ImageRef,
    ) -> Result<()>;

    /// Convert the archive into `<digest>.sif`
    async fn build(&self, ctx: &DeploymentContext, image: &ImageRef) -> Result<()>;

    /// Compose the run command and launch it
    async fn submit(&self, ctx: &DeploymentContext, image: &ImageRef) -> Result<()>;
}

/// Run all four stages in order.
pub async fn run_pipeline(
    strategy: &dyn ExecutionStrategy,
    store: &dyn ImageStore,
    ctx: &DeploymentContext,
) -> Result<()> {
    let image = store.resolve_image(&ctx.image).await?;
    tracing::info!(
        "Deploying {} ({}) via {} target",
        image.tag,
        image.short_digest(),
        strategy.name()
    );

    println!(
        "{} Preparing working directory {}",
        "=>".blue().bold(),
        ctx.workdir.cyan()
    );
    strategy
        .setup(ctx)
        .await
        .with_context(|| format!("Setup of '{}' failed", ctx.workdir))?;

    println!(
        "{} Pushing image {} as {}",
        "=>".blue().bold(),
        image.tag.cyan(),
        image.archive_name()
    );
    strategy
        .push(ctx, store, &image)
        .await
        .with_context(|| format!("Failed to push image '{}'", image.tag))?;

    strategy
        .build(ctx, &image)
        .await
        .with_context(|| format!("Failed to build {}", image.sif_name()))?;

    println!("{} Submitting job", "=>".blue().bold());
    strategy.submit(ctx, &image).await.context("Failed to submit job")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::options;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeStore;

    #[async_trait]
    impl ImageStore for FakeStore {
        async fn resolve_image(&self, tag: &str) -> Result<ImageRef> {
            if tag == "missing:latest" {
                anyhow::bail!("Image '{}' not found", tag);
            }
            Ok(ImageRef {
                tag: tag.to_string(),
                digest: "feedbeef".to_string(),
            })
        }

        async fn export_image(&self, _image: &ImageRef, _output: &Path) -> Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_at: Option<&'static str>,
    }

    impl Recorder {
        fn record(&self, stage: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(stage.to_string());
            if self.fail_at == Some(stage) {
                anyhow::bail!("{} exploded", stage);
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionStrategy for Recorder {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn setup(&self, _ctx: &DeploymentContext) -> Result<()> {
            self.record("setup")
        }

        async fn push(
            &self,
            _ctx: &DeploymentContext,
            _store: &dyn ImageStore,
            image: &ImageRef,
        ) -> Result<()> {
            assert_eq!(image.digest, "feedbeef");
            self.record("push")
        }

        async fn build(&self, _ctx: &DeploymentContext, _image: &ImageRef) -> Result<()> {
            self.record("build")
        }

        async fn submit(&self, _ctx: &DeploymentContext, _image: &ImageRef) -> Result<()> {
            self.record("submit")
        }
    }

    fn context(image: &str) -> DeploymentContext {
        DeploymentContext {
            workdir: "run1".to_string(),
            image: image.to_string(),
            container: options(&format!("image: '{}'\n", image)),
            slurm: OptionSet::default(),
            policy: SetupPolicy::default(),
            attach: false,
            transfer_volumes: false,
        }
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let recorder = Recorder::default();
        run_pipeline(&recorder, &FakeStore, &context("app:v1")).await.unwrap();
        assert_eq!(recorder.calls(), vec!["setup", "push", "build", "submit"]);
    }

    #[tokio::test]
    async fn failure_aborts_later_stages() {
        let recorder = Recorder {
            fail_at: Some("push"),
            ..Default::default()
        };
        let err = run_pipeline(&recorder, &FakeStore, &context("app:v1"))
            .await
            .unwrap_err();

        assert_eq!(recorder.calls(), vec!["setup", "push"]);
        assert!(format!("{:#}", err).contains("push exploded"));
    }

    #[tokio::test]
    async fn unknown_image_stops_before_setup() {
        let recorder = Recorder::default();
        assert!(run_pipeline(&recorder, &FakeStore, &context("missing:latest"))
            .await
            .is_err());
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn context_requires_an_image() {
        let config = DeploymentConfig::parse("remotedir: run1\ncontainer:\n  ports: ['1:1']\n").unwrap();
        let err = DeploymentContext::from_config(config, None, false, true).unwrap_err();
        assert!(err.to_string().contains("'image'"));
    }

    #[test]
    fn cli_policy_wins_over_config() {
        let config = DeploymentConfig::parse(
            "remotedir: run1\nsetup: skip-if-present\ncontainer:\n  image: app:v1\n",
        )
        .unwrap();

        let from_config = DeploymentContext::from_config(config.clone(), None, false, true).unwrap();
        assert_eq!(from_config.policy, SetupPolicy::SkipIfPresent);
        assert_eq!(from_config.image, "app:v1");

        let overridden =
            DeploymentContext::from_config(config, Some(SetupPolicy::CreateIfMissing), true, true)
                .unwrap();
        assert_eq!(overridden.policy, SetupPolicy::CreateIfMissing);
        assert!(overridden.attach);
    }
}
