use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::Mapping;
use std::path::Path;

use crate::deploy::SetupPolicy;

/// Deployment configuration loaded from the file passed with `--config`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    /// Working directory on the target host (or relative to the current
    /// directory in local mode)
    pub remotedir: String,

    /// Container options: image, commands, environment, volumes, ports,
    /// working_dir, container_name
    pub container: Mapping,

    /// SLURM options, each passed to `srun` as `--key=value`
    #[serde(default)]
    pub slurm: Mapping,

    /// Behaviour when the working directory already exists
    #[serde(default)]
    pub setup: Option<SetupPolicy>,
}

impl DeploymentConfig {
    /// Load deployment configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: DeploymentConfig = serde_yaml::from_str(content)?;

        if config.remotedir.trim().is_empty() {
            anyhow::bail!("`remotedir` must not be empty");
        }

        Ok(config)
    }
}
