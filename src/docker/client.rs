use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::{image_digest, ImageRef, ImageStore};

/// Docker client wrapper for DockSing operations
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Create a new Docker client
    pub async fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        // Verify connection
        docker
            .ping()
            .await
            .context("Failed to ping Docker daemon")?;

        Ok(Self { docker })
    }
}

#[async_trait]
impl ImageStore for DockerClient {
    async fn resolve_image(&self, tag: &str) -> Result<ImageRef> {
        let inspect = self
            .docker
            .inspect_image(tag)
            .await
            .with_context(|| format!("Image '{}' not found in the local Docker daemon", tag))?;

        let id = inspect
            .id
            .with_context(|| format!("Docker returned no ID for image '{}'", tag))?;

        tracing::debug!("Resolved {} to {}", tag, id);

        Ok(ImageRef {
            tag: tag.to_string(),
            digest: image_digest(&id)?,
        })
    }

    async fn export_image(&self, image: &ImageRef, output: &Path) -> Result<u64> {
        let mut stream = self.docker.export_image(&image.tag);

        let mut file = tokio::fs::File::create(output)
            .await
            .with_context(|| format!("Failed to create output file: {}", output.display()))?;

        let mut written = 0u64;
        while let Some(result) = stream.next().await {
            match result {
                Ok(data) => {
                    file.write_all(&data).await?;
                    written += data.len() as u64;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("Export of '{}' failed: {}", image.tag, e));
                }
            }
        }

        file.flush().await?;
        Ok(written)
    }
}
