pub mod client;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// A local image resolved to its content-addressed identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Tag or name as declared in the configuration
    pub tag: String,
    /// Content digest; names the `.tar` archive and the `.sif` image
    pub digest: String,
}

impl ImageRef {
    pub fn archive_name(&self) -> String {
        format!("{}.tar", self.digest)
    }

    pub fn sif_name(&self) -> String {
        format!("{}.sif", self.digest)
    }

    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

/// The local container image store the pipeline reads images from
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Look up an image by tag and resolve its digest
    async fn resolve_image(&self, tag: &str) -> Result<ImageRef>;

    /// Save an image as a `docker save` archive, returning the bytes written
    async fn export_image(&self, image: &ImageRef, output: &Path) -> Result<u64>;
}

/// Extract the digest from an image ID: the segment after the algorithm
/// prefix (`sha256:<hex>` → `<hex>`).
pub fn image_digest(id: &str) -> Result<String> {
    let digest = match id.split_once(':') {
        Some((_, rest)) => rest.split(':').next().unwrap_or(rest),
        None => id,
    };
    if digest.is_empty() {
        anyhow::bail!("Image ID '{}' does not contain a digest", id);
    }
    Ok(digest.to_string())
}
