//! Publishing written images.

use std::path::Path;

use acb_core::error::Result;
use async_trait::async_trait;

/// Sends an image, and optionally its signature, to a destination.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, aci: &Path, signature: Option<&Path>, destination: &str) -> Result<()>;
}
