//! On-disk layout of a build context.
//!
//! ```text
//! <root>/
//! ├── currentaci/
//! │   ├── manifest
//! │   └── rootfs/
//! ├── deps/            image store (see `store`)
//! ├── overlay-work/
//! ├── overlay-target/
//! └── lock
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ContextPaths {
    root: PathBuf,
}

impl ContextPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expanded image under construction.
    pub fn current_aci(&self) -> PathBuf {
        self.root.join("currentaci")
    }

    pub fn manifest(&self) -> PathBuf {
        self.current_aci().join("manifest")
    }

    pub fn rootfs(&self) -> PathBuf {
        self.current_aci().join("rootfs")
    }

    pub fn overlay_work(&self) -> PathBuf {
        self.root.join("overlay-work")
    }

    pub fn overlay_target(&self) -> PathBuf {
        self.root.join("overlay-target")
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Whether a build exists here.
    ///
    /// A lock file alone does not count: a live holder is detected by the
    /// lock itself, and a leftover file from a crashed process is reclaimed.
    pub fn in_progress(&self) -> bool {
        self.current_aci().exists()
    }
}
