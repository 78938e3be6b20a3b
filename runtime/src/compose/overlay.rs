//! Live overlayfs mount of a layer stack.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use acb_core::error::{BuildError, Result};
use nix::mount::{mount, umount, umount2, MntFlags, MsFlags};

use super::LayerStack;

/// Mount options for `stack`: `lowerdir` lists the highest-priority lower
/// layer first, the stack's top is the writable `upperdir`.
pub fn overlay_options(stack: &LayerStack, work: &Path) -> Result<String> {
    let mut lower = Vec::with_capacity(stack.lower.len());
    for layer in stack.lower.iter().rev() {
        lower.push(option_path(layer)?);
    }
    Ok(format!(
        "lowerdir={},upperdir={},workdir={}",
        lower.join(":"),
        option_path(&stack.top)?,
        option_path(work)?
    ))
}

fn option_path(path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| {
        BuildError::validation(format!("overlay path {} is not valid UTF-8", path.display()))
    })?;
    if s.contains([',', ':']) {
        return Err(BuildError::validation(format!(
            "overlay path {s} must not contain ',' or ':'"
        )));
    }
    Ok(s.to_string())
}

/// A mounted overlay. Unmounted by [`OverlayMount::unmount`] or on drop.
#[derive(Debug)]
pub struct OverlayMount {
    target: PathBuf,
    mounted: bool,
}

impl OverlayMount {
    /// Mount `stack` at `target` using `work` as the overlay work directory.
    ///
    /// `target` and `work` must exist and be empty; `work` must share a
    /// filesystem with the stack's top.
    pub fn mount(stack: &LayerStack, work: &Path, target: &Path) -> Result<Self> {
        let options = overlay_options(stack, work)?;
        mount(
            Some("overlay"),
            target,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|e| BuildError::Execution(format!("failed to mount overlay at {}: {e}", target.display())))?;

        tracing::debug!(target = %target.display(), options = %options, "Mounted overlay");
        Ok(Self {
            target: target.to_path_buf(),
            mounted: true,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn unmount(mut self) -> Result<()> {
        self.unmount_inner()
    }

    /// Unmount, falling back to a lazy detach when the mount is busy.
    ///
    /// On error the overlay is still attached at `target`.
    fn unmount_inner(&mut self) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        if let Err(e) = umount(self.target.as_path()) {
            tracing::warn!(target = %self.target.display(), error = %e, "Unmount failed, detaching overlay");
            umount2(self.target.as_path(), MntFlags::MNT_DETACH).map_err(|detach| {
                BuildError::Execution(format!(
                    "failed to unmount {}: {e} (detach: {detach})",
                    self.target.display()
                ))
            })?;
        }
        self.mounted = false;
        tracing::debug!(target = %self.target.display(), "Unmounted overlay");
        Ok(())
    }
}

/// Whether a filesystem is mounted at `path`.
///
/// A missing path is not a mount point.
pub fn is_mount_point(path: &Path) -> bool {
    let (Ok(meta), Some(parent)) = (std::fs::symlink_metadata(path), path.parent()) else {
        return false;
    };
    match std::fs::metadata(parent) {
        Ok(parent_meta) => meta.dev() != parent_meta.dev(),
        Err(_) => false,
    }
}

impl Drop for OverlayMount {
    fn drop(&mut self) {
        if let Err(e) = self.unmount_inner() {
            tracing::warn!(error = %e, "Failed to unmount overlay");
        }
    }
}
