//! Physical merge of a layer stack into one directory tree.

use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use acb_core::error::Result;

use super::LayerStack;

/// Copy every layer of `stack` into `target`, lowest first; later layers overwrite.
///
/// `target` is recreated empty before copying.
pub fn flatten(stack: &LayerStack, target: &Path) -> Result<()> {
    reset_dir(target)?;
    for layer in stack.lowest_first() {
        copy_tree(layer, target, LinkOwnership::current())?;
        tracing::debug!(layer = %layer.display(), target = %target.display(), "Merged layer");
    }
    Ok(())
}

/// Replace `rootfs` with `replacement`, parking the old tree at `park`.
///
/// `commit` runs once the new tree is in place. If the second rename or
/// `commit` fails, both trees are moved back before returning. Removing the
/// parked tree afterwards is best-effort.
pub fn swap_into<F>(replacement: &Path, rootfs: &Path, park: &Path, commit: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    remove_if_exists(park)?;
    std::fs::rename(rootfs, park)?;
    if let Err(e) = std::fs::rename(replacement, rootfs) {
        restore(park, rootfs);
        return Err(e.into());
    }
    if let Err(e) = commit() {
        match std::fs::rename(rootfs, replacement) {
            Ok(()) => restore(park, rootfs),
            Err(undo) => tracing::error!(
                rootfs = %rootfs.display(),
                parked = %park.display(),
                error = %undo,
                "Failed to move merged tree aside after commit failure"
            ),
        }
        return Err(e);
    }
    if let Err(e) = remove_if_exists(park) {
        tracing::warn!(path = %park.display(), error = %e, "Failed to remove parked rootfs");
    }
    Ok(())
}

fn restore(park: &Path, rootfs: &Path) {
    if let Err(e) = std::fs::rename(park, rootfs) {
        tracing::error!(
            rootfs = %rootfs.display(),
            parked = %park.display(),
            error = %e,
            "Failed to restore rootfs after swap failure"
        );
    }
}

/// Remove whatever is at `path` and create an empty directory there.
pub fn reset_dir(path: &Path) -> Result<()> {
    remove_if_exists(path)?;
    std::fs::create_dir_all(path)?;
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
        Ok(_) => std::fs::remove_file(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct LinkOwnership {
    preserve: bool,
}

impl LinkOwnership {
    fn current() -> Self {
        Self {
            preserve: nix::unistd::geteuid().is_root(),
        }
    }
}

/// Recursively copy `src` into `dst`, keeping symlinks as symlinks.
fn copy_tree(src: &Path, dst: &Path, ownership: LinkOwnership) -> io::Result<()> {
    let src_meta = std::fs::symlink_metadata(src)?;
    if !dst.exists() {
        std::fs::create_dir_all(dst)?;
    }
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(src_meta.mode() & 0o7777))?;
    chown(dst, &src_meta, ownership)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let meta = std::fs::symlink_metadata(&src_path)?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            match std::fs::symlink_metadata(&dst_path) {
                Ok(existing) if !existing.is_dir() => std::fs::remove_file(&dst_path)?,
                _ => {}
            }
            copy_tree(&src_path, &dst_path, ownership)?;
            continue;
        }

        match std::fs::symlink_metadata(&dst_path) {
            Ok(existing) if existing.is_dir() => std::fs::remove_dir_all(&dst_path)?,
            Ok(_) => std::fs::remove_file(&dst_path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if file_type.is_symlink() {
            let target = std::fs::read_link(&src_path)?;
            std::os::unix::fs::symlink(&target, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
        chown(&dst_path, &meta, ownership)?;
    }
    Ok(())
}

fn chown(path: &Path, meta: &std::fs::Metadata, ownership: LinkOwnership) -> io::Result<()> {
    if ownership.preserve {
        std::os::unix::fs::lchown(path, Some(meta.uid()), Some(meta.gid()))?;
    }
    Ok(())
}
