//! Packing an expanded image tree into an `.aci` file.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use acb_core::error::{BuildError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

/// Write `<image_dir>/manifest` and `<image_dir>/rootfs` to a gzip tarball.
///
/// The archive is staged next to `output` and renamed into place once
/// complete. An existing `output` is an error unless `overwrite` is set.
pub fn write_aci(image_dir: &Path, output: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && output.exists() {
        return Err(BuildError::validation(format!(
            "{} already exists, use --overwrite to replace it",
            output.display()
        )));
    }

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let staged = tempfile::NamedTempFile::new_in(&parent)?;
    staged
        .as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o644))?;

    let encoder = GzEncoder::new(staged.as_file(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_path_with_name(image_dir.join("manifest"), "manifest")?;
    builder.append_dir_all("rootfs", image_dir.join("rootfs"))?;
    builder.into_inner()?.finish()?;

    staged
        .persist(output)
        .map_err(|e| BuildError::Io(e.error))?;

    tracing::debug!(
        image = %image_dir.display(),
        output = %output.display(),
        "Wrote image archive"
    );
    Ok(())
}
