//! Image archive extraction.
//!
//! Archives are tar streams, optionally compressed with gzip, bzip2 or xz.
//! The compression is detected from the leading magic bytes.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use acb_core::error::{BuildError, Result};
use tar::Archive;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

/// Unpacks an image archive into a directory.
pub trait Extractor: Send + Sync {
    /// Extract `archive` into `dest`.
    ///
    /// With `filter`, only the entry of that name and anything beneath it
    /// are written.
    fn extract(&self, archive: &Path, dest: &Path, filter: Option<&str>) -> Result<()>;
}

/// [`Extractor`] backed by the `tar` crate.
#[derive(Debug, Clone)]
pub struct TarExtractor {
    preserve_ownership: bool,
}

impl TarExtractor {
    pub fn new(preserve_ownership: bool) -> Self {
        Self { preserve_ownership }
    }

    /// Keep file ownership only when running as root.
    pub fn for_current_user() -> Self {
        Self::new(nix::unistd::geteuid().is_root())
    }
}

impl Default for TarExtractor {
    fn default() -> Self {
        Self::for_current_user()
    }
}

impl Extractor for TarExtractor {
    fn extract(&self, archive: &Path, dest: &Path, filter: Option<&str>) -> Result<()> {
        let extract_err = |message: String| BuildError::Extract {
            path: archive.to_path_buf(),
            message,
        };

        std::fs::create_dir_all(dest)?;
        let reader = open_decompressed(archive)?;
        let mut tar = Archive::new(reader);
        tar.set_preserve_permissions(true);
        tar.set_preserve_ownerships(self.preserve_ownership);
        tar.set_overwrite(true);

        let entries = tar.entries().map_err(|e| extract_err(e.to_string()))?;
        let mut count = 0usize;
        for entry in entries {
            let mut entry = entry.map_err(|e| extract_err(e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| extract_err(e.to_string()))?
                .into_owned();
            if let Some(filter) = filter {
                if !matches_filter(&path, filter) {
                    continue;
                }
            }
            // unpack_in refuses entries that escape dest
            let unpacked = entry
                .unpack_in(dest)
                .map_err(|e| extract_err(format!("{}: {}", path.display(), e)))?;
            if !unpacked {
                return Err(extract_err(format!(
                    "entry {} escapes the destination",
                    path.display()
                )));
            }
            count += 1;
        }

        tracing::debug!(
            archive = %archive.display(),
            dest = %dest.display(),
            entries = count,
            "Extracted image archive"
        );
        Ok(())
    }
}

/// Open an archive file, wrapping it in the decoder its magic bytes call for.
pub fn open_decompressed(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| BuildError::Extract {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);
    let compression = Compression::detect(reader.fill_buf()?);

    let decoded: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        Compression::None => Box::new(reader),
    };
    Ok(decoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            Compression::Bzip2
        } else if magic.starts_with(XZ_MAGIC) {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

/// Read one regular file entry out of an archive without unpacking the rest.
pub fn read_entry(archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let extract_err = |message: String| BuildError::Extract {
        path: archive.to_path_buf(),
        message,
    };
    let mut tar = Archive::new(open_decompressed(archive)?);
    let wanted = normalize(Path::new(name));

    for entry in tar.entries().map_err(|e| extract_err(e.to_string()))? {
        let mut entry = entry.map_err(|e| extract_err(e.to_string()))?;
        let path = entry.path().map_err(|e| extract_err(e.to_string()))?;
        if normalize(&path) == wanted {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| extract_err(e.to_string()))?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

fn matches_filter(path: &Path, filter: &str) -> bool {
    normalize(path).starts_with(normalize(Path::new(filter)))
}

/// Drop `.` components so `./rootfs/x` and `rootfs/x` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Build a gzip-compressed archive from `(path, contents)` pairs.
    pub(crate) fn create_test_archive(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        append_files(encoder, files).finish().unwrap();
    }

    fn append_files<W: Write>(writer: W, files: &[(&str, &[u8])]) -> W {
        let mut builder = tar::Builder::new(writer);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_extract_gzip_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("image.aci");
        create_test_archive(
            &archive,
            &[("manifest", b"{}"), ("rootfs/etc/hostname", b"box")],
        );

        let dest = dir.path().join("out");
        TarExtractor::new(false).extract(&archive, &dest, None).unwrap();
        assert_eq!(std::fs::read(dest.join("manifest")).unwrap(), b"{}");
        assert_eq!(
            std::fs::read_to_string(dest.join("rootfs/etc/hostname")).unwrap(),
            "box"
        );
    }

    #[test]
    fn test_extract_with_filter() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("image.aci");
        create_test_archive(
            &archive,
            &[("manifest", b"{}"), ("rootfs/bin/sh", b"#!"), ("rootfsx", b"no")],
        );

        let dest = dir.path().join("out");
        TarExtractor::new(false)
            .extract(&archive, &dest, Some("rootfs"))
            .unwrap();
        assert!(dest.join("rootfs/bin/sh").exists());
        assert!(!dest.join("manifest").exists());
        assert!(!dest.join("rootfsx").exists());
    }

    #[test]
    fn test_extract_plain_bzip2_and_xz() {
        let dir = TempDir::new().unwrap();
        let files: &[(&str, &[u8])] = &[("manifest", b"m")];

        let plain = dir.path().join("plain.tar");
        append_files(File::create(&plain).unwrap(), files);

        let bz = dir.path().join("image.tar.bz2");
        append_files(
            bzip2::write::BzEncoder::new(File::create(&bz).unwrap(), bzip2::Compression::default()),
            files,
        )
        .finish()
        .unwrap();

        let xz = dir.path().join("image.tar.xz");
        append_files(xz2::write::XzEncoder::new(File::create(&xz).unwrap(), 6), files)
            .finish()
            .unwrap();

        for archive in [plain, bz, xz] {
            assert_eq!(read_entry(&archive, "manifest").unwrap().unwrap(), b"m");
        }
    }

    #[test]
    fn test_read_entry_missing() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("image.aci");
        create_test_archive(&archive, &[("rootfs/a", b"a")]);
        assert!(read_entry(&archive, "manifest").unwrap().is_none());
    }

    #[test]
    fn test_extract_missing_archive_is_extract_error() {
        let dir = TempDir::new().unwrap();
        let err = TarExtractor::new(false)
            .extract(&dir.path().join("nope.aci"), &dir.path().join("out"), None)
            .unwrap_err();
        assert_eq!(err.kind(), acb_core::ErrorKind::Extract);
    }
}
