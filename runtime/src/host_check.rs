//! Host capability checks needed before composing or running a rootfs.
//!
//! - overlayfs: listed in `/proc/filesystems`, loading the module if needed
//! - privilege: effective uid 0
//! - systemd version: from `systemctl --version`

use std::path::Path;
use std::process::{Command, Stdio};

use acb_core::error::{BuildError, Result};

const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// First systemd release whose nspawn understands `--quiet --register=no`.
pub const NSPAWN_QUIET_MIN_VERSION: u32 = 209;

/// Whether a `/proc/filesystems` listing includes overlayfs.
pub fn overlay_listed(filesystems: &str) -> bool {
    filesystems.lines().any(|line| line == "nodev\toverlay")
}

fn overlay_available(proc_filesystems: &Path) -> bool {
    std::fs::read_to_string(proc_filesystems)
        .map(|contents| overlay_listed(&contents))
        .unwrap_or(false)
}

/// Ensure overlayfs can be mounted, trying `modprobe overlay` once.
pub fn ensure_overlay_support() -> Result<()> {
    let proc_filesystems = Path::new(PROC_FILESYSTEMS);
    if overlay_available(proc_filesystems) {
        return Ok(());
    }

    tracing::debug!("overlay not listed in /proc/filesystems, loading module");
    let status = Command::new("modprobe")
        .arg("overlay")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = &status {
        tracing::debug!(error = %e, "Failed to run modprobe");
    }

    if overlay_available(proc_filesystems) {
        Ok(())
    } else {
        Err(BuildError::UnsupportedFilesystem(
            "overlayfs support required for using run with dependencies".to_string(),
        ))
    }
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Fail with `PrivilegeRequired` unless running as root.
pub fn require_root(operation: &str) -> Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(BuildError::PrivilegeRequired(operation.to_string()))
    }
}

/// Version of the host systemd.
pub fn systemd_version() -> Result<u32> {
    let output = Command::new("systemctl")
        .arg("--version")
        .stderr(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::Execution("system does not have systemd".to_string())
            } else {
                BuildError::Execution(format!("failed to run systemctl: {e}"))
            }
        })?;

    parse_systemd_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        BuildError::Execution("error parsing output from `systemctl --version`".to_string())
    })
}

/// Parse the `systemd <N>` line of `systemctl --version`.
pub fn parse_systemd_version(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix("systemd ")?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}
