//! Running a command inside a composed root filesystem with systemd-nspawn.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use acb_core::error::{BuildError, Result};

use crate::aci::EnvironmentVariable;

/// Directories searched inside the root for a relative command.
pub const PATH_LIST: [&str; 6] = [
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

const NSPAWN: &str = "systemd-nspawn";

/// Resolve `cmd` against [`PATH_LIST`] inside `root`.
///
/// Absolute commands are returned unchanged. The result is a path as seen
/// from inside the container.
pub fn find_in_root(cmd: &str, root: &Path) -> Result<String> {
    if cmd.starts_with('/') {
        return Ok(cmd.to_string());
    }
    for dir in PATH_LIST {
        let inside = format!("{dir}/{cmd}");
        let on_host = root.join(inside.trim_start_matches('/'));
        match std::fs::symlink_metadata(&on_host) {
            Ok(_) => return Ok(inside),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(BuildError::Execution(format!(
        "{cmd} not found in any of: {}",
        PATH_LIST.join(", ")
    )))
}

/// Copy the file `/etc/localtime` points at into `rootfs` at the same path.
///
/// Nothing happens when the host has no `/etc/localtime`.
pub fn mirror_localtime(rootfs: &Path) -> Result<()> {
    mirror_zone_file(Path::new("/etc/localtime"), rootfs)
}

fn mirror_zone_file(localtime: &Path, rootfs: &Path) -> Result<()> {
    let zone = match std::fs::canonicalize(localtime) {
        Ok(zone) => zone,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let dest = rootfs.join(zone.strip_prefix("/").unwrap_or(&zone));
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::symlink_metadata(&dest).is_ok_and(|m| m.file_type().is_symlink()) {
        std::fs::remove_file(&dest)?;
    }
    std::fs::copy(&zone, &dest)?;
    tracing::debug!(zone = %zone.display(), "Mirrored host zone info");
    Ok(())
}

/// A `systemd-nspawn` invocation.
#[derive(Debug, Clone)]
pub struct NspawnCommand {
    root: PathBuf,
    quiet: bool,
    environment: Vec<EnvironmentVariable>,
    command: Vec<String>,
}

impl NspawnCommand {
    /// `command[0]` must already be resolved inside `root`.
    pub fn new(root: impl Into<PathBuf>, command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(BuildError::validation("command to run not set"));
        }
        Ok(Self {
            root: root.into(),
            quiet: false,
            environment: Vec::new(),
            command,
        })
    }

    /// Pass `--quiet --register=no` (systemd 209 and later).
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn environment(mut self, environment: &[EnvironmentVariable]) -> Self {
        self.environment = environment.to_vec();
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-D".to_string(), self.root.display().to_string()];
        if self.quiet {
            args.push("--quiet".to_string());
            args.push("--register=no".to_string());
        }
        for var in &self.environment {
            args.push("--setenv".to_string());
            args.push(format!("{}={}", var.name, var.value));
        }
        args.extend(self.command.iter().cloned());
        args
    }

    /// Run with inherited stdio. A nonzero exit becomes `ChildExited`.
    pub async fn run(&self) -> Result<()> {
        let args = self.args();
        tracing::debug!(program = NSPAWN, args = ?args, "Launching container");

        let status = tokio::process::Command::new(NSPAWN)
            .args(&args)
            .env("SYSTEMD_LOG_LEVEL", "err")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BuildError::Execution(format!("{NSPAWN} is required but not found"))
                } else {
                    BuildError::Execution(format!("failed to start {NSPAWN}: {e}"))
                }
            })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(BuildError::ChildExited { code }),
            None => Err(BuildError::ChildExited {
                code: 128 + status.signal().unwrap_or(0),
            }),
        }
    }
}
