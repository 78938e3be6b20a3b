//! Detached signatures for written images.

use std::path::{Path, PathBuf};
use std::process::Command;

use acb_core::error::{BuildError, Result};

/// Produces a detached signature next to a file.
pub trait Signer: Send + Sync {
    /// Sign `file` and return the path of the signature.
    fn sign(&self, file: &Path) -> Result<PathBuf>;
}

/// [`Signer`] that shells out to `gpg --detach-sig`.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    program: String,
    flags: Vec<String>,
}

impl Default for GpgSigner {
    fn default() -> Self {
        Self::new(vec!["--armor".to_string(), "--yes".to_string()])
    }
}

impl GpgSigner {
    /// Signer passing `flags` to gpg ahead of the output arguments.
    pub fn new(flags: Vec<String>) -> Self {
        Self {
            program: "gpg".to_string(),
            flags,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn signature_path(file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_os_string();
        name.push(".asc");
        PathBuf::from(name)
    }

    fn args(&self, file: &Path, signature: &Path) -> Vec<String> {
        let mut args = self.flags.clone();
        args.push("--output".to_string());
        args.push(signature.display().to_string());
        args.push("--detach-sig".to_string());
        args.push(file.display().to_string());
        args
    }
}

impl Signer for GpgSigner {
    fn sign(&self, file: &Path) -> Result<PathBuf> {
        let signature = Self::signature_path(file);
        let output = Command::new(&self.program)
            .args(self.args(file, &signature))
            .output()
            .map_err(|e| BuildError::Sign(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Sign(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(file = %file.display(), signature = %signature.display(), "Signed image");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Signer running `body` through `sh` in place of gpg.
    fn fake_gpg(dir: &Path, body: &str) -> GpgSigner {
        let script = dir.join("fake-gpg.sh");
        std::fs::write(&script, format!("{body}\n")).unwrap();
        GpgSigner::new(vec![script.display().to_string()]).with_program("sh")
    }

    #[test]
    fn test_default_args() {
        let signer = GpgSigner::default();
        let args = signer.args(Path::new("/out/app.aci"), Path::new("/out/app.aci.asc"));
        assert_eq!(
            args,
            vec!["--armor", "--yes", "--output", "/out/app.aci.asc", "--detach-sig", "/out/app.aci"]
        );
    }

    #[test]
    fn test_sign_writes_signature() {
        let tmp = TempDir::new().unwrap();
        let signer = fake_gpg(
            tmp.path(),
            r#"while [ $# -gt 0 ]; do if [ "$1" = "--output" ]; then out="$2"; fi; shift; done; echo sig > "$out""#,
        );
        let file = tmp.path().join("app.aci");
        std::fs::write(&file, "aci").unwrap();

        let signature = signer.sign(&file).unwrap();
        assert_eq!(signature, tmp.path().join("app.aci.asc"));
        assert_eq!(std::fs::read_to_string(signature).unwrap(), "sig\n");
    }

    #[test]
    fn test_sign_failure_is_sign_error() {
        let tmp = TempDir::new().unwrap();
        let signer = fake_gpg(tmp.path(), "echo 'no secret key' >&2; exit 2");
        let file = tmp.path().join("app.aci");
        std::fs::write(&file, "aci").unwrap();

        let err = signer.sign(&file).unwrap_err();
        assert_eq!(err.kind(), acb_core::ErrorKind::Sign);
        assert!(err.to_string().contains("no secret key"));
    }
}
