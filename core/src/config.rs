use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the build context directory inside the working directory.
pub const CONTEXT_DIR_NAME: &str = ".acbuild";

/// Per-invocation configuration, constructed once and passed to every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Working directory the build context lives in
    pub work_dir: PathBuf,

    /// Build context root (defaults to `<work_dir>/.acbuild`)
    pub context_dir: PathBuf,

    /// Dependency store root (defaults to `<context_dir>/deps`)
    pub store_dir: PathBuf,

    /// Allow plain HTTP discovery and skip TLS verification
    pub insecure: bool,

    /// Verbose operator output
    pub debug: bool,

    /// Allow `write` to replace an existing output file
    pub overwrite: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::for_work_dir(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

impl BuildConfig {
    /// Configuration rooted at the given working directory.
    pub fn for_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let context_dir = work_dir.join(CONTEXT_DIR_NAME);
        let store_dir = context_dir.join("deps");
        Self {
            work_dir,
            context_dir,
            store_dir,
            insecure: false,
            debug: false,
            overwrite: false,
        }
    }

    /// Place the dependency store somewhere other than the context directory.
    pub fn with_store_dir(mut self, store_dir: impl AsRef<Path>) -> Self {
        self.store_dir = store_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Host operating system in appc label spelling.
pub fn host_os() -> &'static str {
    std::env::consts::OS
}

/// Host architecture in appc label spelling.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "i386",
        "arm" => "armv7l",
        "powerpc64" => "ppc64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_work_dir_derives_paths() {
        let config = BuildConfig::for_work_dir("/work");
        assert_eq!(config.context_dir, PathBuf::from("/work/.acbuild"));
        assert_eq!(config.store_dir, PathBuf::from("/work/.acbuild/deps"));
        assert!(!config.insecure);
        assert!(!config.overwrite);
    }

    #[test]
    fn test_builder_flags() {
        let config = BuildConfig::for_work_dir("/work")
            .with_insecure(true)
            .with_debug(true)
            .with_overwrite(true)
            .with_store_dir("/var/cache/acb");
        assert!(config.insecure);
        assert!(config.debug);
        assert!(config.overwrite);
        assert_eq!(config.store_dir, PathBuf::from("/var/cache/acb"));
        assert_eq!(config.context_dir, PathBuf::from("/work/.acbuild"));
    }

    #[test]
    fn test_host_arch_uses_appc_spelling() {
        let arch = host_arch();
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
        assert!(!arch.is_empty());
    }
}
