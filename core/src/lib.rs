//! acb core - foundational types shared by the build engine and the CLI.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::{host_arch, host_os, BuildConfig, CONTEXT_DIR_NAME};
pub use error::{BuildError, ErrorKind, Result, EXIT_FAILURE, EXIT_LOCKED};

/// acb version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
