use std::path::PathBuf;

use thiserror::Error;

/// Process exit code for generic and validation failures.
pub const EXIT_FAILURE: i32 = 1;

/// Process exit code when a build is locked or already in progress.
pub const EXIT_LOCKED: i32 = 2;

/// Build engine error types
#[derive(Error, Debug)]
pub enum BuildError {
    /// Malformed identifier, name, label or argument. Raised before any I/O.
    #[error("{0}")]
    Validation(String),

    /// A build already exists in the context directory
    #[error("build already in progress in {}", .path.display())]
    AlreadyInProgress { path: PathBuf },

    /// Another operation holds the build context lock
    #[error("build context is locked by another operation{}", holder_suffix(.holder))]
    LockHeld { path: PathBuf, holder: Option<u32> },

    /// Remove/delete target absent
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// Name resolution of the discovery host failed
    #[error("unknown host when fetching image, check your connection and local file paths must start with '/' or '.' ({host})")]
    NoHost { host: String },

    /// Discovery ran but produced no usable endpoint
    #[error("discovery failed for {name}: {message}")]
    Discovery { name: String, message: String },

    /// Download failed
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Overlay filesystem support is not available
    #[error("unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    /// Archive malformed or extraction not permitted
    #[error("failed to extract {}: {message}", .path.display())]
    Extract { path: PathBuf, message: String },

    /// Launch tool missing or failed to start
    #[error("execution error: {0}")]
    Execution(String),

    /// Child process exited unsuccessfully
    #[error("command exited with status {code}")]
    ChildExited { code: i32 },

    /// Operation requires root
    #[error("{0} must be run as root")]
    PrivilegeRequired(String),

    /// Dependency graph contains a cycle
    #[error("dependency cycle detected: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    /// Detached signature generation failed
    #[error("signing failed: {0}")]
    Sign(String),

    /// Upload collaborator failed
    #[error("upload failed: {0}")]
    Upload(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn holder_suffix(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!(" (pid {pid})"),
        None => String::new(),
    }
}

/// Fieldless discriminant of [`BuildError`] for branching on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    AlreadyInProgress,
    LockHeld,
    NotFound,
    NoHost,
    Discovery,
    Network,
    UnsupportedFilesystem,
    Extract,
    Execution,
    PrivilegeRequired,
    DependencyCycle,
    Sign,
    Upload,
    Io,
    Serialization,
}

impl BuildError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        BuildError::Validation(message.into())
    }

    /// Shorthand for a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        BuildError::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Validation(_) => ErrorKind::Validation,
            BuildError::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            BuildError::LockHeld { .. } => ErrorKind::LockHeld,
            BuildError::NotFound { .. } => ErrorKind::NotFound,
            BuildError::NoHost { .. } => ErrorKind::NoHost,
            BuildError::Discovery { .. } => ErrorKind::Discovery,
            BuildError::Network { .. } => ErrorKind::Network,
            BuildError::UnsupportedFilesystem(_) => ErrorKind::UnsupportedFilesystem,
            BuildError::Extract { .. } => ErrorKind::Extract,
            BuildError::Execution(_) | BuildError::ChildExited { .. } => ErrorKind::Execution,
            BuildError::PrivilegeRequired(_) => ErrorKind::PrivilegeRequired,
            BuildError::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            BuildError::Sign(_) => ErrorKind::Sign,
            BuildError::Upload(_) => ErrorKind::Upload,
            BuildError::Io(_) => ErrorKind::Io,
            BuildError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Process exit code for this error.
    ///
    /// Lock and in-progress conflicts share one code so scripts can retry on
    /// it; a failing child passes its own status through.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::AlreadyInProgress { .. } | BuildError::LockHeld { .. } => EXIT_LOCKED,
            BuildError::ChildExited { code } if *code != 0 => *code,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::Serialization(err.to_string())
    }
}

/// Result type alias for build engine operations
pub type Result<T> = std::result::Result<T, BuildError>;
