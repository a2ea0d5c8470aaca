//! Error types for the portsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`SessionError`] wraps the ones that can abort a sync session.

use thiserror::Error;

use crate::models::Stage;

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// The repository is bare and has no working tree to resolve in.
    #[error("git repository at '{0}' has no working tree")]
    BareRepository(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The entry has no index entry at the requested conflict stage.
    ///
    /// This is a normal condition for add/add and modify/delete conflicts.
    #[error("'{path}' has no {stage} version in the index")]
    NotFoundAtStage { path: String, stage: Stage },

    /// The dated branch already exists.
    #[error("git branch '{0}' already exists")]
    BranchExists(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Whether this error only says a conflict stage is empty.
    pub fn is_not_found_at_stage(&self) -> bool {
        matches!(self, Self::NotFoundAtStage { .. })
    }
}

// ---------------------------------------------------------------------------
// Conflict resolution errors
// ---------------------------------------------------------------------------

/// Errors from the conflict resolution subsystem.
///
/// Inside a single entry these are caught and turned into a skipped outcome;
/// only enumeration and commit failures escape the resolution driver.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The entry path cannot be mapped into the recovery directory.
    #[error("unsafe entry path '{0}'")]
    UnsafePath(String),

    /// Writing or reading a recovery artifact failed.
    #[error("recovery artifact error at '{path}': {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying repository error.
    #[error("resolution git error: {0}")]
    Git(#[from] GitError),

    /// Generic I/O wrapper.
    #[error("resolution I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Build harness errors
// ---------------------------------------------------------------------------

/// Errors from the poudriere build-verification harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The harness binary was not found on `$PATH`.
    #[error("build harness binary not found: {0}")]
    BinaryNotFound(String),

    /// A harness step exited with a non-zero status.
    #[error("build harness step '{step}' failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    /// Generic I/O wrapper.
    #[error("build harness I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Preflight errors
// ---------------------------------------------------------------------------

/// A required external tool is unavailable.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("required tool '{tool}' is not available: {detail}")]
    ToolMissing { tool: String, detail: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Fatal errors that abort a sync session.
///
/// Steps already completed (a created branch, a checkpoint commit) are left
/// in place.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("preflight failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("working tree at '{0}' has uncommitted changes")]
    DirtyWorkingTree(String),

    #[error("session git error: {0}")]
    Git(#[from] GitError),

    #[error("session resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("build verification failed: {0}")]
    Harness(#[from] HarnessError),
}
