//! Three-way conflict resolution for an in-progress upstream merge.
//!
//! The subsystem runs leaf-first, once per conflicted entry:
//! 1. **Extraction** -- recover ancestor/local/remote from the index stages.
//! 2. **Merging** -- run the configured merge primitive into a recovery artifact.
//! 3. **Classification** -- clean output, residual markers, or tool failure.
//! 4. **Staging** -- persist artifacts, replace and stage cleanly merged files.
//!
//! The [`ResolutionDriver`] sequences entries and decides whether to commit.

use std::path::Path;

use crate::errors::GitError;
use crate::models::{ConflictedEntry, Stage};

pub mod classifier;
pub mod driver;
pub mod extractor;
pub mod invoker;
pub mod staging;

pub use classifier::{Classification, ConflictClassifier};
pub use driver::{ResolutionDriver, ResolutionState};
pub use extractor::VersionExtractor;
pub use invoker::{primitive_from_config, BuiltinMerge, GitMergeFile, MergeInvocation, MergePrimitive};
pub use staging::{RecoveryDir, StagingManager};

/// Repository operations the resolution subsystem needs.
///
/// Implemented by [`crate::git::GitClient`] over a real repository and by
/// in-memory fakes in tests.
pub trait MergeRepository {
    /// Root of the working tree; entry paths are relative to it.
    fn workdir(&self) -> &Path;

    /// Paths with unmerged index entries, sorted and deduplicated.
    fn conflicted_entries(&self) -> Result<Vec<ConflictedEntry>, GitError>;

    /// Blob content of `path` at a conflict stage.
    ///
    /// Returns [`GitError::NotFoundAtStage`] when the stage is empty, which is
    /// expected for add/add and modify/delete conflicts.
    fn stage_content(&self, path: &str, stage: Stage) -> Result<Vec<u8>, GitError>;

    /// Stage the working-tree content of `path`, clearing its conflict.
    fn stage_path(&mut self, path: &str) -> Result<(), GitError>;

    /// Commit what is staged and return the new commit SHA.
    fn commit_resolution(&mut self, message: &str) -> Result<String, GitError>;
}
