//! Recovery artifacts and staging of cleanly merged entries.
//!
//! For every entry with all three variants available, the recovery directory
//! receives `<name>.BASE`, `<name>.OURS`, `<name>.THEIRS` and `<name>.MERGED`
//! (plus `<name>.ORIGINAL` when the working file is replaced), under the
//! entry's relative parent directory so that equal basenames never collide.
//! Artifacts are left in place after the run.

use std::path::{Component, Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::conflict::classifier::{Classification, ConflictClassifier};
use crate::conflict::extractor::VersionExtractor;
use crate::conflict::invoker::{primitive_from_config, MergePrimitive};
use crate::conflict::MergeRepository;
use crate::errors::ResolveError;
use crate::models::{ConflictedEntry, EntryResolution, MergeArtifactSet, ResolutionOutcome};

/// Reason recorded when a variant could not be recovered.
pub const MISSING_VERSION: &str = "missing version";

/// Reason recorded for index paths that are not valid UTF-8.
pub const NON_UTF8_PATH: &str = "path is not valid UTF-8";

// ---------------------------------------------------------------------------
// Recovery directory
// ---------------------------------------------------------------------------

/// Root of the append-only recovery artifact tree.
#[derive(Debug, Clone)]
pub struct RecoveryDir {
    root: PathBuf,
}

impl RecoveryDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if needed.
    pub fn ensure(&self) -> Result<(), ResolveError> {
        std::fs::create_dir_all(&self.root).map_err(|source| ResolveError::Artifact {
            path: self.root.display().to_string(),
            source,
        })
    }

    /// Artifact paths for a repository-relative entry path.
    ///
    /// Rejects absolute paths and `..` components so artifacts always land
    /// inside the root.
    pub fn artifact_set(&self, entry_path: &str) -> Result<MergeArtifactSet, ResolveError> {
        Ok(MergeArtifactSet {
            base: self.artifact_path(entry_path, "BASE")?,
            ours: self.artifact_path(entry_path, "OURS")?,
            theirs: self.artifact_path(entry_path, "THEIRS")?,
            merged: self.artifact_path(entry_path, "MERGED")?,
            original: None,
        })
    }

    /// `<root>/<parent dirs>/<basename>.<role>` for one entry.
    pub fn artifact_path(&self, entry_path: &str, role: &str) -> Result<PathBuf, ResolveError> {
        let unsafe_path = || ResolveError::UnsafePath(entry_path.to_string());
        let mut dir = self.root.clone();
        let mut basename = None;
        for component in Path::new(entry_path).components() {
            match component {
                Component::Normal(part) => {
                    if let Some(prev) = basename.replace(part) {
                        dir.push(prev);
                    }
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(unsafe_path())
                }
            }
        }
        let basename = basename.ok_or_else(unsafe_path)?;
        Ok(dir.join(format!("{}.{}", basename.to_string_lossy(), role)))
    }
}

fn write_artifact(path: &Path, content: &[u8]) -> Result<(), ResolveError> {
    std::fs::write(path, content).map_err(|source| ResolveError::Artifact {
        path: path.display().to_string(),
        source,
    })
}

/// Put the working file back after a failed stage: the `.ORIGINAL` copy when
/// there was one, otherwise remove the file the merge created.
fn restore_working_file(working: &Path, original: Option<&Path>) {
    let result = match original {
        Some(original) => std::fs::copy(original, working).map(|_| ()),
        None => std::fs::remove_file(working),
    };
    match result {
        Ok(()) => warn!(path = %working.display(), "staging failed, working file restored"),
        Err(e) => error!(
            path = %working.display(),
            original = ?original.map(Path::display),
            error = %e,
            "staging failed and the working file could not be restored"
        ),
    }
}

// ---------------------------------------------------------------------------
// Staging manager
// ---------------------------------------------------------------------------

/// Runs extraction, merge and classification for one entry and applies the
/// result to the working tree.
pub struct StagingManager {
    recovery: RecoveryDir,
    extractor: VersionExtractor,
    primitive: Box<dyn MergePrimitive>,
    classifier: ConflictClassifier,
}

impl StagingManager {
    pub fn new(
        recovery: RecoveryDir,
        primitive: Box<dyn MergePrimitive>,
        classifier: ConflictClassifier,
    ) -> Self {
        Self {
            recovery,
            extractor: VersionExtractor::new(),
            primitive,
            classifier,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            RecoveryDir::new(&config.session.recovery_dir),
            primitive_from_config(&config.merge),
            ConflictClassifier::new(&config.merge.conflict_marker),
        )
    }

    pub fn recovery_dir(&self) -> &RecoveryDir {
        &self.recovery
    }

    /// Resolve one entry. Never fails: any error inside the entry is logged
    /// and recorded as a skipped outcome so the remaining entries still run.
    pub fn resolve_entry<R: MergeRepository + ?Sized>(
        &self,
        repo: &mut R,
        entry: &ConflictedEntry,
    ) -> EntryResolution {
        match self.try_resolve(repo, entry) {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(path = %entry.path, error = %e, "entry resolution aborted");
                EntryResolution {
                    entry: entry.clone(),
                    outcome: ResolutionOutcome::Skipped(format!("error: {}", e)),
                    artifacts: None,
                }
            }
        }
    }

    fn try_resolve<R: MergeRepository + ?Sized>(
        &self,
        repo: &mut R,
        entry: &ConflictedEntry,
    ) -> Result<EntryResolution, ResolveError> {
        if entry.lossy_path {
            warn!(path = %entry.path, "cannot resolve entry, path is not valid UTF-8");
            return Ok(EntryResolution {
                entry: entry.clone(),
                outcome: ResolutionOutcome::Skipped(NON_UTF8_PATH.into()),
                artifacts: None,
            });
        }

        self.recovery.ensure()?;
        let mut artifacts = self.recovery.artifact_set(&entry.path)?;
        let done = |outcome: ResolutionOutcome, artifacts: Option<MergeArtifactSet>| EntryResolution {
            entry: entry.clone(),
            outcome,
            artifacts,
        };

        let triple = self.extractor.extract(&*repo, entry);
        let (Some(base), Some(ours), Some(theirs)) = (&triple.ancestor, &triple.local, &triple.remote)
        else {
            let missing: Vec<String> = triple.missing().iter().map(|s| s.to_string()).collect();
            warn!(path = %entry.path, missing = %missing.join(","), "cannot auto-merge, version missing");
            return Ok(done(ResolutionOutcome::Skipped(MISSING_VERSION.into()), None));
        };

        if let Some(parent) = artifacts.merged.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ResolveError::Artifact {
                path: parent.display().to_string(),
                source,
            })?;
        }
        write_artifact(&artifacts.base, base)?;
        write_artifact(&artifacts.ours, ours)?;
        write_artifact(&artifacts.theirs, theirs)?;

        let invocation = self.primitive.merge(
            &artifacts.ours,
            &artifacts.base,
            &artifacts.theirs,
            &artifacts.merged,
        )?;

        match self.classifier.classify(&invocation)? {
            Classification::ToolFailure => {
                error!(path = %entry.path, tool = self.primitive.name(), "merge tool failed");
                Ok(done(ResolutionOutcome::ToolFailure, Some(artifacts)))
            }
            Classification::ManualRequired => {
                warn!(
                    path = %entry.path,
                    conflicts = ?invocation.conflicts,
                    merged = %artifacts.merged.display(),
                    "conflict markers remain, manual resolution required"
                );
                Ok(done(ResolutionOutcome::ManualRequired, Some(artifacts)))
            }
            Classification::AutoResolved => {
                let working = repo.workdir().join(&entry.path);
                if working.is_file() {
                    let original = self.recovery.artifact_path(&entry.path, "ORIGINAL")?;
                    std::fs::copy(&working, &original).map_err(|source| {
                        ResolveError::Artifact {
                            path: original.display().to_string(),
                            source,
                        }
                    })?;
                    artifacts.original = Some(original);
                } else if let Some(parent) = working.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&artifacts.merged, &working)?;
                if let Err(e) = repo.stage_path(&entry.path) {
                    restore_working_file(&working, artifacts.original.as_deref());
                    return Err(e.into());
                }
                info!(path = %entry.path, status = "success", "auto-resolved and staged");
                Ok(done(ResolutionOutcome::AutoResolved, Some(artifacts)))
            }
        }
    }
}
