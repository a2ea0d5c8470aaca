//! Domain model types shared by the conflict subsystem, the session engine,
//! and the CLI.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::git::MergeStatus;

// ---------------------------------------------------------------------------
// Conflicted entries
// ---------------------------------------------------------------------------

/// One path with unresolved merge state in the working tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictedEntry {
    /// Repository-relative path, `/`-separated.
    pub path: String,
    /// The index path was not valid UTF-8 and `path` is a lossy rendering
    /// that cannot be looked up again.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub lossy_path: bool,
}

impl ConflictedEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lossy_path: false,
        }
    }

    /// Entry for a raw index path, flagged when it is not valid UTF-8.
    pub fn from_index_path(raw: &[u8]) -> Self {
        match std::str::from_utf8(raw) {
            Ok(path) => Self::new(path),
            Err(_) => Self {
                path: String::from_utf8_lossy(raw).into_owned(),
                lossy_path: true,
            },
        }
    }
}

impl std::fmt::Display for ConflictedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// Index conflict stage a file version occupies during an unresolved merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Common ancestor (stage 1).
    Ancestor = 1,
    /// Our side, the branch being merged into (stage 2).
    Local = 2,
    /// Their side, upstream (stage 3).
    Remote = 3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Ancestor, Stage::Local, Stage::Remote];

    /// The numeric stage as stored in the git index.
    pub fn index_stage(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ancestor => write!(f, "ancestor"),
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// The three variants of one conflicted entry.
///
/// `None` means the variant could not be recovered from history. An empty
/// vector is a present, zero-byte variant and is valid merge input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTriple {
    pub ancestor: Option<Vec<u8>>,
    pub local: Option<Vec<u8>>,
    pub remote: Option<Vec<u8>>,
}

impl VersionTriple {
    pub fn get(&self, stage: Stage) -> Option<&[u8]> {
        match stage {
            Stage::Ancestor => self.ancestor.as_deref(),
            Stage::Local => self.local.as_deref(),
            Stage::Remote => self.remote.as_deref(),
        }
    }

    pub fn set(&mut self, stage: Stage, content: Option<Vec<u8>>) {
        match stage {
            Stage::Ancestor => self.ancestor = content,
            Stage::Local => self.local = content,
            Stage::Remote => self.remote = content,
        }
    }

    /// Stages whose variant is absent.
    pub fn missing(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.get(*stage).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolution results
// ---------------------------------------------------------------------------

/// File-backed copies written to the recovery directory for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeArtifactSet {
    pub base: PathBuf,
    pub ours: PathBuf,
    pub theirs: PathBuf,
    pub merged: PathBuf,
    /// Pre-resolution working file, only written when it existed and was
    /// about to be overwritten.
    pub original: Option<PathBuf>,
}

/// Per-entry result of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Merged cleanly, working file replaced and staged.
    AutoResolved,
    /// Merge output still carries conflict markers.
    ManualRequired,
    /// Not attempted or aborted for the given reason.
    Skipped(String),
    /// The merge primitive itself failed to run.
    ToolFailure,
}

impl ResolutionOutcome {
    pub fn is_staged(&self) -> bool {
        matches!(self, Self::AutoResolved)
    }
}

impl std::fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoResolved => write!(f, "auto_resolved"),
            Self::ManualRequired => write!(f, "manual_required"),
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::ToolFailure => write!(f, "tool_failure"),
        }
    }
}

/// Outcome and artifacts of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResolution {
    pub entry: ConflictedEntry,
    #[serde(flatten)]
    pub outcome: ResolutionOutcome,
    pub artifacts: Option<MergeArtifactSet>,
}

/// Aggregate of one resolution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub entries: Vec<EntryResolution>,
    /// Paths staged for commit, in processing order.
    pub staged: Vec<String>,
    /// SHA of the commit recording the resolution, if one was made.
    pub commit: Option<String>,
}

impl ResolutionReport {
    fn count(&self, pred: impl Fn(&ResolutionOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn auto_resolved(&self) -> usize {
        self.count(|o| matches!(o, ResolutionOutcome::AutoResolved))
    }

    pub fn manual_required(&self) -> usize {
        self.count(|o| matches!(o, ResolutionOutcome::ManualRequired))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ResolutionOutcome::Skipped(_)))
    }

    pub fn tool_failures(&self) -> usize {
        self.count(|o| matches!(o, ResolutionOutcome::ToolFailure))
    }

    /// Whether any entry still needs a human.
    pub fn needs_manual_follow_up(&self) -> bool {
        self.entries.iter().any(|e| !e.outcome.is_staged())
    }
}

// ---------------------------------------------------------------------------
// Session summary
// ---------------------------------------------------------------------------

/// What one sync session did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub branch: String,
    pub merge: MergeStatus,
    pub resolution: Option<ResolutionReport>,
    pub built: bool,
    pub pushed: bool,
    pub started_at: DateTime<Local>,
    pub completed_at: Option<DateTime<Local>>,
}
