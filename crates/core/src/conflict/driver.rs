//! Sequences per-entry resolution and decides whether to commit.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::conflict::staging::StagingManager;
use crate::conflict::MergeRepository;
use crate::errors::ResolveError;
use crate::models::{ResolutionOutcome, ResolutionReport};

/// Phases of one resolution run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    MergeAttempted,
    ConflictsDetected,
    PerEntryResolution,
    CommitIfAnyStaged,
    NoOpNoneStaged,
}

impl std::fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MergeAttempted => write!(f, "merge_attempted"),
            Self::ConflictsDetected => write!(f, "conflicts_detected"),
            Self::PerEntryResolution => write!(f, "per_entry_resolution"),
            Self::CommitIfAnyStaged => write!(f, "commit_if_any_staged"),
            Self::NoOpNoneStaged => write!(f, "no_op_none_staged"),
        }
    }
}

/// Runs the staging manager over every conflicted entry, once each, in path
/// order, and commits if anything was staged.
pub struct ResolutionDriver {
    manager: StagingManager,
    state: ResolutionState,
}

impl ResolutionDriver {
    pub fn new(manager: StagingManager) -> Self {
        Self {
            manager,
            state: ResolutionState::MergeAttempted,
        }
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    fn set_state(&mut self, new_state: ResolutionState) {
        info!(from = %self.state, to = %new_state, "state transition");
        self.state = new_state;
    }

    /// Resolve all conflicted entries of `repo`.
    ///
    /// Only failing to list entries or to commit is an error; per-entry
    /// problems are reported in the returned [`ResolutionReport`].
    pub fn run<R: MergeRepository + ?Sized>(
        &mut self,
        repo: &mut R,
    ) -> Result<ResolutionReport, ResolveError> {
        self.state = ResolutionState::MergeAttempted;
        let entries = repo.conflicted_entries()?;
        let mut report = ResolutionReport::default();

        if entries.is_empty() {
            info!("no conflicted entries");
            self.set_state(ResolutionState::NoOpNoneStaged);
            return Ok(report);
        }

        self.set_state(ResolutionState::ConflictsDetected);
        info!(count = entries.len(), "conflicted entries detected");

        self.set_state(ResolutionState::PerEntryResolution);
        for entry in &entries {
            let resolution = self.manager.resolve_entry(repo, entry);
            info!(path = %entry.path, outcome = %resolution.outcome, "entry processed");
            if resolution.outcome == ResolutionOutcome::AutoResolved {
                report.staged.push(entry.path.clone());
            }
            report.entries.push(resolution);
        }

        if report.staged.is_empty() {
            self.set_state(ResolutionState::NoOpNoneStaged);
            warn!(
                manual = report.manual_required(),
                skipped = report.skipped(),
                tool_failures = report.tool_failures(),
                recovery_dir = %self.manager.recovery_dir().root().display(),
                "nothing auto-resolved, manual resolution required"
            );
            return Ok(report);
        }

        self.set_state(ResolutionState::CommitIfAnyStaged);
        let sha = repo.commit_resolution(&commit_message(&report))?;
        info!(
            sha = %sha,
            staged = report.staged.len(),
            status = "success",
            "committed auto-resolved entries"
        );
        report.commit = Some(sha);

        if report.needs_manual_follow_up() {
            warn!(
                remaining = report.entries.len() - report.staged.len(),
                recovery_dir = %self.manager.recovery_dir().root().display(),
                "some entries still need manual resolution"
            );
        }
        Ok(report)
    }
}

fn commit_message(report: &ResolutionReport) -> String {
    let mut message = format!(
        "Resolve upstream merge conflicts ({} of {} auto-resolved)\n\n",
        report.staged.len(),
        report.entries.len()
    );
    for entry in &report.entries {
        message.push_str(&format!("  {}: {}\n", entry.entry.path, entry.outcome));
    }
    message
}
