//! Recovers the three variants of a conflicted entry from the index stages.

use tracing::{debug, warn};

use crate::conflict::MergeRepository;
use crate::models::{ConflictedEntry, Stage, VersionTriple};

/// Read-only lookup of ancestor, local and remote content.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionExtractor;

impl VersionExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Fetch each stage independently. A failed lookup leaves that variant
    /// absent and never prevents the other two from being read.
    pub fn extract<R: MergeRepository + ?Sized>(
        &self,
        repo: &R,
        entry: &ConflictedEntry,
    ) -> VersionTriple {
        let mut triple = VersionTriple::default();
        for stage in Stage::ALL {
            match repo.stage_content(&entry.path, stage) {
                Ok(content) => {
                    debug!(path = %entry.path, %stage, bytes = content.len(), "extracted version");
                    triple.set(stage, Some(content));
                }
                Err(e) if e.is_not_found_at_stage() => {
                    debug!(path = %entry.path, %stage, "no version at stage");
                }
                Err(e) => {
                    warn!(path = %entry.path, %stage, error = %e, "version lookup failed, treating as absent");
                }
            }
        }
        triple
    }
}
