//! Decides whether a merge artifact is clean, still conflicted, or unusable.

use tracing::debug;

use crate::conflict::invoker::MergeInvocation;
use crate::errors::ResolveError;

/// Default conflict-start sentinel.
pub const DEFAULT_SENTINEL: &str = "<<<<<<<";

/// Verdict for one merge artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    AutoResolved,
    ManualRequired,
    ToolFailure,
}

/// Scans merge output for the conflict sentinel.
///
/// The artifact content is authoritative: output carrying the sentinel is
/// `ManualRequired` even when the primitive reported a clean exit.
#[derive(Debug, Clone)]
pub struct ConflictClassifier {
    sentinel: Vec<u8>,
}

impl Default for ConflictClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL)
    }
}

impl ConflictClassifier {
    pub fn new(sentinel: &str) -> Self {
        Self {
            sentinel: sentinel.as_bytes().to_vec(),
        }
    }

    pub fn classify(&self, invocation: &MergeInvocation) -> Result<Classification, ResolveError> {
        if !invocation.success {
            return Ok(Classification::ToolFailure);
        }
        let content =
            std::fs::read(&invocation.destination).map_err(|source| ResolveError::Artifact {
                path: invocation.destination.display().to_string(),
                source,
            })?;
        Ok(self.classify_bytes(&content))
    }

    pub fn classify_bytes(&self, content: &[u8]) -> Classification {
        if self.has_sentinel(content) {
            debug!(regions = self.count_regions(content), "conflict markers present");
            Classification::ManualRequired
        } else {
            Classification::AutoResolved
        }
    }

    fn has_sentinel(&self, content: &[u8]) -> bool {
        !self.sentinel.is_empty()
            && content
                .windows(self.sentinel.len())
                .any(|w| w == self.sentinel.as_slice())
    }

    /// Number of lines starting with the sentinel.
    pub fn count_regions(&self, content: &[u8]) -> usize {
        count_marker_lines(content, &self.sentinel)
    }
}

/// Count lines of `content` that begin with `marker`.
pub fn count_marker_lines(content: &[u8], marker: &[u8]) -> usize {
    if marker.is_empty() {
        return 0;
    }
    content
        .split(|b| *b == b'\n')
        .filter(|line| line.starts_with(marker))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invocation(dir: &std::path::Path, content: &str, success: bool) -> MergeInvocation {
        let destination: PathBuf = dir.join("x.MERGED");
        std::fs::write(&destination, content).unwrap();
        MergeInvocation {
            success,
            destination,
            conflicts: Some(0),
        }
    }

    #[test]
    fn test_clean_output() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path(), "PORTNAME=foo\nPORTVERSION=1.2\n", true);
        assert_eq!(
            ConflictClassifier::default().classify(&inv).unwrap(),
            Classification::AutoResolved
        );
    }

    #[test]
    fn test_markers_win_over_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(
            dir.path(),
            "a\n<<<<<<< ours\nb\n=======\nc\n>>>>>>> theirs\n",
            true,
        );
        assert_eq!(
            ConflictClassifier::default().classify(&inv).unwrap(),
            Classification::ManualRequired
        );
    }

    #[test]
    fn test_failure_does_not_read_artifact() {
        let inv = MergeInvocation {
            success: false,
            destination: PathBuf::from("/nonexistent/x.MERGED"),
            conflicts: None,
        };
        assert_eq!(
            ConflictClassifier::default().classify(&inv).unwrap(),
            Classification::ToolFailure
        );
    }

    #[test]
    fn test_missing_artifact_is_error() {
        let inv = MergeInvocation {
            success: true,
            destination: PathBuf::from("/nonexistent/x.MERGED"),
            conflicts: Some(0),
        };
        assert!(matches!(
            ConflictClassifier::default().classify(&inv),
            Err(ResolveError::Artifact { .. })
        ));
    }

    #[test]
    fn test_custom_sentinel_and_region_count() {
        let classifier = ConflictClassifier::new("<<<<<<<<<<");
        assert_eq!(
            classifier.classify_bytes(b"<<<<<<< seven only\n"),
            Classification::AutoResolved
        );
        let content = b"<<<<<<<<<< a\nx\n<<<<<<<<<< b\n  <<<<<<<<<< indented\n";
        assert_eq!(classifier.classify_bytes(content), Classification::ManualRequired);
        assert_eq!(classifier.count_regions(content), 2);
    }
}
