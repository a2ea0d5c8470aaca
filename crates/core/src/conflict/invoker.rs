//! Three-way merge primitives.
//!
//! All primitives follow the `merge(local, ancestor, remote) -> merged`
//! convention and write their output to a destination artifact. Conflict
//! markers in the output are the normal non-error path; only a primitive that
//! could not run or crashed reports `success: false`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error, info, warn};

use crate::config::{MergeConfig, MergeFavor, MergeTool};
use crate::conflict::classifier::count_marker_lines;
use crate::errors::ResolveError;

/// Marker used by the built-in primitive, which cannot be reconfigured.
const BUILTIN_MARKER: &[u8] = b"<<<<<<<";

/// Highest exit status `git merge-file` uses to report a conflict count.
const MAX_CONFLICT_STATUS: i32 = 127;

/// What a merge primitive reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInvocation {
    /// The primitive ran to completion. Conflicts do not make this false.
    pub success: bool,
    /// Where the merged output was written.
    pub destination: PathBuf,
    /// Conflicted hunks as reported by the primitive, when it reports them.
    pub conflicts: Option<u32>,
}

impl MergeInvocation {
    fn failed(destination: &Path) -> Self {
        Self {
            success: false,
            destination: destination.to_path_buf(),
            conflicts: None,
        }
    }
}

/// A three-way merge implementation.
pub trait MergePrimitive {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Merge the three input files into `destination`.
    ///
    /// `Err` is reserved for I/O failures around the primitive; a primitive
    /// that fails to run reports `success: false` instead.
    fn merge(
        &self,
        local: &Path,
        ancestor: &Path,
        remote: &Path,
        destination: &Path,
    ) -> Result<MergeInvocation, ResolveError>;
}

/// Build the primitive selected by `merge.tool`.
pub fn primitive_from_config(config: &MergeConfig) -> Box<dyn MergePrimitive> {
    match config.tool {
        MergeTool::GitMergeFile => Box::new(GitMergeFile::from_config(config)),
        MergeTool::Builtin => Box::new(BuiltinMerge::new()),
    }
}

fn write_artifact(path: &Path, chunks: &[&[u8]]) -> Result<(), ResolveError> {
    let artifact_err = |source| ResolveError::Artifact {
        path: path.display().to_string(),
        source,
    };
    let mut file = std::fs::File::create(path).map_err(artifact_err)?;
    for chunk in chunks {
        file.write_all(chunk).map_err(artifact_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// git merge-file
// ---------------------------------------------------------------------------

/// Runs `git merge-file -p` as a subprocess.
#[derive(Debug, Clone)]
pub struct GitMergeFile {
    binary: PathBuf,
    favor: MergeFavor,
    labels: bool,
}

impl GitMergeFile {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            favor: MergeFavor::None,
            labels: true,
        }
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            binary: config.git_binary.clone(),
            favor: config.favor,
            labels: config.labels,
        }
    }

    pub fn with_favor(mut self, favor: MergeFavor) -> Self {
        self.favor = favor;
        self
    }

    fn args(&self, local: &Path, ancestor: &Path, remote: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["merge-file".into(), "-p".into()];
        if self.labels {
            for label in ["ours", "base", "theirs"] {
                args.push("-L".into());
                args.push(label.into());
            }
        }
        match self.favor {
            MergeFavor::None => {}
            MergeFavor::Ours => args.push("--ours".into()),
            MergeFavor::Theirs => args.push("--theirs".into()),
            MergeFavor::Union => args.push("--union".into()),
        }
        args.push(local.into());
        args.push(ancestor.into());
        args.push(remote.into());
        args
    }
}

impl MergePrimitive for GitMergeFile {
    fn name(&self) -> &str {
        "git-merge-file"
    }

    fn merge(
        &self,
        local: &Path,
        ancestor: &Path,
        remote: &Path,
        destination: &Path,
    ) -> Result<MergeInvocation, ResolveError> {
        debug!(binary = %self.binary.display(), destination = %destination.display(), "running git merge-file");
        let output = match Command::new(&self.binary)
            .args(self.args(local, ancestor, remote))
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(binary = %self.binary.display(), "merge binary not found");
                return Ok(MergeInvocation::failed(destination));
            }
            Err(e) => {
                error!(binary = %self.binary.display(), error = %e, "failed to spawn merge binary");
                return Ok(MergeInvocation::failed(destination));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let invocation = match output.status.code() {
            Some(0) => MergeInvocation {
                success: true,
                destination: destination.to_path_buf(),
                conflicts: Some(0),
            },
            Some(code @ 1..=MAX_CONFLICT_STATUS) => {
                debug!(conflicts = code, "git merge-file reported conflicts");
                MergeInvocation {
                    success: true,
                    destination: destination.to_path_buf(),
                    conflicts: Some(code as u32),
                }
            }
            Some(code) => {
                warn!(exit_code = code, stderr = %stderr.trim(), "git merge-file failed");
                MergeInvocation::failed(destination)
            }
            None => {
                warn!("git merge-file terminated by signal");
                MergeInvocation::failed(destination)
            }
        };

        // The merged output may replace a working file, so it holds stdout
        // only; stderr is kept for diagnosis when the run failed.
        if invocation.success {
            if !stderr.trim().is_empty() {
                warn!(stderr = %stderr.trim(), "git merge-file wrote to stderr");
            }
            write_artifact(destination, &[&output.stdout])?;
        } else {
            write_artifact(destination, &[&output.stdout, &output.stderr])?;
        }
        Ok(invocation)
    }
}

// ---------------------------------------------------------------------------
// Built-in (diffy)
// ---------------------------------------------------------------------------

/// In-process merge through `diffy`, for hosts without a `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinMerge;

impl BuiltinMerge {
    pub fn new() -> Self {
        Self
    }
}

impl MergePrimitive for BuiltinMerge {
    fn name(&self) -> &str {
        "builtin"
    }

    fn merge(
        &self,
        local: &Path,
        ancestor: &Path,
        remote: &Path,
        destination: &Path,
    ) -> Result<MergeInvocation, ResolveError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| ResolveError::Artifact {
                path: path.display().to_string(),
                source,
            })
        };
        let (ours, base, theirs) = (read(local)?, read(ancestor)?, read(remote)?);

        let (merged, conflicts) = match diffy::merge_bytes(&base, &ours, &theirs) {
            Ok(merged) => (merged, 0),
            Err(conflicted) => {
                let count = count_marker_lines(&conflicted, BUILTIN_MARKER) as u32;
                (conflicted, count)
            }
        };
        info!(destination = %destination.display(), conflicts, "builtin merge completed");
        write_artifact(destination, &[&merged])?;
        Ok(MergeInvocation {
            success: true,
            destination: destination.to_path_buf(),
            conflicts: Some(conflicts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::git_available;

    fn inputs(dir: &Path, ours: &str, base: &str, theirs: &str) -> (PathBuf, PathBuf, PathBuf) {
        let o = dir.join("f.OURS");
        let b = dir.join("f.BASE");
        let t = dir.join("f.THEIRS");
        std::fs::write(&o, ours).unwrap();
        std::fs::write(&b, base).unwrap();
        std::fs::write(&t, theirs).unwrap();
        (o, b, t)
    }

    #[cfg(unix)]
    fn fake_git(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-git");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_args_with_labels_and_favor() {
        let tool = GitMergeFile::new("git").with_favor(MergeFavor::Union);
        let args: Vec<String> = tool
            .args(Path::new("o"), Path::new("b"), Path::new("t"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["merge-file", "-p", "-L", "ours", "-L", "base", "-L", "theirs", "--union", "o", "b", "t"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let (o, b, t) = inputs(dir.path(), "a", "b", "c");
        let dest = dir.path().join("f.MERGED");

        let clean = GitMergeFile::new(fake_git(dir.path(), "echo merged; exit 0"));
        let inv = clean.merge(&o, &b, &t, &dest).unwrap();
        assert!(inv.success);
        assert_eq!(inv.conflicts, Some(0));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "merged\n");

        let noisy = GitMergeFile::new(fake_git(
            dir.path(),
            "echo merged; echo 'warning: unable to access config' >&2; exit 0",
        ));
        let inv = noisy.merge(&o, &b, &t, &dest).unwrap();
        assert!(inv.success);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "merged\n");

        let conflicted = GitMergeFile::new(fake_git(dir.path(), "echo '<<<<<<< ours'; exit 3"));
        let inv = conflicted.merge(&o, &b, &t, &dest).unwrap();
        assert!(inv.success);
        assert_eq!(inv.conflicts, Some(3));

        let broken = GitMergeFile::new(fake_git(dir.path(), "echo 'fatal: bad' >&2; exit 255"));
        let inv = broken.merge(&o, &b, &t, &dest).unwrap();
        assert!(!inv.success);
        // Failed runs keep stderr in the artifact.
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "fatal: bad\n");

        let killed = GitMergeFile::new(fake_git(dir.path(), "kill -9 $$"));
        let inv = killed.merge(&o, &b, &t, &dest).unwrap();
        assert!(!inv.success);
    }

    #[test]
    fn test_missing_binary_is_failure_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let (o, b, t) = inputs(dir.path(), "a", "b", "c");
        let dest = dir.path().join("f.MERGED");
        let tool = GitMergeFile::new("/nonexistent/git-binary");
        let inv = tool.merge(&o, &b, &t, &dest).unwrap();
        assert!(!inv.success);
        assert!(!dest.exists());
    }

    #[test]
    fn test_real_git_merge_file() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("f.MERGED");

        let (o, b, t) = inputs(dir.path(), "1\n2 ours\n3\n4\n5\n", "1\n2\n3\n4\n5\n", "1\n2\n3\n4\n5 theirs\n");
        let inv = GitMergeFile::new("git").merge(&o, &b, &t, &dest).unwrap();
        assert_eq!(inv.conflicts, Some(0));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "1\n2 ours\n3\n4\n5 theirs\n");

        let (o, b, t) = inputs(dir.path(), "x ours\n", "x\n", "x theirs\n");
        let inv = GitMergeFile::new("git").merge(&o, &b, &t, &dest).unwrap();
        assert!(inv.success);
        assert_eq!(inv.conflicts, Some(1));
        let merged = std::fs::read_to_string(&dest).unwrap();
        assert!(merged.contains("<<<<<<< ours"));
        assert!(merged.contains(">>>>>>> theirs"));
    }

    #[test]
    fn test_builtin_merge() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("f.MERGED");

        let (o, b, t) = inputs(dir.path(), "1\n2 ours\n3\n4\n5\n", "1\n2\n3\n4\n5\n", "1\n2\n3\n4\n5 theirs\n");
        let inv = BuiltinMerge::new().merge(&o, &b, &t, &dest).unwrap();
        assert!(inv.success);
        assert_eq!(inv.conflicts, Some(0));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "1\n2 ours\n3\n4\n5 theirs\n");

        let (o, b, t) = inputs(dir.path(), "x ours\n", "x\n", "x theirs\n");
        let inv = BuiltinMerge::new().merge(&o, &b, &t, &dest).unwrap();
        assert!(inv.success);
        assert_eq!(inv.conflicts, Some(1));
        assert!(std::fs::read_to_string(&dest).unwrap().contains("<<<<<<<"));
    }

    #[test]
    fn test_primitive_from_config() {
        let mut config = MergeConfig::default();
        assert_eq!(primitive_from_config(&config).name(), "git-merge-file");
        config.tool = MergeTool::Builtin;
        assert_eq!(primitive_from_config(&config).name(), "builtin");
    }
}
