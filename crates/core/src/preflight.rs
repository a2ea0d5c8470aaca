//! Checks that the external tools a session needs are installed.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::config::{AppConfig, MergeTool};
use crate::errors::PreflightError;

/// An external tool and the command that proves it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub tool: &'static str,
    pub binary: PathBuf,
    pub args: Vec<&'static str>,
}

/// Tools required by this configuration.
///
/// `git` is needed only for the `git-merge-file` primitive (repository access
/// goes through libgit2); `poudriere` only when the build runs.
pub fn required_tools(config: &AppConfig, skip_build: bool) -> Vec<ToolRequirement> {
    let mut tools = Vec::new();
    if config.merge.tool == MergeTool::GitMergeFile {
        tools.push(ToolRequirement {
            tool: "git",
            binary: config.merge.git_binary.clone(),
            args: vec!["--version"],
        });
    }
    if config.build.enabled && !skip_build {
        tools.push(ToolRequirement {
            tool: "poudriere",
            binary: config.build.poudriere.clone(),
            args: vec!["version"],
        });
    }
    tools
}

/// Run one requirement and return the first line of its output.
pub fn probe(requirement: &ToolRequirement) -> Result<String, PreflightError> {
    probe_binary(requirement.tool, &requirement.binary, &requirement.args)
}

fn probe_binary(tool: &str, binary: &Path, args: &[&str]) -> Result<String, PreflightError> {
    let missing = |detail: String| PreflightError::ToolMissing {
        tool: tool.to_string(),
        detail,
    };
    match Command::new(binary).args(args).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            debug!(tool, version = %version, "preflight passed");
            Ok(version)
        }
        Ok(output) => Err(missing(format!(
            "'{} {}' failed (exit code {}): {}",
            binary.display(),
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Err(e) => Err(missing(format!("{} not runnable: {}", binary.display(), e))),
    }
}

/// Fail on the first required tool that does not run.
pub fn check_tools(config: &AppConfig, skip_build: bool) -> Result<(), PreflightError> {
    for requirement in required_tools(config, skip_build) {
        let version = probe(&requirement)?;
        info!(tool = requirement.tool, version = %version, "tool available");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_config;

    #[test]
    fn test_required_tools_follow_config() {
        let mut config = sample_config();
        let names = |c: &AppConfig, skip| {
            required_tools(c, skip)
                .into_iter()
                .map(|t| t.tool)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&config, false), vec!["git", "poudriere"]);
        assert_eq!(names(&config, true), vec!["git"]);

        config.merge.tool = MergeTool::Builtin;
        config.build.enabled = false;
        assert!(names(&config, false).is_empty());
    }

    #[test]
    fn test_missing_tool_reported() {
        let mut config = sample_config();
        config.merge.git_binary = PathBuf::from("/nonexistent/git");
        let err = check_tools(&config, true).unwrap_err();
        let PreflightError::ToolMissing { tool, .. } = err;
        assert_eq!(tool, "git");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_reported() {
        let err = probe_binary("poudriere", Path::new("false"), &["version"]).unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_returns_first_line() {
        let version = probe_binary("echo", Path::new("echo"), &["3.4.1"]).unwrap();
        assert_eq!(version, "3.4.1");
    }
}
