//! Build verification through poudriere.
//!
//! Makes sure the configured jail and ports tree exist (creating them when
//! missing) and then runs a dry-run bulk build of the merged tree. Every step
//! is a blocking subprocess; a non-zero exit aborts verification.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::BuildConfig;
use crate::errors::HarnessError;

/// Client for the `poudriere` command line.
#[derive(Debug, Clone)]
pub struct BuildHarness {
    binary: PathBuf,
    jail: String,
    jail_version: String,
    arch: Option<String>,
    ports_tree: String,
    origins: Vec<String>,
}

impl BuildHarness {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            binary: config.poudriere.clone(),
            jail: config.jail.clone(),
            jail_version: config.jail_version.clone(),
            arch: config.arch.clone(),
            ports_tree: config.ports_tree.clone(),
            origins: config.origins.clone(),
        }
    }

    /// Ensure jail and ports tree, then dry-run the bulk build.
    pub fn verify(&self, repo_path: &Path) -> Result<(), HarnessError> {
        info!(jail = %self.jail, ports_tree = %self.ports_tree, "verifying build");
        self.ensure_jail()?;
        self.ensure_ports_tree(repo_path)?;
        self.dry_run_bulk()?;
        info!(status = "success", "build verification passed");
        Ok(())
    }

    /// Names of the jails poudriere knows about.
    pub fn list_jails(&self) -> Result<Vec<String>, HarnessError> {
        let out = self.run("jail-list", &["jail", "-l", "-q"])?;
        Ok(first_column(&out))
    }

    /// Names of the registered ports trees.
    pub fn list_ports_trees(&self) -> Result<Vec<String>, HarnessError> {
        let out = self.run("ports-list", &["ports", "-l", "-q"])?;
        Ok(first_column(&out))
    }

    pub fn ensure_jail(&self) -> Result<(), HarnessError> {
        if self.list_jails()?.contains(&self.jail) {
            debug!(jail = %self.jail, "jail present");
            return Ok(());
        }
        info!(jail = %self.jail, version = %self.jail_version, "creating jail");
        let mut args = vec![
            "jail",
            "-c",
            "-j",
            self.jail.as_str(),
            "-v",
            self.jail_version.as_str(),
        ];
        if let Some(arch) = &self.arch {
            args.extend(["-a", arch.as_str()]);
        }
        self.run("jail-create", &args)?;
        Ok(())
    }

    /// Register the repository checkout as a `null`-method ports tree.
    pub fn ensure_ports_tree(&self, repo_path: &Path) -> Result<(), HarnessError> {
        if self.list_ports_trees()?.contains(&self.ports_tree) {
            debug!(ports_tree = %self.ports_tree, "ports tree present");
            return Ok(());
        }
        let mountpoint = repo_path.display().to_string();
        info!(ports_tree = %self.ports_tree, path = %mountpoint, "registering ports tree");
        self.run(
            "ports-create",
            &[
                "ports",
                "-c",
                "-p",
                self.ports_tree.as_str(),
                "-m",
                "null",
                "-M",
                mountpoint.as_str(),
            ],
        )?;
        Ok(())
    }

    /// `bulk -n` over the configured origins, or every port when none are set.
    pub fn dry_run_bulk(&self) -> Result<(), HarnessError> {
        let mut args = vec![
            "bulk",
            "-n",
            "-j",
            self.jail.as_str(),
            "-p",
            self.ports_tree.as_str(),
        ];
        if self.origins.is_empty() {
            args.push("-a");
        } else {
            args.extend(self.origins.iter().map(String::as_str));
        }
        self.run("bulk", &args)?;
        Ok(())
    }

    fn run(&self, step: &str, args: &[&str]) -> Result<String, HarnessError> {
        debug!(step, cmd = ?format!("{} {}", self.binary.display(), args.join(" ")), "running poudriere");
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HarnessError::BinaryNotFound(self.binary.display().to_string())
                } else {
                    HarnessError::IoError(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(step, exit_code, %stderr, "poudriere step failed");
            return Err(HarnessError::CommandFailed {
                step: step.to_string(),
                exit_code,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn first_column(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
