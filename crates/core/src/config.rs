//! TOML-based configuration for portsync.
//!
//! The configuration is loaded once per session and passed around as an
//! immutable value. Secrets are stored as `_env` fields that name an
//! environment variable; [`AppConfig::resolve_env_vars`] reads them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session-wide settings (branch naming, recovery directory, logging).
    #[serde(default)]
    pub session: SessionConfig,

    /// Downstream repository and upstream remote.
    pub repository: RepositoryConfig,

    /// Identity used for merge and resolution commits.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Three-way merge primitive settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Build-verification harness settings.
    #[serde(default)]
    pub build: BuildConfig,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prefix of the dated sync branch (`<prefix>-YYYY-MM-DD`).
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Directory receiving `.BASE/.OURS/.THEIRS/.MERGED/.ORIGINAL` artifacts.
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: PathBuf,

    /// Append-only log file. Console-only logging when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_branch_prefix() -> String {
    "upstream-sync".into()
}
fn default_recovery_dir() -> PathBuf {
    PathBuf::from("/var/db/portsync/conflicts")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            recovery_dir: default_recovery_dir(),
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Downstream repository location and the remotes it syncs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Local working tree of the downstream ports repository.
    pub path: PathBuf,

    /// Clone URL used when `path` does not exist yet.
    pub origin_url: String,

    /// Branch the dated sync branch starts from.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Remote the sync branch is pushed to.
    #[serde(default = "default_push_remote")]
    pub push_remote: String,

    /// Name of the upstream remote.
    #[serde(default = "default_upstream_remote")]
    pub upstream_remote: String,

    /// Upstream ports tree URL.
    pub upstream_url: String,

    /// Upstream branch merged into the sync branch.
    #[serde(default = "default_base_branch")]
    pub upstream_branch: String,

    /// Environment variable holding an HTTPS access token for fetch/push.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_base_branch() -> String {
    "main".into()
}
fn default_push_remote() -> String {
    "origin".into()
}
fn default_upstream_remote() -> String {
    "upstream".into()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Author/committer identity for commits created by portsync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub name: String,
    #[serde(default = "default_identity_email")]
    pub email: String,
}

fn default_identity_name() -> String {
    "portsync".into()
}
fn default_identity_email() -> String {
    "portsync@localhost".into()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_identity_name(),
            email: default_identity_email(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge primitive
// ---------------------------------------------------------------------------

/// Which three-way merge primitive resolves conflicted entries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeTool {
    /// External `git merge-file -p`.
    #[default]
    GitMergeFile,
    /// In-process merge via `diffy`.
    Builtin,
}

/// Conflict-hunk policy passed to `git merge-file`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeFavor {
    /// Leave conflict markers in the output.
    #[default]
    None,
    Ours,
    Theirs,
    Union,
}

/// Merge primitive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub tool: MergeTool,

    /// Git executable used by the `git-merge-file` tool.
    #[serde(default = "default_git_binary")]
    pub git_binary: PathBuf,

    #[serde(default)]
    pub favor: MergeFavor,

    /// Sentinel whose presence in merge output means "needs a human".
    #[serde(default = "default_conflict_marker")]
    pub conflict_marker: String,

    /// Label conflict hunks with `ours`/`base`/`theirs`.
    #[serde(default = "default_true")]
    pub labels: bool,
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}
fn default_conflict_marker() -> String {
    "<<<<<<<".into()
}
fn default_true() -> bool {
    true
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tool: MergeTool::default(),
            git_binary: default_git_binary(),
            favor: MergeFavor::default(),
            conflict_marker: default_conflict_marker(),
            labels: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Build harness
// ---------------------------------------------------------------------------

/// poudriere build-verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poudriere")]
    pub poudriere: PathBuf,

    /// Jail name (`-j`).
    #[serde(default = "default_jail")]
    pub jail: String,

    /// Release the jail is created from when missing (`-v`).
    #[serde(default = "default_jail_version")]
    pub jail_version: String,

    /// Jail architecture (`-a`). Host architecture when unset.
    #[serde(default)]
    pub arch: Option<String>,

    /// Ports tree name registered for the repository (`-p`).
    #[serde(default = "default_ports_tree")]
    pub ports_tree: String,

    /// Port origins for the dry-run bulk build. Empty means all ports.
    #[serde(default)]
    pub origins: Vec<String>,
}

fn default_poudriere() -> PathBuf {
    PathBuf::from("poudriere")
}
fn default_jail() -> String {
    "portsync".into()
}
fn default_jail_version() -> String {
    "14.1-RELEASE".into()
}
fn default_ports_tree() -> String {
    "portsync".into()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poudriere: default_poudriere(),
            jail: default_jail(),
            jail_version: default_jail_version(),
            arch: None,
            ports_tree: default_ports_tree(),
            origins: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from the environment.
    ///
    /// A missing variable logs a warning and leaves the field unset; anonymous
    /// fetch and push are attempted in that case.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.repository.token_env {
            self.repository.token = resolve_optional_env(env_name, "repository.token_env");
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("repository.origin_url", &self.repository.origin_url)?;
        require_non_empty("repository.upstream_url", &self.repository.upstream_url)?;
        require_non_empty("repository.base_branch", &self.repository.base_branch)?;
        require_non_empty("repository.upstream_branch", &self.repository.upstream_branch)?;
        require_non_empty("repository.push_remote", &self.repository.push_remote)?;
        require_non_empty("repository.upstream_remote", &self.repository.upstream_remote)?;
        if self.repository.path.as_os_str().is_empty() {
            return Err(invalid("repository.path", "repository path must not be empty"));
        }
        if self.repository.push_remote == self.repository.upstream_remote {
            return Err(invalid(
                "repository.upstream_remote",
                "upstream remote must differ from the push remote",
            ));
        }

        require_non_empty("session.branch_prefix", &self.session.branch_prefix)?;
        if self.session.branch_prefix.contains(char::is_whitespace) {
            return Err(invalid(
                "session.branch_prefix",
                "branch prefix must not contain whitespace",
            ));
        }
        if self.session.recovery_dir.as_os_str().is_empty() {
            return Err(invalid(
                "session.recovery_dir",
                "recovery directory must not be empty",
            ));
        }

        require_non_empty("merge.conflict_marker", &self.merge.conflict_marker)?;
        if self.merge.favor != MergeFavor::None && self.merge.tool != MergeTool::GitMergeFile {
            return Err(invalid(
                "merge.favor",
                "a favor policy requires the git-merge-file tool",
            ));
        }

        if self.build.enabled {
            require_non_empty("build.jail", &self.build.jail)?;
            require_non_empty("build.jail_version", &self.build.jail_version)?;
            require_non_empty("build.ports_tree", &self.build.ports_tree)?;
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Commented configuration template written by `portsync init`.
    pub fn default_toml() -> &'static str {
        DEFAULT_TOML
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

const DEFAULT_TOML: &str = r#"# portsync configuration

[session]
branch_prefix = "upstream-sync"
recovery_dir = "/var/db/portsync/conflicts"
log_file = "/var/log/portsync.log"
log_level = "info"

[repository]
path = "/usr/local/poudriere/ports/downstream"
origin_url = "https://git.example.org/ports.git"
base_branch = "main"
push_remote = "origin"
upstream_remote = "upstream"
upstream_url = "https://git.FreeBSD.org/ports.git"
upstream_branch = "main"
# token_env = "PORTSYNC_GIT_TOKEN"

[identity]
name = "portsync"
email = "portsync@example.org"

[merge]
# "git-merge-file" runs `git merge-file -p`; "builtin" merges in-process.
tool = "git-merge-file"
git_binary = "git"
# none | ours | theirs | union (git-merge-file only)
favor = "none"
conflict_marker = "<<<<<<<"
labels = true

[build]
enabled = true
poudriere = "poudriere"
jail = "141amd64"
jail_version = "14.1-RELEASE"
# arch = "amd64"
ports_tree = "downstream"
# Empty list builds everything (bulk -a).
origins = []
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[session]
branch_prefix = "sync"
recovery_dir = "/tmp/portsync/conflicts"
log_level = "debug"

[repository]
path = "/tmp/portsync/ports"
origin_url = "https://git.example.org/ports.git"
upstream_url = "https://git.FreeBSD.org/ports.git"
upstream_branch = "2024Q4"
token_env = "PORTSYNC_TEST_TOKEN"

[identity]
name = "Sync Bot"
email = "bot@example.org"

[merge]
tool = "builtin"
conflict_marker = "<<<<<<< "

[build]
jail = "141amd64"
jail_version = "14.1-RELEASE"
arch = "amd64"
ports_tree = "downstream"
origins = ["www/nginx", "lang/python311"]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.session.branch_prefix, "sync");
        assert_eq!(config.repository.upstream_branch, "2024Q4");
        assert_eq!(config.repository.base_branch, "main");
        assert_eq!(config.merge.tool, MergeTool::Builtin);
        assert_eq!(config.merge.conflict_marker, "<<<<<<< ");
        assert_eq!(config.build.origins, vec!["www/nginx", "lang/python311"]);
        assert_eq!(config.build.arch.as_deref(), Some("amd64"));
        config.validate().expect("sample config should be valid");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.session.log_level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/portsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[repository]
path = "/usr/ports"
origin_url = "https://git.example.org/ports.git"
upstream_url = "https://git.FreeBSD.org/ports.git"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.session.branch_prefix, "upstream-sync");
        assert_eq!(config.repository.push_remote, "origin");
        assert_eq!(config.repository.upstream_remote, "upstream");
        assert_eq!(config.merge.tool, MergeTool::GitMergeFile);
        assert_eq!(config.merge.favor, MergeFavor::None);
        assert_eq!(config.merge.conflict_marker, "<<<<<<<");
        assert!(config.merge.labels);
        assert!(config.build.enabled);
        assert!(config.build.origins.is_empty());
    }

    #[test]
    fn test_validate_rejects_favor_with_builtin() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.merge.favor = MergeFavor::Union;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.favor"
        ));

        config.merge.tool = MergeTool::GitMergeFile;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_marker_and_same_remotes() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.merge.conflict_marker = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.conflict_marker"
        ));

        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.repository.upstream_remote = "origin".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "repository.upstream_remote"
        ));
    }

    #[test]
    fn test_disabled_build_skips_build_validation() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.build.jail = String::new();
        assert!(config.validate().is_err());
        config.build.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("PORTSYNC_TEST_TOKEN", "tok3n");
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.repository.token.as_deref(), Some("tok3n"));
        std::env::remove_var("PORTSYNC_TEST_TOKEN");
    }

    #[test]
    fn test_default_template_parses_and_validates() {
        let config: AppConfig = toml::from_str(AppConfig::default_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.build.jail, "141amd64");
        assert_eq!(
            config.session.log_file.as_deref(),
            Some(Path::new("/var/log/portsync.log"))
        );
    }
}
