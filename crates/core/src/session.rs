//! The upstream sync session.
//!
//! A [`SyncEngine`] drives one session through a fixed sequence of states:
//!
//! ```text
//! Idle -> Preflight -> Preparing -> Branching -> Merging
//!      -> Resolving -> Building -> Publishing -> Done
//! ```
//!
//! Any fatal error moves the engine to `Failed`. Nothing is rolled back: a
//! created branch, a checkpoint commit or recovery artifacts stay where they
//! are for the operator.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::conflict::{ResolutionDriver, StagingManager};
use crate::errors::SessionError;
use crate::git::{GitClient, MergeStatus};
use crate::harness::BuildHarness;
use crate::models::SessionSummary;
use crate::preflight;

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// States of a sync session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Preflight,
    Preparing,
    Branching,
    Merging,
    Resolving,
    Building,
    Publishing,
    Done,
    Failed,
}

impl SessionState {
    /// Whether the dated branch may exist once the session reached this state.
    pub fn branch_touched(self) -> bool {
        matches!(
            self,
            Self::Branching | Self::Merging | Self::Resolving | Self::Building | Self::Publishing
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Preflight => write!(f, "preflight"),
            Self::Preparing => write!(f, "preparing"),
            Self::Branching => write!(f, "branching"),
            Self::Merging => write!(f, "merging"),
            Self::Resolving => write!(f, "resolving"),
            Self::Building => write!(f, "building"),
            Self::Publishing => write!(f, "publishing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Run flags from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Do everything except push.
    pub dry_run: bool,
    pub verbose: bool,
    /// Skip build verification even when enabled in config.
    pub skip_build: bool,
}

/// Immutable parameters of one session.
#[derive(Debug, Clone)]
pub struct SyncSession {
    config: Arc<AppConfig>,
    branch: String,
    options: SessionOptions,
    started_at: DateTime<Local>,
}

impl SyncSession {
    /// Create a session whose branch is dated `date`.
    pub fn new(config: Arc<AppConfig>, date: NaiveDate, options: SessionOptions) -> Self {
        let branch = branch_name(&config.session.branch_prefix, date);
        Self {
            config,
            branch,
            options,
            started_at: Local::now(),
        }
    }

    /// Create a session dated today (local time).
    pub fn today(config: Arc<AppConfig>, options: SessionOptions) -> Self {
        Self::new(config, Local::now().date_naive(), options)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

/// `<prefix>-YYYY-MM-DD`.
pub fn branch_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}", prefix, date.format("%Y-%m-%d"))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Executes one [`SyncSession`].
pub struct SyncEngine {
    session: SyncSession,
    state: SessionState,
    failed_in: Option<SessionState>,
}

impl SyncEngine {
    pub fn new(session: SyncSession) -> Self {
        info!(branch = %session.branch(), "initializing sync engine");
        Self {
            session,
            state: SessionState::Idle,
            failed_in: None,
        }
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The state the session was in when it failed.
    pub fn failed_in(&self) -> Option<SessionState> {
        self.failed_in
    }

    fn set_state(&mut self, new_state: SessionState) {
        info!(from = %self.state, to = %new_state, "state transition");
        self.state = new_state;
    }

    /// Run the session to completion.
    ///
    /// Unresolved conflicts are not an error: the summary reports them and
    /// the branch is neither built nor pushed.
    #[instrument(skip(self), fields(branch = %self.session.branch()))]
    pub fn run(&mut self) -> Result<SessionSummary, SessionError> {
        let result = self.do_run();
        match &result {
            Ok(summary) => {
                self.set_state(SessionState::Done);
                info!(
                    merge = %summary.merge,
                    built = summary.built,
                    pushed = summary.pushed,
                    status = "success",
                    "sync session finished"
                );
            }
            Err(e) => {
                self.failed_in = Some(self.state);
                self.set_state(SessionState::Failed);
                error!(error = %e, "sync session failed");
            }
        }
        result
    }

    fn do_run(&mut self) -> Result<SessionSummary, SessionError> {
        let config = Arc::clone(&self.session.config);
        let options = self.session.options;
        let branch = self.session.branch.clone();
        let repo_cfg = &config.repository;
        let token = repo_cfg.token.as_deref();

        self.set_state(SessionState::Preflight);
        preflight::check_tools(&config, options.skip_build)?;

        self.set_state(SessionState::Preparing);
        let client = if repo_cfg.path.exists() {
            GitClient::new(&repo_cfg.path)?
        } else {
            info!(url = %repo_cfg.origin_url, "repository missing, cloning");
            GitClient::clone_repo(&repo_cfg.origin_url, &repo_cfg.path, token)?
        };
        let mut client = client.with_identity(&config.identity.name, &config.identity.email);
        client.ensure_remote(&repo_cfg.upstream_remote, &repo_cfg.upstream_url)?;
        client.fetch(&repo_cfg.push_remote, token)?;
        client.fetch(&repo_cfg.upstream_remote, token)?;
        if !client.is_clean()? {
            return Err(SessionError::DirtyWorkingTree(
                repo_cfg.path.display().to_string(),
            ));
        }

        self.set_state(SessionState::Branching);
        let start_point = format!("refs/remotes/{}/{}", repo_cfg.push_remote, repo_cfg.base_branch);
        client.create_branch(&branch, &start_point)?;
        client.checkout_branch(&branch)?;

        self.set_state(SessionState::Merging);
        let merge = client.merge_upstream(&repo_cfg.upstream_remote, &repo_cfg.upstream_branch)?;
        info!(%merge, "upstream merge finished");

        let mut summary = SessionSummary {
            branch: branch.clone(),
            merge: merge.clone(),
            resolution: None,
            built: false,
            pushed: false,
            started_at: self.session.started_at,
            completed_at: None,
        };

        if merge == MergeStatus::UpToDate {
            info!("nothing to sync, upstream already merged");
            summary.completed_at = Some(Local::now());
            return Ok(summary);
        }

        if let MergeStatus::Conflicted(count) = merge {
            self.set_state(SessionState::Resolving);
            info!(count, "resolving conflicts");
            let mut driver = ResolutionDriver::new(StagingManager::from_config(&config));
            let report = driver.run(&mut client)?;
            let unresolved = report.needs_manual_follow_up();
            summary.resolution = Some(report);
            if unresolved {
                warn!(
                    branch = %branch,
                    recovery_dir = %config.session.recovery_dir.display(),
                    "manual resolution required, skipping build and push"
                );
                summary.completed_at = Some(Local::now());
                return Ok(summary);
            }
        }

        if config.build.enabled && !options.skip_build {
            self.set_state(SessionState::Building);
            BuildHarness::from_config(&config.build).verify(client.repo_path())?;
            summary.built = true;
        } else {
            info!("build verification skipped");
        }

        self.set_state(SessionState::Publishing);
        if options.dry_run {
            info!(branch = %branch, "dry run, not pushing");
        } else {
            client.push(&repo_cfg.push_remote, &branch, token)?;
            summary.pushed = true;
        }

        summary.completed_at = Some(Local::now());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_config;

    #[test]
    fn test_branch_name() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(branch_name("upstream-sync", date), "upstream-sync-2026-03-07");
    }

    #[test]
    fn test_session_is_dated() {
        let mut config = sample_config();
        config.session.branch_prefix = "ports-merge".into();
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let session = SyncSession::new(
            Arc::new(config),
            date,
            SessionOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        assert_eq!(session.branch(), "ports-merge-2026-10-16");
        assert!(session.options().dry_run);
        assert!(!session.options().skip_build);

        let engine = SyncEngine::new(session);
        assert_eq!(engine.state(), SessionState::Idle);
    }

    #[test]
    fn test_preflight_failure_fails_session() {
        let mut config = sample_config();
        config.merge.git_binary = "/nonexistent/git".into();
        let session = SyncSession::today(Arc::new(config), SessionOptions::default());
        let mut engine = SyncEngine::new(session);
        let err = engine.run().unwrap_err();
        assert!(matches!(err, SessionError::Preflight(_)));
        assert_eq!(engine.state(), SessionState::Failed);
        assert_eq!(engine.failed_in(), Some(SessionState::Preflight));
        assert!(!SessionState::Preflight.branch_touched());
        assert!(SessionState::Building.branch_touched());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Publishing.to_string(), "publishing");
        assert_eq!(
            serde_json::to_value(SessionState::Failed).unwrap(),
            serde_json::json!("failed")
        );
    }
}
