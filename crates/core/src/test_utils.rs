//! Shared fixtures for unit tests: throwaway git repositories and an
//! in-memory [`MergeRepository`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::{IndexAddOption, Oid, Repository, ResetType, Signature};

use crate::config::{
    AppConfig, BuildConfig, IdentityConfig, MergeConfig, RepositoryConfig, SessionConfig,
};
use crate::conflict::MergeRepository;
use crate::errors::GitError;
use crate::models::{ConflictedEntry, Stage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A valid configuration with every optional section at its defaults.
pub fn sample_config() -> AppConfig {
    AppConfig {
        session: SessionConfig::default(),
        repository: RepositoryConfig {
            path: PathBuf::from("/usr/local/poudriere/ports/downstream"),
            origin_url: "https://git.example.org/ports.git".into(),
            base_branch: "main".into(),
            push_remote: "origin".into(),
            upstream_remote: "upstream".into(),
            upstream_url: "https://git.FreeBSD.org/ports.git".into(),
            upstream_branch: "main".into(),
            token_env: None,
            token: None,
        },
        identity: IdentityConfig::default(),
        merge: MergeConfig::default(),
        build: BuildConfig::default(),
    }
}

// ---------------------------------------------------------------------------
// Real repositories
// ---------------------------------------------------------------------------

/// Initialise a repository with a committer identity configured.
pub fn init_repo(path: &Path) -> Repository {
    let repo = Repository::init(path).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
    }
    repo
}

/// Stage every change in the working tree (including deletions) and commit
/// on HEAD.
pub fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn remove_file(root: &Path, rel: &str) {
    let path = root.join(rel);
    if path.exists() {
        std::fs::remove_file(path).unwrap();
    }
}

fn apply(root: &Path, rel: &str, content: Option<&str>) {
    match content {
        Some(c) => write_file(root, rel, c),
        None => remove_file(root, rel),
    }
}

/// Write one file and commit it.
pub fn commit_file(repo: &Repository, rel: &str, content: &str, message: &str) -> Oid {
    let root = repo.workdir().unwrap().to_path_buf();
    write_file(&root, rel, content);
    commit_all(repo, message)
}

/// `(path, ancestor, local, remote)`; `None` means the file is absent on that side.
pub type ConflictSpec<'a> = (&'a str, Option<&'a str>, Option<&'a str>, Option<&'a str>);

pub struct MergeFixture {
    pub repo: Repository,
    pub base: Oid,
    pub local: Oid,
    pub upstream: Oid,
}

/// Build base, local and upstream histories ready for
/// `merge_upstream("upstream", "main")`.
///
/// HEAD ends on the local commit; upstream lives at
/// `refs/remotes/upstream/main`. `local_only` files are added on the local side.
pub fn conflicted_repo(
    path: &Path,
    files: &[ConflictSpec<'_>],
    local_only: &[(&str, &str)],
) -> MergeFixture {
    let repo = init_repo(path);
    write_file(path, "README", "ports tree\n");
    for (rel, base, _, _) in files {
        apply(path, rel, *base);
    }
    let base = commit_all(&repo, "base");

    for (rel, _, _, remote) in files {
        apply(path, rel, *remote);
    }
    let upstream = commit_all(&repo, "upstream");
    repo.reference("refs/remotes/upstream/main", upstream, true, "fixture")
        .unwrap();

    {
        let base_obj = repo.find_object(base, None).unwrap();
        repo.reset(&base_obj, ResetType::Hard, None).unwrap();
    }
    for (rel, _, local, _) in files {
        apply(path, rel, *local);
    }
    for (rel, content) in local_only {
        write_file(path, rel, content);
    }
    let local = commit_all(&repo, "local");

    MergeFixture {
        repo,
        base,
        local,
        upstream,
    }
}

/// Whether a `git` binary is on `$PATH`.
pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// A conflicted repository held in memory, with a real working directory so
/// that staging reads and writes hit the filesystem.
pub struct FakeRepository {
    workdir: PathBuf,
    /// Conflicted path -> `[ancestor, local, remote]`.
    pub conflicts: BTreeMap<String, [Option<Vec<u8>>; 3]>,
    /// Paths whose stage lookups fail with a non-"not found" error.
    pub broken: Vec<String>,
    pub staged: Vec<String>,
    pub commits: Vec<String>,
    pub fail_listing: bool,
    pub fail_staging: bool,
}

impl FakeRepository {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            conflicts: BTreeMap::new(),
            broken: Vec::new(),
            staged: Vec::new(),
            commits: Vec::new(),
            fail_listing: false,
            fail_staging: false,
        }
    }

    /// Register a conflict and write `working` (when given) to the working tree.
    pub fn add_conflict(
        &mut self,
        path: &str,
        ancestor: Option<&str>,
        local: Option<&str>,
        remote: Option<&str>,
        working: Option<&str>,
    ) {
        let bytes = |s: Option<&str>| s.map(|v| v.as_bytes().to_vec());
        self.conflicts
            .insert(path.to_string(), [bytes(ancestor), bytes(local), bytes(remote)]);
        if let Some(content) = working {
            write_file(&self.workdir, path, content);
        }
    }
}

impl MergeRepository for FakeRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn conflicted_entries(&self) -> Result<Vec<ConflictedEntry>, GitError> {
        if self.fail_listing {
            return Err(GitError::RefNotFound("index".into()));
        }
        Ok(self
            .conflicts
            .keys()
            .filter(|p| !self.staged.contains(p))
            .map(|p| ConflictedEntry::new(p.as_str()))
            .collect())
    }

    fn stage_content(&self, path: &str, stage: Stage) -> Result<Vec<u8>, GitError> {
        if self.broken.iter().any(|b| b == path) {
            return Err(GitError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "corrupt object",
            )));
        }
        let not_found = || GitError::NotFoundAtStage {
            path: path.to_string(),
            stage,
        };
        let versions = self.conflicts.get(path).ok_or_else(not_found)?;
        versions[stage.index_stage() as usize - 1]
            .clone()
            .ok_or_else(not_found)
    }

    fn stage_path(&mut self, path: &str) -> Result<(), GitError> {
        if self.fail_staging {
            return Err(GitError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "index.lock: permission denied",
            )));
        }
        self.staged.push(path.to_string());
        Ok(())
    }

    fn commit_resolution(&mut self, message: &str) -> Result<String, GitError> {
        self.commits.push(message.to_string());
        Ok(format!("{:040x}", self.commits.len()))
    }
}
