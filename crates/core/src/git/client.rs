//! Local Git repository operations via `git2`.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, ErrorCode, FetchOptions, Index, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature, StatusOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::conflict::MergeRepository;
use crate::errors::GitError;
use crate::models::{ConflictedEntry, Stage};

/// Stage bits of `IndexEntry::flags`.
const INDEX_STAGE_MASK: u16 = 0x3000;
const INDEX_STAGE_SHIFT: u16 = 12;

/// Result of merging the upstream branch into the checked-out branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MergeStatus {
    /// Upstream is already contained in HEAD.
    UpToDate,
    /// HEAD moved forward to upstream; carries the new HEAD SHA.
    FastForwarded(String),
    /// Clean merge commit; carries its SHA.
    Merged(String),
    /// The merge stopped with this many conflicted entries.
    Conflicted(usize),
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up to date"),
            Self::FastForwarded(sha) => write!(f, "fast-forwarded to {}", short_sha(sha)),
            Self::Merged(sha) => write!(f, "merged cleanly ({})", short_sha(sha)),
            Self::Conflicted(count) => write!(f, "{} conflicted entries", count),
        }
    }
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(10)]
}

/// High-level Git client wrapping a `git2::Repository` with a working tree.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    workdir: PathBuf,
    identity: Option<(String, String)>,
}

impl GitClient {
    /// Open an existing non-bare Git repository at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Self::from_repository(repo, path)
    }

    /// Clone a remote repository to `path`.
    #[instrument(skip(token), fields(url = %url, path = %path.display()))]
    pub fn clone_repo(url: &str, path: &Path, token: Option<&str>) -> Result<Self, GitError> {
        info!("cloning git repository");
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(auth_callbacks(token));
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        let repo = builder.clone(url, path)?;
        info!("clone completed");
        Self::from_repository(repo, path)
    }

    fn from_repository(repo: Repository, path: &Path) -> Result<Self, GitError> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::BareRepository(path.display().to_string()))?
            .to_path_buf();
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            workdir,
            identity: None,
        })
    }

    /// Use a fixed author/committer for commits created by this client.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        if let Some((name, email)) = &self.identity {
            return Ok(Signature::now(name, email)?);
        }
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("portsync", "portsync@localhost")?),
        }
    }

    /// Add `name` pointing at `url`, or repoint it if the URL changed.
    #[instrument(skip(self))]
    pub fn ensure_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => {
                if remote.url() != Some(url) {
                    info!(remote = name, url, "updating remote url");
                    self.repo.remote_set_url(name, url)?;
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                info!(remote = name, url, "adding remote");
                self.repo.remote(name, url)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Fetch from a named remote using its configured refspecs.
    #[instrument(skip(self, token))]
    pub fn fetch(&self, remote_name: &str, token: Option<&str>) -> Result<(), GitError> {
        info!(remote = remote_name, "fetching");
        let mut remote = self.repo.find_remote(remote_name)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(auth_callbacks(token));
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    /// Whether the working tree and index match HEAD (untracked files ignored).
    pub fn is_clean(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        debug!(changed = statuses.len(), "status queried");
        Ok(statuses.is_empty())
    }

    /// Return the SHA of HEAD.
    pub fn get_head_sha(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Short name of the checked-out branch.
    pub fn current_branch(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Create branch `name` at `start_point` (any revspec). Fails if it exists.
    #[instrument(skip(self))]
    pub fn create_branch(&self, name: &str, start_point: &str) -> Result<String, GitError> {
        if self.branch_exists(name) {
            return Err(GitError::BranchExists(name.to_string()));
        }
        let commit = self
            .repo
            .revparse_single(start_point)
            .map_err(|_| GitError::RefNotFound(start_point.to_string()))?
            .peel_to_commit()?;
        self.repo.branch(name, &commit, false)?;
        info!(name, start_point, sha = %commit.id(), "created branch");
        Ok(commit.id().to_string())
    }

    /// Check out a local branch, refusing to clobber local modifications.
    #[instrument(skip(self))]
    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", name);
        let target = self
            .repo
            .revparse_single(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        self.repo
            .checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        self.repo.set_head(&refname)?;
        info!(name, "checked out branch");
        Ok(())
    }

    /// List all local branch names.
    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let branches = self.repo.branches(Some(BranchType::Local))?;
        let mut names = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Merge `refs/remotes/<remote>/<branch>` into the checked-out branch.
    ///
    /// A clean merge is committed immediately. On conflict the repository is
    /// left mid-merge: conflict stages in the index, marker-bearing files in
    /// the working tree, and `MERGE_HEAD` recorded.
    #[instrument(skip(self))]
    pub fn merge_upstream(&mut self, remote: &str, branch: &str) -> Result<MergeStatus, GitError> {
        let refname = format!("refs/remotes/{}/{}", remote, branch);
        let their_ref = self
            .repo
            .find_reference(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        let their_commit = their_ref.peel_to_commit()?;
        let annotated = self.repo.reference_to_annotated_commit(&their_ref)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            info!("already up to date with upstream");
            return Ok(MergeStatus::UpToDate);
        }

        if analysis.is_fast_forward() {
            let head = self.repo.head()?;
            let head_name = head
                .name()
                .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?
                .to_string();
            self.repo
                .checkout_tree(their_commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
            self.repo.find_reference(&head_name)?.set_target(
                their_commit.id(),
                &format!("portsync: fast-forward to {}", refname),
            )?;
            info!(sha = %their_commit.id(), "fast-forwarded to upstream");
            return Ok(MergeStatus::FastForwarded(their_commit.id().to_string()));
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.allow_conflicts(true).conflict_style_merge(true);
        self.repo.merge(&[&annotated], None, Some(&mut checkout))?;

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            let count = self.conflicted_entries()?.len();
            warn!(count, "upstream merge stopped with conflicts");
            return Ok(MergeStatus::Conflicted(count));
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let head_commit = self.repo.head()?.peel_to_commit()?;
        let sig = self.signature()?;
        let message = format!("Merge {}/{} into {}", remote, branch, self.current_branch()?);
        let oid = self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &message,
            &tree,
            &[&head_commit, &their_commit],
        )?;
        self.repo.cleanup_state()?;
        info!(sha = %oid, "upstream merged cleanly");
        Ok(MergeStatus::Merged(oid.to_string()))
    }

    /// Commits recorded in `MERGE_HEAD`, empty when no merge is in progress.
    fn merge_heads(&mut self) -> Result<Vec<Oid>, GitError> {
        let mut heads = Vec::new();
        match self.repo.mergehead_foreach(|oid| {
            heads.push(*oid);
            true
        }) {
            Ok(()) => Ok(heads),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Push a local branch to a remote.
    #[instrument(skip(self, token))]
    pub fn push(&self, remote_name: &str, branch: &str, token: Option<&str>) -> Result<(), GitError> {
        info!(remote = remote_name, branch, "pushing");
        let rejected = RefCell::new(None::<String>);
        {
            let mut remote = self.repo.find_remote(remote_name)?;
            let mut callbacks = auth_callbacks(token);
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    *rejected.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
            remote.push(&[&refspec], Some(&mut push_opts))?;
        }
        if let Some(detail) = rejected.into_inner() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }
}

impl MergeRepository for GitClient {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn conflicted_entries(&self) -> Result<Vec<ConflictedEntry>, GitError> {
        let index = self.repo.index()?;
        let mut paths = BTreeSet::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref());
            if let Some(entry) = entry {
                paths.insert(ConflictedEntry::from_index_path(&entry.path));
            }
        }
        debug!(count = paths.len(), "listed conflicted entries");
        Ok(paths.into_iter().collect())
    }

    fn stage_content(&self, path: &str, stage: Stage) -> Result<Vec<u8>, GitError> {
        let index = self.repo.index()?;
        let entry = index
            .get_path(Path::new(path), stage.index_stage())
            .ok_or_else(|| GitError::NotFoundAtStage {
                path: path.to_string(),
                stage,
            })?;
        let blob = self.repo.find_blob(entry.id)?;
        Ok(blob.content().to_vec())
    }

    fn stage_path(&mut self, path: &str) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        debug!(path, "staged resolved path");
        Ok(())
    }

    /// Record the staged resolutions.
    ///
    /// With no unmerged entries left this concludes the merge with a merge
    /// commit. Otherwise it writes a checkpoint commit on HEAD alone, keeping
    /// still-conflicted paths at their local version and leaving the merge
    /// in progress for a human to finish.
    fn commit_resolution(&mut self, message: &str) -> Result<String, GitError> {
        let merge_heads = self.merge_heads()?;
        let index = self.repo.index()?;
        let head_commit = self.repo.head()?.peel_to_commit()?;
        let sig = self.signature()?;

        if !index.has_conflicts() {
            let mut index = index;
            let tree = self.repo.find_tree(index.write_tree()?)?;
            let mut parents = vec![head_commit];
            for oid in merge_heads {
                parents.push(self.repo.find_commit(oid)?);
            }
            let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
            let oid = self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
            self.repo.cleanup_state()?;
            info!(sha = %oid, "merge concluded with resolution commit");
            return Ok(oid.to_string());
        }

        let mut snapshot = Index::new()?;
        for entry in index.iter() {
            match (entry.flags & INDEX_STAGE_MASK) >> INDEX_STAGE_SHIFT {
                0 => snapshot.add(&entry)?,
                2 => {
                    let mut local = entry;
                    local.flags &= !INDEX_STAGE_MASK;
                    snapshot.add(&local)?;
                }
                _ => {}
            }
        }
        let tree = self.repo.find_tree(snapshot.write_tree_to(&self.repo)?)?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head_commit])?;
        warn!(sha = %oid, "checkpoint commit created, merge still in progress");
        Ok(oid.to_string())
    }
}

fn auth_callbacks<'a>(token: Option<&str>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(tok) = token {
        let tok = tok.to_string();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &tok)
        });
    }
    callbacks
}
