// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{
    build::CheckoutBuilder, CredentialType, FetchOptions, PushOptions, RemoteCallbacks,
    Repository, StatusOptions,
};
use tracing::{debug, info};

use crate::GitError;

/// `git2::Repository` has raw pointers internally and is marked `!Send +
/// !Sync`.  All operations on this struct are protected by a `Mutex`, so it
/// is safe to share across threads.
struct RepoGuard(Repository);

// SAFETY: access is serialised through the Mutex in GitDriver.
unsafe impl Send for RepoGuard {}
unsafe impl Sync for RepoGuard {}

/// Username + token pair for HTTPS remotes.  Held only in memory; the
/// `Debug` impl redacts the token.
#[derive(Clone)]
pub struct GitCredential {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for GitCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredential")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

/// Outcome of a fast-forward-only pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One changed path relative to the working-tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub kind: ChangeKind,
    pub path: String,
}

/// Synchronous Git driver over one working tree.  Clone-cheap; all clones
/// share the underlying repository handle.
#[derive(Clone)]
pub struct GitDriver {
    repo: Arc<Mutex<RepoGuard>>,
    workdir: PathBuf,
}

impl GitDriver {
    /// Open an existing repository at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let path = path.into();
        let repo = Repository::open(&path)
            .map_err(|_| GitError::NotARepo(path.display().to_string()))?;
        Ok(Self::wrap(repo, path))
    }

    /// Initialize a fresh non-bare repository at `path` (parents created).
    pub fn init(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let path = path.into();
        std::fs::create_dir_all(&path)
            .map_err(|e| GitError::Internal(format!("create {}: {e}", path.display())))?;
        // Pin the initial branch name so behaviour does not depend on the
        // host's init.defaultBranch configuration.
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&path, &opts).map_err(GitError::classify)?;
        info!(path = %path.display(), "initialized KB repository");
        Ok(Self::wrap(repo, path))
    }

    /// Clone `url` into `path`.
    pub fn clone_remote(
        url: &str,
        path: impl Into<PathBuf>,
        credential: Option<&GitCredential>,
    ) -> Result<Self, GitError> {
        let path = path.into();
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(auth_callbacks(credential.cloned()));
        let repo = git2::build::RepoBuilder::new()
            .fetch_options(fo)
            .clone(url, &path)
            .map_err(GitError::classify)?;
        info!(path = %path.display(), "cloned KB repository");
        Ok(Self::wrap(repo, path))
    }

    fn wrap(repo: Repository, workdir: PathBuf) -> Self {
        Self {
            repo: Arc::new(Mutex::new(RepoGuard(repo))),
            workdir,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Point `name` at `url`, creating the remote if necessary.  Idempotent.
    pub fn configure_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        let guard = self.repo.lock().unwrap();
        let repo = &guard.0;
        match repo.find_remote(name) {
            Ok(remote) => {
                if remote.url() != Some(url) {
                    repo.remote_set_url(name, url).map_err(GitError::classify)?;
                }
            }
            Err(_) => {
                repo.remote(name, url).map_err(GitError::classify)?;
            }
        }
        Ok(())
    }

    /// Fetch `branch` from `remote` and fast-forward the local branch.
    ///
    /// Divergent histories are never merged — the caller gets
    /// [`GitError::MergeRequired`] and the working tree is left untouched.
    pub fn pull_ff(
        &self,
        remote_name: &str,
        branch: &str,
        credential: Option<&GitCredential>,
    ) -> Result<PullOutcome, GitError> {
        let guard = self.repo.lock().unwrap();
        let repo = &guard.0;

        let mut remote = repo
            .find_remote(remote_name)
            .map_err(|_| GitError::NoRemote(remote_name.to_string()))?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(auth_callbacks(credential.cloned()));
        remote
            .fetch(&[branch], Some(&mut fo), None)
            .map_err(GitError::classify)?;

        let fetch_head = match repo.find_reference("FETCH_HEAD") {
            Ok(r) => r,
            // Nothing was fetched (empty remote): trivially up to date.
            Err(_) => return Ok(PullOutcome::UpToDate),
        };
        let fetch_commit = repo
            .reference_to_annotated_commit(&fetch_head)
            .map_err(GitError::classify)?;

        let (analysis, _) = repo
            .merge_analysis(&[&fetch_commit])
            .map_err(GitError::classify)?;

        if analysis.is_up_to_date() {
            return Ok(PullOutcome::UpToDate);
        }

        let refname = format!("refs/heads/{branch}");
        if analysis.is_unborn() {
            // Local branch does not exist yet (fresh init pulling an
            // existing remote): create it at the fetched commit.
            repo.reference(&refname, fetch_commit.id(), true, "pull: create branch")
                .map_err(GitError::classify)?;
        } else if analysis.is_fast_forward() {
            let mut reference = repo.find_reference(&refname).map_err(GitError::classify)?;
            reference
                .set_target(fetch_commit.id(), "pull: fast-forward")
                .map_err(GitError::classify)?;
        } else {
            return Err(GitError::MergeRequired);
        }

        repo.set_head(&refname).map_err(GitError::classify)?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))
            .map_err(GitError::classify)?;
        debug!(branch, "fast-forwarded");
        Ok(PullOutcome::FastForwarded)
    }

    /// Changed / created / deleted paths relative to the working-tree root.
    pub fn status(&self) -> Result<Vec<StatusEntry>, GitError> {
        let guard = self.repo.lock().unwrap();
        let repo = &guard.0;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts)).map_err(GitError::classify)?;
        let mut out = Vec::new();
        for entry in statuses.iter() {
            let path = match entry.path() {
                Some(p) => p.to_string(),
                None => continue,
            };
            // The KB lock file lives inside the working tree but is never
            // tracked or committed.
            if path == ".sync.lock" {
                continue;
            }
            let s = entry.status();
            let kind = if s.is_wt_new() || s.is_index_new() {
                ChangeKind::Created
            } else if s.is_wt_deleted() || s.is_index_deleted() {
                ChangeKind::Deleted
            } else if s.is_wt_modified() || s.is_index_modified() || s.is_wt_renamed() {
                ChangeKind::Modified
            } else {
                continue;
            };
            out.push(StatusEntry { kind, path });
        }
        Ok(out)
    }

    /// Stage exactly `paths` and commit.  Returns the new commit id, or
    /// `None` when the staged tree is identical to `HEAD` (no-op).
    pub fn commit_paths(
        &self,
        paths: &[String],
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<Option<String>, GitError> {
        let guard = self.repo.lock().unwrap();
        let repo = &guard.0;

        let mut index = repo.index().map_err(GitError::classify)?;
        for p in paths {
            let rel = Path::new(p);
            if self.workdir.join(rel).exists() {
                index.add_path(rel).map_err(GitError::classify)?;
            } else {
                // Path listed but gone from the tree: stage the deletion.
                index.remove_path(rel).map_err(GitError::classify)?;
            }
        }
        index.write().map_err(GitError::classify)?;
        let tree_id = index.write_tree().map_err(GitError::classify)?;
        let tree = repo.find_tree(tree_id).map_err(GitError::classify)?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(GitError::classify)?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) if e.code() == git2::ErrorCode::NotFound => None,
            Err(e) => return Err(GitError::classify(e)),
        };

        if let Some(ref parent_commit) = parent {
            if parent_commit.tree_id() == tree_id {
                debug!("commit skipped: staged tree equals HEAD");
                return Ok(None);
            }
        } else if tree.is_empty() {
            return Ok(None);
        }

        let sig = git2::Signature::now(author_name, author_email).map_err(GitError::classify)?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(GitError::classify)?;
        info!(commit = %oid, files = paths.len(), "committed");
        Ok(Some(oid.to_string()))
    }

    /// Push `branch` to `remote` once.  Transient-failure retry lives in
    /// [`crate::push_with_retry`].
    pub fn push(
        &self,
        remote_name: &str,
        branch: &str,
        credential: Option<&GitCredential>,
    ) -> Result<(), GitError> {
        let guard = self.repo.lock().unwrap();
        let repo = &guard.0;
        let mut remote = repo
            .find_remote(remote_name)
            .map_err(|_| GitError::NoRemote(remote_name.to_string()))?;
        let mut opts = PushOptions::new();
        opts.remote_callbacks(auth_callbacks(credential.cloned()));
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .map_err(GitError::classify)?;
        debug!(branch, remote = remote_name, "pushed");
        Ok(())
    }

    /// `HEAD` commit id, if any.  Used for diagnostics and tests.
    pub fn head_id(&self) -> Result<Option<String>, GitError> {
        let guard = self.repo.lock().unwrap();
        let repo = &guard.0;
        let result = match repo.head() {
            Ok(head) => Ok(head.target().map(|o| o.to_string())),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(GitError::classify(e)),
        };
        result
    }
}

/// Credential callbacks: supplied token for HTTPS, agent/default otherwise.
/// Bounded attempts so a rejected credential cannot loop forever.
fn auth_callbacks<'a>(credential: Option<GitCredential>) -> RemoteCallbacks<'a> {
    let mut cbs = RemoteCallbacks::new();
    let mut attempts = 0u8;
    cbs.credentials(move |_url, username, allowed| {
        attempts += 1;
        if attempts > 3 {
            return Err(git2::Error::from_str("too many auth attempts"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(cred) = &credential {
                return git2::Cred::userpass_plaintext(&cred.username, &cred.token);
            }
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            let user = username.unwrap_or("git");
            if let Ok(c) = git2::Cred::ssh_key_from_agent(user) {
                return Ok(c);
            }
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return git2::Cred::default();
        }
        Err(git2::Error::from_str("no suitable credentials"))
    });
    cbs
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
