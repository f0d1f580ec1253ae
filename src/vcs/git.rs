//! git CLI backend
//!
//! Implements `VersionControl` by running git with structured arguments.
//! Paths, messages and author fields travel as separate argv entries, so no
//! request field is ever interpreted by a shell. Every invocation also sets
//! `GIT_LITERAL_PATHSPECS`, so a file named `:(glob)*` names only itself.

use crate::error::{ReposerveError, ReposerveResult};
use crate::process::CommandRunner;
use crate::vcs::{Author, CommitOutcome, DiffTarget, SyncRequest, VersionControl, VersionEntry};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

const FIELD_SEP: char = '\u{1f}';
const LITERAL_PATHSPECS: (&str, &str) = ("GIT_LITERAL_PATHSPECS", "1");

/// Reported by `commit_all` while `.git/MERGE_HEAD` exists
const MERGE_IN_PROGRESS: &str =
    "merge in progress - you had conflicts or a manual merge is in progress";
const RECORD_SEP: char = '\u{1e}';

/// Messages git prints when a commit has nothing to record
const NOTHING_TO_COMMIT: &[&str] = &[
    "nothing to commit",
    "no changes added to commit",
    "nothing added to commit",
];

/// Messages git prints when a path simply has no history yet
const NO_HISTORY: &[&str] = &[
    "not a git repository",
    "does not have any commits yet",
    "bad default revision",
];

/// Version control backed by the git executable
pub struct GitBackend {
    git: String,
    runner: CommandRunner,
    remote: String,
    default_author: Author,
}

impl GitBackend {
    /// Create a git backend
    pub fn new(git: impl Into<String>, runner: CommandRunner, remote: impl Into<String>) -> Self {
        Self {
            git: git.into(),
            runner,
            remote: remote.into(),
            default_author: Author::default(),
        }
    }

    /// Author used when a request names none
    pub fn with_default_author(mut self, author: Author) -> Self {
        self.default_author = author;
        self
    }

    /// `-c user.name=… -c user.email=…` for the effective author
    fn identity_args(&self, author: &Author) -> Vec<String> {
        let mut args = Vec::new();
        let name = author.name.as_ref().or(self.default_author.name.as_ref());
        let email = author.email.as_ref().or(self.default_author.email.as_ref());
        if let Some(name) = name {
            args.push("-c".to_string());
            args.push(format!("user.name={}", name));
        }
        if let Some(email) = email {
            args.push("-c".to_string());
            args.push(format!("user.email={}", email));
        }
        args
    }

    async fn git<S: AsRef<std::ffi::OsStr>>(
        &self,
        repo: &Path,
        args: &[S],
    ) -> ReposerveResult<crate::process::CommandOutput> {
        self.runner
            .run_with_env(&self.git, args, repo, &[LITERAL_PATHSPECS])
            .await
    }

    async fn git_ok<S: AsRef<std::ffi::OsStr>>(
        &self,
        repo: &Path,
        args: &[S],
    ) -> ReposerveResult<String> {
        Ok(self.git(repo, args).await?.into_success()?.stdout_str())
    }
}

/// Reject revision or branch names git would parse as options
fn check_revision(name: &'static str, value: &str) -> ReposerveResult<()> {
    if value.is_empty() || value.starts_with('-') || value.contains(char::is_whitespace) {
        return Err(ReposerveError::InvalidArgument {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Reject clone sources git would parse as options
fn check_url(url: &str) -> ReposerveResult<()> {
    if url.is_empty() || url.starts_with('-') || url.contains(char::is_whitespace) {
        return Err(ReposerveError::InvalidArgument {
            name: "repository url",
            value: url.to_string(),
        });
    }
    Ok(())
}

fn is_nothing_to_commit(output: &str) -> bool {
    NOTHING_TO_COMMIT.iter().any(|m| output.contains(m))
}

/// Parse `git log` output written with `FIELD_SEP`/`RECORD_SEP`
fn parse_history(raw: &str) -> Vec<VersionEntry> {
    raw.split(RECORD_SEP)
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let fields: Vec<&str> = record.split(FIELD_SEP).collect();
            if fields.len() < 5 {
                return None;
            }
            Some(VersionEntry {
                version: fields[0].to_string(),
                date: fields[1].to_string(),
                author: fields[2].to_string(),
                parents: fields[3].split_whitespace().map(str::to_string).collect(),
                comment: fields[4].to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl VersionControl for GitBackend {
    async fn current_version(&self, repo: &Path, path: &str) -> ReposerveResult<String> {
        let output = self
            .git(repo, &["log", "-n", "1", "--pretty=format:%H", "--", path])
            .await?;

        if output.success {
            return Ok(output.stdout_str().trim().to_string());
        }

        let stderr = output.stderr_str();
        if NO_HISTORY.iter().any(|m| stderr.contains(m)) {
            debug!("No history for {} in {}", path, repo.display());
            return Ok(String::new());
        }
        Err(ReposerveError::backend(&output.command, output.diagnostics()))
    }

    async fn content_at(&self, repo: &Path, path: &str, version: &str) -> ReposerveResult<Vec<u8>> {
        check_revision("version", version)?;
        let spec = format!("{}:{}", version, path);
        let output = self.git(repo, &["show", spec.as_str()]).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(ReposerveError::backend(&output.command, output.diagnostics()))
        }
    }

    async fn commit(
        &self,
        repo: &Path,
        path: &str,
        author: &Author,
        message: &str,
    ) -> ReposerveResult<CommitOutcome> {
        let identity = self.identity_args(author);

        let mut add = identity.clone();
        add.extend(["add", "--", path].map(String::from));
        self.git(repo, &add).await?.into_success()?;

        let mut commit = identity;
        commit.extend(["commit", "-m", message, "--", path].map(String::from));
        let output = self.git(repo, &commit).await?;

        if output.success {
            info!("Committed {} in {}", path, repo.display());
            return Ok(CommitOutcome::Committed);
        }

        let combined = format!("{}\n{}", output.stdout_str(), output.stderr_str());
        if is_nothing_to_commit(&combined) {
            debug!("Nothing to commit for {}", path);
            return Ok(CommitOutcome::NothingToCommit);
        }
        Err(ReposerveError::backend(&output.command, output.diagnostics()))
    }

    async fn history(&self, repo: &Path, path: &str) -> ReposerveResult<Vec<VersionEntry>> {
        let format = format!(
            "--pretty=format:%h{s}%ad{s}%an{s}%p{s}%f{r}",
            s = "%x1f",
            r = "%x1e"
        );
        let target = if path.is_empty() { "." } else { path };
        let output = self
            .git(repo, &["log", format.as_str(), "--", target])
            .await?;

        if !output.success {
            let stderr = output.stderr_str();
            if NO_HISTORY.iter().any(|m| stderr.contains(m)) {
                return Ok(Vec::new());
            }
            return Err(ReposerveError::backend(&output.command, output.diagnostics()));
        }
        Ok(parse_history(&output.stdout_str()))
    }

    async fn sync(&self, repo: &Path, request: &SyncRequest) -> ReposerveResult<String> {
        check_revision("branch", &request.branch)?;
        let identity = self.identity_args(&request.author);
        let mut transcript = String::new();

        let mut add = identity.clone();
        add.extend(["add", "-A"].map(String::from));
        transcript.push_str(&self.git_ok(repo, &add).await?);

        let message = if request.message.trim().is_empty() {
            "SYNC"
        } else {
            request.message.as_str()
        };
        let mut commit = identity.clone();
        commit.extend(["commit", "-m", message].map(String::from));
        let output = self.git(repo, &commit).await?;
        let combined = format!("{}\n{}", output.stdout_str(), output.stderr_str());
        if !output.success && !is_nothing_to_commit(&combined) {
            return Err(ReposerveError::backend(&output.command, output.diagnostics()));
        }
        transcript.push_str(&combined);

        let mut pull = identity;
        pull.extend(["pull", "--no-edit", self.remote.as_str(), request.branch.as_str()].map(String::from));
        transcript.push_str(&self.git_ok(repo, &pull).await?);

        let push = ["push", self.remote.as_str(), request.branch.as_str()];
        let output = self.git(repo, &push).await?.into_success()?;
        transcript.push_str(&output.stdout_str());
        transcript.push_str(&output.stderr_str());

        info!("Synced {} with {}/{}", repo.display(), self.remote, request.branch);
        Ok(transcript)
    }

    async fn checkout_from_remote(
        &self,
        repo: &Path,
        branch: &str,
        path: &str,
    ) -> ReposerveResult<String> {
        check_revision("branch", branch)?;
        let mut transcript = self.git_ok(repo, &["fetch", self.remote.as_str()]).await?;

        let source = format!("{}/{}", self.remote, branch);
        transcript.push_str(
            &self
                .git_ok(repo, &["checkout", source.as_str(), "--", path])
                .await?,
        );
        info!("Checked out {} from {}", path, source);
        Ok(transcript)
    }

    async fn status(&self, repo: &Path) -> ReposerveResult<String> {
        self.git_ok(repo, &["status"]).await
    }

    async fn log(&self, repo: &Path, limit: usize) -> ReposerveResult<String> {
        let limit = format!("-{}", limit.max(1));
        self.git_ok(repo, &["log", limit.as_str(), "--pretty=format:%h\t%aN\t%cD\t%s"])
            .await
    }

    async fn commit_all(&self, repo: &Path, author: &Author, message: &str) -> ReposerveResult<String> {
        if fs::try_exists(repo.join(".git").join("MERGE_HEAD"))
            .await
            .unwrap_or(false)
        {
            info!("Not committing {}: merge in progress", repo.display());
            return Ok(MERGE_IN_PROGRESS.to_string());
        }

        let mut commit = self.identity_args(author);
        commit.extend(["commit", "-a", "-m", message].map(String::from));
        let output = self.git(repo, &commit).await?;
        let combined = format!("{}{}", output.stdout_str(), output.stderr_str());
        if !output.success && !is_nothing_to_commit(&combined) {
            return Err(ReposerveError::backend(&output.command, output.diagnostics()));
        }
        Ok(combined)
    }

    async fn diff(&self, repo: &Path, target: &DiffTarget) -> ReposerveResult<String> {
        match target {
            DiffTarget::Remote(branch) => {
                check_revision("branch", branch)?;
                let upstream = format!("{}/{}", self.remote, branch);
                self.git_ok(repo, &["diff", upstream.as_str()]).await
            }
            DiffTarget::Commit(commit) => {
                check_revision("commit", commit)?;
                let parent = format!("{}~1", commit);
                self.git_ok(repo, &["diff", parent.as_str(), commit.as_str()])
                    .await
            }
        }
    }

    async fn branches(&self, repo: &Path) -> ReposerveResult<String> {
        self.git_ok(repo, &["branch", "-a"]).await
    }

    async fn remote_url(&self, repo: &Path) -> ReposerveResult<String> {
        let key = format!("remote.{}.url", self.remote);
        let output = self.git(repo, &["config", "--get", key.as_str()]).await?;
        // exit 1: the key is unset
        match output.code {
            Some(0) => Ok(output.stdout_str().trim().to_string()),
            Some(1) => Ok(String::new()),
            _ => Err(ReposerveError::backend(&output.command, output.diagnostics())),
        }
    }

    async fn graph(&self, repo: &Path, limit: usize) -> ReposerveResult<String> {
        let limit = format!("-{}", limit.max(1));
        self.git_ok(repo, &["log", "--graph", limit.as_str(), "--oneline", "--decorate"])
            .await
    }

    async fn clone_repository(&self, parent: &Path, url: &str, name: &str) -> ReposerveResult<String> {
        check_url(url)?;
        let target = parent.join(name);
        if fs::try_exists(&target).await.unwrap_or(false) {
            return Err(ReposerveError::AlreadyExists(target));
        }
        let output = self
            .git(parent, &["clone", "--recursive", "--", url, name])
            .await?
            .into_success()?;
        info!("Cloned {} into {}", url, target.display());
        Ok(format!("{}{}", output.stdout_str(), output.stderr_str()))
    }

    fn backend_name(&self) -> &'static str {
        "git"
    }
}
