//! CLI implementation of [`VersionControlBackend`].
//!
//! Shells out to the system `git` binary with [`tokio::process::Command`].
//! Stderr from child processes stays in the logs and error chain; it is
//! never handed to HTTP clients.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{Commit, Mergeability, MergeRequest, ObjectKind, TreeEntry, VersionControlBackend};
use crate::config::Config;
use crate::directory::RepoId;

pub struct GitCliBackend {
    root: PathBuf,
    binary: String,
    committer_name: String,
    committer_email: String,
}

impl GitCliBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.repositories.root.clone(),
            binary: config.git.binary.clone(),
            committer_name: config.git.committer_name.clone(),
            committer_email: config.git.committer_email.clone(),
        }
    }

    /// Absolute store location of a repository.
    pub fn repo_path(&self, repo: &RepoId) -> PathBuf {
        self.root.join(repo.store_path())
    }

    /// Base command running inside the repository's git dir.
    fn repo_command(&self, repo: &RepoId) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-C").arg(self.repo_path(repo));
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    async fn run(mut cmd: Command, what: &str) -> Result<std::process::Output> {
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn {what}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{what} failed (status {}): {}", output.status, stderr.trim());
        }
        Ok(output)
    }

    /// Resolve `reference` to an object id; `None` if it does not exist.
    async fn rev_parse(&self, repo: &RepoId, reference: &str) -> Result<Option<String>> {
        let mut cmd = self.repo_command(repo);
        cmd.arg("rev-parse")
            .arg("--verify")
            .arg("--quiet")
            .arg(reference);
        let output = cmd
            .output()
            .await
            .context("failed to spawn git rev-parse")?;
        if !output.status.success() {
            // `--quiet` suppresses the missing-ref complaint; anything left
            // on stderr is an infrastructure problem (bad repository path,
            // unreadable git dir).
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                bail!(
                    "git rev-parse failed (status {}): {}",
                    output.status,
                    stderr.trim()
                );
            }
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Fetch the source branch tip into the target repository's
    /// `FETCH_HEAD`, returning the tip's object id.
    async fn fetch_source_tip(&self, request: &MergeRequest) -> Result<String> {
        let mut cmd = self.repo_command(&request.target.repo);
        cmd.arg("fetch")
            .arg("--no-tags")
            .arg(self.repo_path(&request.source.repo))
            .arg(format!("refs/heads/{}", request.source.branch));
        Self::run(cmd, "git fetch").await?;

        self.rev_parse(&request.target.repo, "FETCH_HEAD")
            .await?
            .context("FETCH_HEAD missing after fetch")
    }

    /// Run `git merge-tree --write-tree` for the fetched source tip against
    /// the target branch.
    async fn merge_tree(&self, request: &MergeRequest) -> Result<SimulatedMerge> {
        let mut cmd = self.repo_command(&request.target.repo);
        cmd.arg("merge-tree")
            .arg("--write-tree")
            .arg(format!("refs/heads/{}", request.target.branch))
            .arg("FETCH_HEAD");
        let output = cmd
            .output()
            .await
            .context("failed to spawn git merge-tree")?;

        match output.status.code() {
            Some(0) => {
                let tree = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                anyhow::ensure!(!tree.is_empty(), "git merge-tree produced no tree id");
                Ok(SimulatedMerge::Clean { tree })
            }
            Some(1) => Ok(SimulatedMerge::Conflicted),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!(
                    "git merge-tree failed (status {}): {}",
                    output.status,
                    stderr.trim()
                );
            }
        }
    }
}

/// Exit-code-mapped outcome of `git merge-tree --write-tree`.
enum SimulatedMerge {
    Clean { tree: String },
    Conflicted,
}

#[async_trait::async_trait]
impl VersionControlBackend for GitCliBackend {
    #[instrument(skip(self), fields(%repo))]
    async fn init(&self, repo: &RepoId) -> Result<()> {
        let path = self.repo_path(repo);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut cmd = Command::new(&self.binary);
        cmd.arg("init").arg("--bare").arg(&path);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Self::run(cmd, "git init --bare").await?;
        debug!(path = %path.display(), "bare repository created");
        Ok(())
    }

    #[instrument(skip(self), fields(%repo))]
    async fn branches(&self, repo: &RepoId) -> Result<Vec<String>> {
        let mut cmd = self.repo_command(repo);
        cmd.arg("for-each-ref")
            .arg("--format=%(refname:short)")
            .arg("refs/heads");
        let output = Self::run(cmd, "git for-each-ref").await?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    #[instrument(skip(self), fields(%repo, branch))]
    async fn last_commit(&self, repo: &RepoId, branch: &str) -> Result<Option<Commit>> {
        let Some(tip) = self
            .rev_parse(repo, &format!("refs/heads/{branch}"))
            .await?
        else {
            return Ok(None);
        };

        let mut cmd = self.repo_command(repo);
        cmd.arg("log")
            .arg("-1")
            .arg("--format=%H%x1f%an%x1f%at%x1f%s")
            .arg(&tip);
        let output = Self::run(cmd, "git log").await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next()
            .context("git log produced no output")?;
        Ok(Some(parse_commit_line(line)?))
    }

    #[instrument(skip(self), fields(%repo, reference))]
    async fn ls_tree(&self, repo: &RepoId, reference: &str) -> Result<Vec<TreeEntry>> {
        let mut cmd = self.repo_command(repo);
        cmd.arg("ls-tree").arg(reference);
        let output = Self::run(cmd, "git ls-tree").await?;

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_tree_entry)
            .collect()
    }

    #[instrument(skip(self), fields(source = %request.source, target = %request.target))]
    async fn merge_check(&self, request: &MergeRequest) -> Result<Mergeability> {
        self.fetch_source_tip(request).await?;
        match self.merge_tree(request).await? {
            SimulatedMerge::Clean { .. } => Ok(Mergeability::Clean),
            SimulatedMerge::Conflicted => Ok(Mergeability::Conflicted),
        }
    }

    #[instrument(skip(self, message), fields(source = %request.source, target = %request.target))]
    async fn merge(&self, request: &MergeRequest, message: &str) -> Result<String> {
        let target_ref = format!("refs/heads/{}", request.target.branch);
        let target_tip = self
            .rev_parse(&request.target.repo, &target_ref)
            .await?
            .with_context(|| format!("target branch {} does not exist", request.target))?;
        let source_tip = self.fetch_source_tip(request).await?;

        let tree = match self.merge_tree(request).await? {
            SimulatedMerge::Clean { tree } => tree,
            SimulatedMerge::Conflicted => {
                bail!("merge of {} into {} conflicts", request.source, request.target)
            }
        };

        // Target tip first so the merge commit reads like `git merge` ran on
        // the target branch.
        let mut cmd = self.repo_command(&request.target.repo);
        cmd.arg("commit-tree")
            .arg(&tree)
            .arg("-p")
            .arg(&target_tip)
            .arg("-p")
            .arg(&source_tip)
            .arg("-m")
            .arg(message);
        cmd.env("GIT_AUTHOR_NAME", &self.committer_name);
        cmd.env("GIT_AUTHOR_EMAIL", &self.committer_email);
        cmd.env("GIT_COMMITTER_NAME", &self.committer_name);
        cmd.env("GIT_COMMITTER_EMAIL", &self.committer_email);
        let output = Self::run(cmd, "git commit-tree").await?;
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        anyhow::ensure!(!commit.is_empty(), "git commit-tree produced no commit id");

        // Compare-and-swap against the tip we based the merge on; a
        // concurrent push fails the update instead of being clobbered.
        let mut cmd = self.repo_command(&request.target.repo);
        cmd.arg("update-ref")
            .arg(&target_ref)
            .arg(&commit)
            .arg(&target_tip);
        Self::run(cmd, "git update-ref").await?;

        debug!(%commit, "merge commit created");
        Ok(commit)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Parse one `git log --format=%H%x1f%an%x1f%at%x1f%s` line.
fn parse_commit_line(line: &str) -> Result<Commit> {
    let mut parts = line.splitn(4, '\x1f');
    let id = parts.next().context("missing commit id")?.to_string();
    let author = parts.next().context("missing commit author")?.to_string();
    let timestamp: i64 = parts
        .next()
        .context("missing commit timestamp")?
        .parse()
        .context("unparseable commit timestamp")?;
    let summary = parts.next().unwrap_or_default().to_string();

    Ok(Commit {
        id,
        author,
        time: DateTime::from_timestamp(timestamp, 0)
            .context("commit timestamp out of range")?,
        summary,
    })
}

/// Parse one `git ls-tree` line: `<mode> <kind> <oid>\t<name>`.
fn parse_tree_entry(line: &str) -> Result<TreeEntry> {
    let (meta, name) = line
        .split_once('\t')
        .with_context(|| format!("malformed ls-tree line: {line}"))?;
    let mut fields = meta.split_whitespace();
    let mode = fields.next().context("missing tree entry mode")?.to_string();
    let kind_str = fields.next().context("missing tree entry kind")?;
    let id = fields.next().context("missing tree entry id")?.to_string();
    let kind = ObjectKind::parse(kind_str)
        .with_context(|| format!("unknown tree entry kind: {kind_str}"))?;

    Ok(TreeEntry {
        mode,
        kind,
        id,
        name: name.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tokio::io::AsyncWriteExt as _;

    use super::*;
    use crate::git::BranchRef;

    fn backend() -> GitCliBackend {
        backend_at("/nonexistent/packgate-test-root")
    }

    fn backend_at(root: impl Into<PathBuf>) -> GitCliBackend {
        GitCliBackend {
            root: root.into(),
            binary: "git".to_string(),
            committer_name: "packgate".to_string(),
            committer_email: "packgate@localhost".to_string(),
        }
    }

    async fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Run `git -C dir args...` with a fixed identity, feeding `stdin` if
    /// given, and return trimmed stdout. Panics on failure.
    async fn run_git(dir: &Path, args: &[&str], stdin: Option<&str>) -> String {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Alice Example")
            .env("GIT_AUTHOR_EMAIL", "alice@example.test")
            .env("GIT_COMMITTER_NAME", "Alice Example")
            .env("GIT_COMMITTER_EMAIL", "alice@example.test")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().unwrap();
        if let Some(input) = stdin {
            let mut handle = child.stdin.take().unwrap();
            handle.write_all(input.as_bytes()).await.unwrap();
        }
        let output = child.wait_with_output().await.unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    /// Write a commit with `files` (tree-order names) directly into the bare
    /// repository at `dir` and point `branch` at it.
    async fn seed_commit(
        dir: &Path,
        branch: &str,
        files: &[(&str, &str)],
        parent: Option<&str>,
    ) -> String {
        let mut tree_spec = String::new();
        for (name, contents) in files {
            let blob = run_git(dir, &["hash-object", "-w", "--stdin"], Some(contents)).await;
            tree_spec.push_str(&format!("100644 blob {blob}\t{name}\n"));
        }
        let tree = run_git(dir, &["mktree"], Some(&tree_spec)).await;
        let commit = match parent {
            Some(parent) => {
                run_git(dir, &["commit-tree", &tree, "-p", parent, "-m", "seed"], None).await
            }
            None => run_git(dir, &["commit-tree", &tree, "-m", "seed"], None).await,
        };
        run_git(
            dir,
            &["update-ref", &format!("refs/heads/{branch}"), &commit],
            None,
        )
        .await;
        commit
    }

    // ── Output parsing ──────────────────────────────────────────────────

    #[test]
    fn parse_commit_line_roundtrip() {
        let line = "a1b2c3\x1fAlice Example\x1f1700000000\x1fadd widget support";
        let commit = parse_commit_line(line).unwrap();
        assert_eq!(commit.id, "a1b2c3");
        assert_eq!(commit.author, "Alice Example");
        assert_eq!(commit.time, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        assert_eq!(commit.summary, "add widget support");
    }

    #[test]
    fn parse_commit_line_rejects_bad_timestamp() {
        assert!(parse_commit_line("abc\x1fAlice\x1fnot-a-number\x1fsubject").is_err());
    }

    #[test]
    fn parse_tree_entry_blob() {
        let entry =
            parse_tree_entry("100644 blob 9daeafb9864cf43055ae93beb0afd6c7d144bfa4\tREADME.md")
                .unwrap();
        assert_eq!(entry.mode, "100644");
        assert_eq!(entry.kind, ObjectKind::Blob);
        assert_eq!(entry.name, "README.md");
    }

    #[test]
    fn parse_tree_entry_subdirectory_and_spaces() {
        let entry =
            parse_tree_entry("040000 tree 1234567890abcdef1234567890abcdef12345678\tmy docs")
                .unwrap();
        assert_eq!(entry.kind, ObjectKind::Tree);
        assert_eq!(entry.name, "my docs");
    }

    #[test]
    fn parse_tree_entry_submodule() {
        let entry =
            parse_tree_entry("160000 commit 1234567890abcdef1234567890abcdef12345678\tvendor")
                .unwrap();
        assert_eq!(entry.kind, ObjectKind::Commit);
    }

    #[test]
    fn parse_tree_entry_rejects_garbage() {
        assert!(parse_tree_entry("not a tree line").is_err());
        assert!(parse_tree_entry("100644 widget abc\tname").is_err());
    }

    // ── Path mapping ────────────────────────────────────────────────────

    #[test]
    fn repo_path_layout() {
        let backend = backend();
        let path = backend.repo_path(&RepoId::new("alice", "widgets"));
        assert_eq!(
            path,
            PathBuf::from("/nonexistent/packgate-test-root/alice/widgets.git")
        );
    }

    // ── Against a real repository ───────────────────────────────────────

    #[tokio::test]
    async fn branches_and_last_commit_on_a_seeded_repository() {
        if !git_available().await {
            eprintln!("git binary not found; skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let backend = backend_at(root.path());
        let repo = RepoId::new("alice", "widgets");
        backend.init(&repo).await.unwrap();

        assert!(backend.branches(&repo).await.unwrap().is_empty());
        assert!(backend.last_commit(&repo, "main").await.unwrap().is_none());

        let dir = backend.repo_path(&repo);
        let tip = seed_commit(&dir, "main", &[("README.md", "hello\n")], None).await;

        assert_eq!(
            backend.branches(&repo).await.unwrap(),
            vec!["main".to_string()]
        );
        let commit = backend.last_commit(&repo, "main").await.unwrap().unwrap();
        assert_eq!(commit.id, tip);
        assert_eq!(commit.author, "Alice Example");
        assert_eq!(commit.summary, "seed");
        assert!(backend.last_commit(&repo, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ls_tree_lists_seeded_entries() {
        if !git_available().await {
            eprintln!("git binary not found; skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let backend = backend_at(root.path());
        let repo = RepoId::new("alice", "widgets");
        backend.init(&repo).await.unwrap();

        let dir = backend.repo_path(&repo);
        seed_commit(
            &dir,
            "main",
            &[("a.txt", "alpha\n"), ("b.txt", "beta\n")],
            None,
        )
        .await;

        let entries = backend.ls_tree(&repo, "main").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|entry| entry.kind == ObjectKind::Blob && entry.mode == "100644"));
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[1].name, "b.txt");
    }

    #[tokio::test]
    async fn merge_produces_a_merge_commit_on_the_target_branch() {
        if !git_available().await {
            eprintln!("git binary not found; skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let backend = backend_at(root.path());
        let repo = RepoId::new("alice", "widgets");
        backend.init(&repo).await.unwrap();

        let dir = backend.repo_path(&repo);
        let base = seed_commit(&dir, "main", &[("a.txt", "base\n")], None).await;
        seed_commit(
            &dir,
            "feature",
            &[("a.txt", "base\n"), ("b.txt", "feature\n")],
            Some(&base),
        )
        .await;

        let request = MergeRequest {
            source: BranchRef::new(repo.clone(), "feature"),
            target: BranchRef::new(repo.clone(), "main"),
        };
        assert_eq!(
            backend.merge_check(&request).await.unwrap(),
            Mergeability::Clean
        );

        let merged = backend
            .merge(&request, "merge feature into main")
            .await
            .unwrap();
        let tip = backend.last_commit(&repo, "main").await.unwrap().unwrap();
        assert_eq!(tip.id, merged);
        assert_eq!(tip.summary, "merge feature into main");

        // The merged tree carries both sides.
        let entries = backend.ls_tree(&repo, "main").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn conflicting_branches_refuse_to_merge_and_leave_the_target_alone() {
        if !git_available().await {
            eprintln!("git binary not found; skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let backend = backend_at(root.path());
        let repo = RepoId::new("alice", "widgets");
        backend.init(&repo).await.unwrap();

        let dir = backend.repo_path(&repo);
        let base = seed_commit(&dir, "main", &[("a.txt", "base\n")], None).await;
        let left = seed_commit(&dir, "main", &[("a.txt", "left\n")], Some(&base)).await;
        seed_commit(&dir, "feature", &[("a.txt", "right\n")], Some(&base)).await;

        let request = MergeRequest {
            source: BranchRef::new(repo.clone(), "feature"),
            target: BranchRef::new(repo.clone(), "main"),
        };
        assert_eq!(
            backend.merge_check(&request).await.unwrap(),
            Mergeability::Conflicted
        );
        assert!(backend.merge(&request, "merge").await.is_err());

        // The target branch still points at its pre-merge tip.
        let tip = backend.last_commit(&repo, "main").await.unwrap().unwrap();
        assert_eq!(tip.id, left);
    }

    // ── Missing repository surfaces as an error ─────────────────────────

    #[tokio::test]
    async fn branches_on_missing_repository_errors() {
        let backend = backend();
        let result = backend.branches(&RepoId::new("ghost", "repo")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn merge_on_missing_target_errors() {
        let backend = backend();
        let request = MergeRequest {
            source: BranchRef::new(RepoId::new("ghost", "repo"), "feature"),
            target: BranchRef::new(RepoId::new("ghost", "repo"), "main"),
        };
        assert!(backend.merge(&request, "merge").await.is_err());
    }
}
