//! Version-control operations.
//!
//! Everything the gateway asks of git sits behind the
//! [`VersionControlBackend`] trait so authorization, protocol, and merge
//! logic stay testable without a `git` install.  The production
//! implementation ([`cli::GitCliBackend`]) shells out to the system binary
//! with `tokio::process::Command`; pack-file and object-model mechanics are
//! never reimplemented here.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::directory::RepoId;

pub mod cli;
pub mod merge;
pub mod process;

pub use cli::GitCliBackend;
pub use merge::{MergeCoordinator, PullRequestLedger};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A branch in a specific repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub repo: RepoId,
    pub branch: String,
}

impl BranchRef {
    pub fn new(repo: RepoId, branch: impl Into<String>) -> Self {
        Self {
            repo,
            branch: branch.into(),
        }
    }
}

impl std::fmt::Display for BranchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repo, self.branch)
    }
}

/// Bring `source` into `target`.  Source and target may live in the same
/// repository or across a fork pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub source: BranchRef,
    pub target: BranchRef,
}

/// Answer of a non-mutating merge simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mergeability {
    /// The simulation produced a merged tree with no conflicts.
    Clean,
    /// Overlapping edits; a real merge would stop with conflicts.
    Conflicted,
    /// One of the branches does not exist.
    MissingBranch(BranchRef),
}

impl Mergeability {
    pub fn is_clean(&self) -> bool {
        matches!(self, Mergeability::Clean)
    }
}

/// Commit metadata for display surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: String,
    pub author: String,
    pub time: DateTime<Utc>,
    pub summary: String,
}

/// One row of tree listing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: ObjectKind,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    /// Submodule pointer.
    Commit,
}

impl ObjectKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Narrow seam over the repository store.
#[async_trait::async_trait]
pub trait VersionControlBackend: Send + Sync {
    /// Create an empty bare repository at the store location for `repo`.
    async fn init(&self, repo: &RepoId) -> Result<()>;

    /// Branch names (`refs/heads/` stripped).
    async fn branches(&self, repo: &RepoId) -> Result<Vec<String>>;

    /// Latest commit on `branch`; `None` if the branch does not exist.
    async fn last_commit(&self, repo: &RepoId, branch: &str) -> Result<Option<Commit>>;

    /// Entries of the tree at `reference` (branch, tag, or object id).
    async fn ls_tree(&self, repo: &RepoId, reference: &str) -> Result<Vec<TreeEntry>>;

    /// Non-mutating merge simulation.  Assumes both branches exist; callers
    /// that cannot guarantee that go through
    /// [`merge::MergeCoordinator::is_mergeable`].
    async fn merge_check(&self, request: &MergeRequest) -> Result<Mergeability>;

    /// Perform the merge inside the target repository and return the merge
    /// commit id.  The target branch only moves if it still points where the
    /// merge computation observed it.
    async fn merge(&self, request: &MergeRequest, message: &str) -> Result<String>;
}
