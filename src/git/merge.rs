//! Merge coordination.
//!
//! Mergeability questions and the merge itself have to live next to the
//! repository filesystem; the pull-request record lives in the
//! business-logic service.  [`MergeCoordinator`] sequences the two sides:
//! branch existence and simulation through the [`VersionControlBackend`],
//! then, only once git has committed the merge, the status flip through
//! [`PullRequestLedger`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, instrument};

use super::{BranchRef, Mergeability, MergeRequest, VersionControlBackend};

/// Persistence seam owned by the business-logic service.
#[async_trait::async_trait]
pub trait PullRequestLedger: Send + Sync {
    /// Record that the pull request tracking `request` merged as `commit`.
    /// Called only after the merge commit exists on the target branch.
    async fn mark_merged(&self, request: &MergeRequest, commit: &str) -> Result<()>;
}

pub struct MergeCoordinator {
    backend: Arc<dyn VersionControlBackend>,
}

impl MergeCoordinator {
    pub fn new(backend: Arc<dyn VersionControlBackend>) -> Self {
        Self { backend }
    }

    /// Existence-checked, non-mutating mergeability answer.
    #[instrument(skip(self), fields(source = %request.source, target = %request.target))]
    pub async fn is_mergeable(&self, request: &MergeRequest) -> Result<Mergeability> {
        if let Some(missing) = self.missing_branch(request).await? {
            return Ok(Mergeability::MissingBranch(missing));
        }
        self.backend.merge_check(request).await
    }

    /// Merge `source` into `target` and return the merge commit id.
    ///
    /// Mergeability is re-checked immediately beforehand; the race against a
    /// concurrent conflicting push narrows to the git-side ref
    /// compare-and-swap.  Callers that track the merge in a pull-request
    /// record go through [`merge_and_mark`](Self::merge_and_mark) instead so
    /// the record only ever flips after git has committed.
    #[instrument(skip(self, message), fields(source = %request.source, target = %request.target))]
    pub async fn merge(&self, request: &MergeRequest, message: &str) -> Result<String> {
        match self.is_mergeable(request).await? {
            Mergeability::Clean => {}
            Mergeability::Conflicted => {
                bail!("merge of {} into {} conflicts", request.source, request.target)
            }
            Mergeability::MissingBranch(branch) => bail!("branch {branch} does not exist"),
        }

        let commit = self.backend.merge(request, message).await?;
        info!(%commit, "merge completed");
        Ok(commit)
    }

    /// [`merge`](Self::merge), then flip the pull-request status.
    ///
    /// A failed merge leaves the ledger untouched; a failed ledger write
    /// after a committed merge surfaces as an error rather than being
    /// swallowed, since the two sides now disagree.
    #[instrument(skip(self, ledger, message), fields(source = %request.source, target = %request.target))]
    pub async fn merge_and_mark(
        &self,
        request: &MergeRequest,
        message: &str,
        ledger: &dyn PullRequestLedger,
    ) -> Result<String> {
        let commit = self.merge(request, message).await?;
        ledger
            .mark_merged(request, &commit)
            .await
            .context("merge committed but pull request status update failed")?;
        Ok(commit)
    }

    async fn missing_branch(&self, request: &MergeRequest) -> Result<Option<BranchRef>> {
        for branch_ref in [&request.source, &request.target] {
            let exists = self
                .backend
                .last_commit(&branch_ref.repo, &branch_ref.branch)
                .await?
                .is_some();
            if !exists {
                return Ok(Some(branch_ref.clone()));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
