//! Access decision chain.
//!
//! Every repository route runs the same ordered stage walk before any git
//! process is spawned:
//!
//! 1. Existence      — unknown repository short-circuits to 404, before
//!                     authentication, so probing with valid credentials
//!                     learns nothing
//! 2. Visibility     — private repositories demand authentication
//! 3. Operation      — reads of public repositories are granted here,
//!                     anonymously; writes always demand authentication
//! 4. Authentication — session identity if present, else Basic credentials
//!                     against the directory
//! 5. Membership     — owner/collaborator authority; failure produces the
//!                     same 404 a missing repository does
//!
//! Stages return tagged outcomes and only the fixed composer in
//! [`DecisionChain::evaluate`] may terminate the walk.

use anyhow::{Context, Result};

use crate::auth::{basic, policy};
use crate::directory::{DirectoryBackend, Repository};

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

/// What the request wants to do to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// One gated request, before any decision has been made.
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub owner: &'a str,
    /// Repository name with any `.git` suffix already stripped.
    pub repo: &'a str,
    pub operation: Operation,
    /// Raw `Authorization` header value, if the client sent one.
    pub authorization: Option<&'a str>,
    /// Pre-authenticated identity supplied by an embedding service's
    /// session layer.  Skips Basic verification but not membership.
    pub session_user: Option<&'a str>,
}

/// Terminal rejection of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Credentials missing, malformed, unknown, or wrong.  Always the same
    /// challenge, whatever went wrong.
    AuthenticationRequired,
    /// Repository missing or hidden from this viewer; indistinguishable.
    NotFound,
}

/// Successful outcome: the repository record plus the identity the request
/// runs as (`None` for anonymous public reads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub repository: Repository,
    pub user: Option<String>,
}

/// Chain result.  Infrastructure failures (directory I/O) are `Err` at the
/// `evaluate` level, never a `Decision`.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    Forward(AccessGrant),
    Reject(Rejection),
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Stage {
    Existence,
    Visibility,
    Operation,
    Authentication,
    Membership,
}

const STAGES: [Stage; 5] = [
    Stage::Existence,
    Stage::Visibility,
    Stage::Operation,
    Stage::Authentication,
    Stage::Membership,
];

enum StageOutcome {
    Next,
    Grant,
    Deny(Rejection),
}

/// State accumulated along the walk.
#[derive(Default)]
struct Walk {
    repository: Option<Repository>,
    identity: Option<String>,
    authentication_required: bool,
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

pub struct DecisionChain<'a> {
    directory: &'a dyn DirectoryBackend,
}

impl<'a> DecisionChain<'a> {
    pub fn new(directory: &'a dyn DirectoryBackend) -> Self {
        Self { directory }
    }

    /// Run the stage walk for one request.
    pub async fn evaluate(&self, request: &AccessRequest<'_>) -> Result<Decision> {
        let mut walk = Walk::default();
        for stage in STAGES {
            match self.run_stage(stage, request, &mut walk).await? {
                StageOutcome::Next => continue,
                StageOutcome::Deny(rejection) => return Ok(Decision::Reject(rejection)),
                StageOutcome::Grant => {
                    let repository = walk
                        .repository
                        .take()
                        .context("stage granted access before the repository was resolved")?;
                    return Ok(Decision::Forward(AccessGrant {
                        repository,
                        user: walk.identity.take(),
                    }));
                }
            }
        }
        anyhow::bail!("decision chain ended without a verdict")
    }

    async fn run_stage(
        &self,
        stage: Stage,
        request: &AccessRequest<'_>,
        walk: &mut Walk,
    ) -> Result<StageOutcome> {
        Ok(match stage {
            Stage::Existence => {
                match self.directory.repository(request.owner, request.repo).await? {
                    Some(repository) => {
                        walk.repository = Some(repository);
                        StageOutcome::Next
                    }
                    None => StageOutcome::Deny(Rejection::NotFound),
                }
            }

            Stage::Visibility => {
                let repository = walk
                    .repository
                    .as_ref()
                    .context("visibility stage ran before existence")?;
                if !repository.is_public {
                    walk.authentication_required = true;
                }
                StageOutcome::Next
            }

            Stage::Operation => match request.operation {
                Operation::Read if !walk.authentication_required => StageOutcome::Grant,
                Operation::Read => StageOutcome::Next,
                Operation::Write => {
                    walk.authentication_required = true;
                    StageOutcome::Next
                }
            },

            // Only reached once some stage demanded authentication.
            Stage::Authentication => {
                if let Some(user) = request.session_user {
                    walk.identity = Some(user.to_string());
                    return Ok(StageOutcome::Next);
                }
                let Some(header) = request.authorization else {
                    return Ok(StageOutcome::Deny(Rejection::AuthenticationRequired));
                };
                let Some(credentials) = basic::parse_basic(header) else {
                    return Ok(StageOutcome::Deny(Rejection::AuthenticationRequired));
                };
                let Some(account) = self
                    .directory
                    .account_by_username(&credentials.username)
                    .await?
                else {
                    return Ok(StageOutcome::Deny(Rejection::AuthenticationRequired));
                };
                if !basic::verify(&credentials, &account.password_hash) {
                    return Ok(StageOutcome::Deny(Rejection::AuthenticationRequired));
                }
                walk.identity = Some(account.username);
                StageOutcome::Next
            }

            Stage::Membership => {
                let repository = walk
                    .repository
                    .as_ref()
                    .context("membership stage ran before existence")?;
                let collaborators = self
                    .directory
                    .collaborators(request.owner, request.repo)
                    .await?;
                let viewer = walk.identity.as_deref();
                let allowed = match request.operation {
                    Operation::Read => {
                        policy::has_read_authority(repository, viewer, &collaborators)
                    }
                    Operation::Write => {
                        policy::has_write_authority(repository, viewer, &collaborators)
                    }
                };
                if allowed {
                    StageOutcome::Grant
                } else {
                    StageOutcome::Deny(Rejection::NotFound)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use base64::Engine;

    use super::*;
    use crate::auth::basic::credential_digest;
    use crate::directory::MemoryDirectory;

    fn fixture() -> MemoryDirectory {
        let mut dir = MemoryDirectory::new();
        dir.add_account("alice", &credential_digest("alice", "alicepw"));
        dir.add_account("bob", &credential_digest("bob", "bobpw"));
        dir.add_account("carol", &credential_digest("carol", "carolpw"));
        dir.add_repository("alice", "pub", true);
        dir.add_repository("alice", "secret", false);
        dir.add_collaborator("alice", "secret", "bob");
        dir
    }

    fn basic_header(username: &str, password: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
        )
    }

    async fn decide(
        dir: &MemoryDirectory,
        owner: &str,
        repo: &str,
        operation: Operation,
        authorization: Option<&str>,
    ) -> Decision {
        DecisionChain::new(dir)
            .evaluate(&AccessRequest {
                owner,
                repo,
                operation,
                authorization,
                session_user: None,
            })
            .await
            .unwrap()
    }

    fn granted_user(decision: Decision) -> Option<String> {
        match decision {
            Decision::Forward(grant) => grant.user,
            Decision::Reject(rejection) => panic!("expected grant, got {rejection:?}"),
        }
    }

    // ── Existence ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_repository_is_not_found_even_with_valid_credentials() {
        let dir = fixture();
        let auth = basic_header("alice", "alicepw");
        let decision = decide(&dir, "alice", "ghost", Operation::Read, Some(&auth)).await;
        assert_eq!(decision, Decision::Reject(Rejection::NotFound));
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let dir = fixture();
        let decision = decide(&dir, "nobody", "pub", Operation::Read, None).await;
        assert_eq!(decision, Decision::Reject(Rejection::NotFound));
    }

    // ── Anonymous access ────────────────────────────────────────────────

    #[tokio::test]
    async fn anonymous_read_of_public_repository_is_granted() {
        let dir = fixture();
        let decision = decide(&dir, "alice", "pub", Operation::Read, None).await;
        assert_eq!(granted_user(decision), None);
    }

    #[tokio::test]
    async fn anonymous_read_of_private_repository_demands_authentication() {
        let dir = fixture();
        let decision = decide(&dir, "alice", "secret", Operation::Read, None).await;
        assert_eq!(decision, Decision::Reject(Rejection::AuthenticationRequired));
    }

    #[tokio::test]
    async fn anonymous_push_demands_authentication_even_on_public() {
        let dir = fixture();
        let decision = decide(&dir, "alice", "pub", Operation::Write, None).await;
        assert_eq!(decision, Decision::Reject(Rejection::AuthenticationRequired));
    }

    // ── Authentication ──────────────────────────────────────────────────

    #[tokio::test]
    async fn owner_reads_private_repository() {
        let dir = fixture();
        let auth = basic_header("alice", "alicepw");
        let decision = decide(&dir, "alice", "secret", Operation::Read, Some(&auth)).await;
        assert_eq!(granted_user(decision), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn wrong_password_is_an_authentication_failure() {
        let dir = fixture();
        let auth = basic_header("alice", "wrong");
        let decision = decide(&dir, "alice", "secret", Operation::Read, Some(&auth)).await;
        assert_eq!(decision, Decision::Reject(Rejection::AuthenticationRequired));
    }

    #[tokio::test]
    async fn unknown_account_is_an_authentication_failure() {
        let dir = fixture();
        let auth = basic_header("mallory", "whatever");
        let decision = decide(&dir, "alice", "secret", Operation::Read, Some(&auth)).await;
        assert_eq!(decision, Decision::Reject(Rejection::AuthenticationRequired));
    }

    #[tokio::test]
    async fn malformed_authorization_variants_all_fold_into_one_challenge() {
        let dir = fixture();
        let no_colon = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("alicealicepw")
        );
        for header in [
            "Bearer sometoken",
            "Basic",
            "Basic not!base64!",
            no_colon.as_str(),
        ] {
            let decision =
                decide(&dir, "alice", "secret", Operation::Read, Some(header)).await;
            assert_eq!(
                decision,
                Decision::Reject(Rejection::AuthenticationRequired),
                "header {header:?}"
            );
        }
    }

    // ── Membership ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn collaborator_reads_and_pushes_private_repository() {
        let dir = fixture();
        let auth = basic_header("bob", "bobpw");
        let read = decide(&dir, "alice", "secret", Operation::Read, Some(&auth)).await;
        assert_eq!(granted_user(read), Some("bob".to_string()));
        let write = decide(&dir, "alice", "secret", Operation::Write, Some(&auth)).await;
        assert_eq!(granted_user(write), Some("bob".to_string()));
    }

    #[tokio::test]
    async fn stranger_with_valid_login_sees_private_repository_as_missing() {
        let dir = fixture();
        let auth = basic_header("carol", "carolpw");
        let decision = decide(&dir, "alice", "secret", Operation::Read, Some(&auth)).await;
        assert_eq!(decision, Decision::Reject(Rejection::NotFound));
    }

    #[tokio::test]
    async fn stranger_push_to_public_repository_is_not_found() {
        let dir = fixture();
        let auth = basic_header("carol", "carolpw");
        let decision = decide(&dir, "alice", "pub", Operation::Write, Some(&auth)).await;
        assert_eq!(decision, Decision::Reject(Rejection::NotFound));
    }

    #[tokio::test]
    async fn owner_pushes_public_repository() {
        let dir = fixture();
        let auth = basic_header("alice", "alicepw");
        let decision = decide(&dir, "alice", "pub", Operation::Write, Some(&auth)).await;
        assert_eq!(granted_user(decision), Some("alice".to_string()));
    }

    // ── Session identity ────────────────────────────────────────────────

    #[tokio::test]
    async fn session_identity_skips_basic_verification() {
        let dir = fixture();
        let decision = DecisionChain::new(&dir)
            .evaluate(&AccessRequest {
                owner: "alice",
                repo: "secret",
                operation: Operation::Read,
                authorization: None,
                session_user: Some("alice"),
            })
            .await
            .unwrap();
        assert_eq!(granted_user(decision), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn session_identity_is_still_subject_to_membership() {
        let dir = fixture();
        let decision = DecisionChain::new(&dir)
            .evaluate(&AccessRequest {
                owner: "alice",
                repo: "secret",
                operation: Operation::Read,
                authorization: None,
                session_user: Some("carol"),
            })
            .await
            .unwrap();
        assert_eq!(decision, Decision::Reject(Rejection::NotFound));
    }
}
