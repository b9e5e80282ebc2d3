//! Collaboration invitation codes.
//!
//! An owner mints an opaque code for one of their repositories; the
//! business-logic service delivers it to the invitee and, on redemption,
//! records the collaborator grant.  Codes are single-use and expire after a
//! configurable lifetime (seven days by default).  State is process-local:
//! a restart drops pending codes, which only ever means re-inviting.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::directory::RepoId;

pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
    /// Never issued, already redeemed, or already swept.
    Unknown,
    /// Issued but past its lifetime; the code is gone after this answer.
    Expired,
}

impl fmt::Display for RedeemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedeemError::Unknown => write!(f, "unknown invitation code"),
            RedeemError::Expired => write!(f, "invitation code expired"),
        }
    }
}

impl std::error::Error for RedeemError {}

#[derive(Debug)]
struct Pending {
    repo: RepoId,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct InvitationStore {
    ttl: Duration,
    pending: Mutex<HashMap<String, Pending>>,
}

impl InvitationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a code that grants collaborator access to `repo` when redeemed.
    pub fn issue(&self, repo: RepoId) -> String {
        let code = Uuid::new_v4().simple().to_string();
        let expires_at = Instant::now() + self.ttl;
        self.pending.lock().unwrap().insert(
            code.clone(),
            Pending {
                repo: repo.clone(),
                expires_at,
            },
        );
        debug!(%repo, "invitation issued");
        code
    }

    /// Redeem a code for the repository it targets.
    ///
    /// The code is removed whether redemption succeeds or turns out to be
    /// expired; a second attempt always answers [`RedeemError::Unknown`].
    pub fn redeem(&self, code: &str) -> Result<RepoId, RedeemError> {
        let mut pending = self.pending.lock().unwrap();
        let entry = pending.remove(code).ok_or(RedeemError::Unknown)?;
        if entry.expires_at <= Instant::now() {
            debug!(repo = %entry.repo, "expired invitation presented");
            return Err(RedeemError::Expired);
        }
        debug!(repo = %entry.repo, "invitation redeemed");
        Ok(entry.repo)
    }

    /// Drop every expired code.  Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut pending = self.pending.lock().unwrap();
        let now = Instant::now();
        let before = pending.len();
        pending.retain(|_, entry| entry.expires_at > now);
        let purged = before - pending.len();
        if purged > 0 {
            debug!(purged, "swept expired invitations");
        }
        purged
    }

    /// Number of codes currently pending (expired-but-unswept included).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Periodic sweep loop; spawned once at startup.
pub async fn run_sweeper(store: std::sync::Arc<InvitationStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        store.purge_expired();
    }
}
