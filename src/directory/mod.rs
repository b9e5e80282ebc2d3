//! Account, repository, and collaborator lookups.
//!
//! These records are owned by the business-logic service that fronts
//! registration, profiles, and pull-request CRUD.  The gateway only ever
//! reads them, through the [`DirectoryBackend`] trait, so authorization and
//! protocol code never couples to a concrete transport.  Two backends exist:
//! [`rest::RestDirectory`] queries the service over HTTP, and
//! [`memory::MemoryDirectory`] serves fixed records (single-box deployments
//! and tests).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Config, DirectoryMode};

pub mod memory;
pub mod rest;

pub use memory::MemoryDirectory;
pub use rest::RestDirectory;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Identity of a repository: unique `(owner, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Location of the bare repository relative to the store root:
    /// `{owner}/{name}.git`.
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.owner).join(format!("{}.git", self.name))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A hosted repository as the directory knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: RepoId,
    /// Public repositories are fetchable without credentials.  Private ones
    /// are invisible to everyone but the owner and collaborators.
    pub is_public: bool,
    pub description: String,
}

/// A user account.  `password_hash` is the double-SHA-256 digest the client
/// transmits; the gateway never sees a raw password for fixture accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Read-only view of the records the business-logic service owns.
#[async_trait::async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Look up an account by username.  `Ok(None)` means no such account.
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Look up a repository by owner and name.  `Ok(None)` means no such
    /// repository; callers must not distinguish missing from hidden.
    async fn repository(&self, owner: &str, name: &str) -> Result<Option<Repository>>;

    /// Usernames holding a collaborator grant on the repository.  The owner
    /// is not included.
    async fn collaborators(&self, owner: &str, name: &str) -> Result<Vec<String>>;
}

/// Construct the directory backend selected by the config.
pub fn build_directory(config: &Config) -> Result<Arc<dyn DirectoryBackend>> {
    match config.directory.mode {
        DirectoryMode::Rest => {
            let rest = config
                .directory
                .rest
                .as_ref()
                .context("directory.rest block missing")?;
            Ok(Arc::new(RestDirectory::new(rest)))
        }
        DirectoryMode::Fixture => {
            let fixture = config.directory.fixture.clone().unwrap_or_default();
            Ok(Arc::new(MemoryDirectory::from_config(&fixture)))
        }
    }
}
