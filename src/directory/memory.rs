//! In-memory directory backend.
//!
//! Populated once at startup (from the `directory.fixture` config block) or
//! programmatically by tests; lookups never fail.

use std::collections::HashMap;

use anyhow::Result;

use super::{Account, DirectoryBackend, RepoId, Repository};
use crate::config::FixtureDirectoryConfig;

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    accounts: HashMap<String, Account>,
    repositories: HashMap<RepoId, Repository>,
    collaborators: HashMap<RepoId, Vec<String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(fixture: &FixtureDirectoryConfig) -> Self {
        let mut dir = Self::new();
        for account in &fixture.accounts {
            dir.add_account(&account.username, &account.password_hash);
        }
        for repo in &fixture.repositories {
            dir.insert_repository(Repository {
                id: RepoId::new(&repo.owner, &repo.name),
                is_public: repo.public,
                description: repo.description.clone(),
            });
        }
        for grant in &fixture.collaborators {
            dir.add_collaborator(&grant.owner, &grant.name, &grant.username);
        }
        dir
    }

    pub fn add_account(&mut self, username: &str, password_hash: &str) {
        self.accounts.insert(
            username.to_string(),
            Account {
                username: username.to_string(),
                password_hash: password_hash.to_string(),
            },
        );
    }

    pub fn add_repository(&mut self, owner: &str, name: &str, is_public: bool) {
        self.insert_repository(Repository {
            id: RepoId::new(owner, name),
            is_public,
            description: String::new(),
        });
    }

    pub fn insert_repository(&mut self, repository: Repository) {
        self.repositories.insert(repository.id.clone(), repository);
    }

    pub fn add_collaborator(&mut self, owner: &str, name: &str, username: &str) {
        self.collaborators
            .entry(RepoId::new(owner, name))
            .or_default()
            .push(username.to_string());
    }
}

#[async_trait::async_trait]
impl DirectoryBackend for MemoryDirectory {
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.accounts.get(username).cloned())
    }

    async fn repository(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        Ok(self
            .repositories
            .get(&RepoId::new(owner, name))
            .cloned())
    }

    async fn collaborators(&self, owner: &str, name: &str) -> Result<Vec<String>> {
        Ok(self
            .collaborators
            .get(&RepoId::new(owner, name))
            .cloned()
            .unwrap_or_default())
    }
}
