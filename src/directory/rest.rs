//! REST directory backend.
//!
//! Thin JSON client for the business-logic service's internal API:
//!
//! ```text
//! GET {base}/users/{username}                      -> AccountRecord
//! GET {base}/repos/{owner}/{name}                  -> RepositoryRecord
//! GET {base}/repos/{owner}/{name}/collaborators    -> [CollaboratorRecord]
//! ```
//!
//! A 404 maps to `None` / empty; any other non-success status is an error
//! (surfaced as 500 at the gateway edge, never as an access decision).

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use super::{Account, DirectoryBackend, RepoId, Repository};
use crate::config::RestDirectoryConfig;

pub struct RestDirectory {
    client: reqwest::Client,
    base_url: String,
    token_env: String,
}

impl RestDirectory {
    pub fn new(config: &RestDirectoryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_env: config.token_env.clone(),
        }
    }

    fn service_token(&self) -> String {
        let token = std::env::var(&self.token_env).unwrap_or_default();
        if token.is_empty() {
            warn!(
                env_var = %self.token_env,
                "directory service token env var is empty"
            );
        }
        token
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.service_token()))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("directory request failed: {url}"))
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccountRecord {
    username: String,
    password_hash: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    owner: String,
    name: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct CollaboratorRecord {
    username: String,
}

impl From<RepositoryRecord> for Repository {
    fn from(record: RepositoryRecord) -> Self {
        Repository {
            id: RepoId::new(record.owner, record.name),
            is_public: record.public,
            description: record.description,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl DirectoryBackend for RestDirectory {
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let url = format!("{}/users/{username}", self.base_url);
        let resp = self.get(&url).await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        anyhow::ensure!(
            resp.status().is_success(),
            "directory returned {} for account lookup",
            resp.status()
        );

        let record: AccountRecord = resp
            .json()
            .await
            .context("failed to parse directory account response")?;
        Ok(Some(Account {
            username: record.username,
            password_hash: record.password_hash,
        }))
    }

    async fn repository(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let url = format!("{}/repos/{owner}/{name}", self.base_url);
        let resp = self.get(&url).await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        anyhow::ensure!(
            resp.status().is_success(),
            "directory returned {} for repository lookup",
            resp.status()
        );

        let record: RepositoryRecord = resp
            .json()
            .await
            .context("failed to parse directory repository response")?;
        Ok(Some(record.into()))
    }

    async fn collaborators(&self, owner: &str, name: &str) -> Result<Vec<String>> {
        let url = format!("{}/repos/{owner}/{name}/collaborators", self.base_url);
        let resp = self.get(&url).await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        anyhow::ensure!(
            resp.status().is_success(),
            "directory returned {} for collaborator lookup",
            resp.status()
        );

        let records: Vec<CollaboratorRecord> = resp
            .json()
            .await
            .context("failed to parse directory collaborator response")?;
        Ok(records.into_iter().map(|r| r.username).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_record_maps_to_domain_type() {
        let record: RepositoryRecord = serde_json::from_value(serde_json::json!({
            "owner": "alice",
            "name": "widgets",
            "public": true,
            "description": "gadget collection"
        }))
        .unwrap();
        let repo: Repository = record.into();
        assert_eq!(repo.id, RepoId::new("alice", "widgets"));
        assert!(repo.is_public);
        assert_eq!(repo.description, "gadget collection");
    }

    #[test]
    fn repository_record_defaults_to_private() {
        let record: RepositoryRecord = serde_json::from_value(serde_json::json!({
            "owner": "alice",
            "name": "secret"
        }))
        .unwrap();
        let repo: Repository = record.into();
        assert!(!repo.is_public);
        assert_eq!(repo.description, "");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let dir = RestDirectory::new(&RestDirectoryConfig {
            base_url: "http://127.0.0.1:3000/api/".to_string(),
            token_env: "PACKGATE_DIRECTORY_TOKEN".to_string(),
        });
        assert_eq!(dir.base_url, "http://127.0.0.1:3000/api");
    }
}
