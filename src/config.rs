use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub repositories: RepositoryStoreConfig,
    #[serde(default)]
    pub git: GitConfig,
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub invitations: InvitationConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8417`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
}

fn default_http_listen() -> String {
    "0.0.0.0:8417".to_string()
}

// ---------------------------------------------------------------------------
// Repository store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryStoreConfig {
    /// Root directory holding the bare repositories, laid out as
    /// `{root}/{owner}/{name}.git`.
    pub root: PathBuf,
}

// ---------------------------------------------------------------------------
// Git executable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Path to the `git` executable (also used to locate `http-backend`).
    #[serde(default = "default_git_binary")]
    pub binary: String,
    /// Committer identity recorded on gateway-created merge commits.
    #[serde(default = "default_committer_name")]
    pub committer_name: String,
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
        }
    }
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_committer_name() -> String {
    "packgate".to_string()
}

fn default_committer_email() -> String {
    "packgate@localhost".to_string()
}

// ---------------------------------------------------------------------------
// Directory (account / repository / collaborator lookups)
// ---------------------------------------------------------------------------

/// Where account, repository, and collaborator records come from.
///
/// The records themselves are owned by the business-logic service; the
/// gateway only ever reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    /// Query the business-logic service over HTTP.
    Rest,
    /// Serve fixed records from the `fixture` block below.  Intended for
    /// single-box deployments and tests.
    Fixture,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub mode: DirectoryMode,
    #[serde(default)]
    pub rest: Option<RestDirectoryConfig>,
    #[serde(default)]
    pub fixture: Option<FixtureDirectoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestDirectoryConfig {
    /// API root of the business-logic service (e.g. `http://127.0.0.1:3000/api`).
    pub base_url: String,
    /// Name of the environment variable that holds the service token.
    #[serde(default = "default_directory_token_env")]
    pub token_env: String,
}

fn default_directory_token_env() -> String {
    "PACKGATE_DIRECTORY_TOKEN".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureDirectoryConfig {
    #[serde(default)]
    pub accounts: Vec<FixtureAccount>,
    #[serde(default)]
    pub repositories: Vec<FixtureRepository>,
    #[serde(default)]
    pub collaborators: Vec<FixtureCollaborator>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureAccount {
    pub username: String,
    /// Double-SHA-256 credential digest, lowercase hex.
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureRepository {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureCollaborator {
    pub owner: String,
    pub name: String,
    pub username: String,
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    /// Invitation code lifetime in seconds.
    #[serde(default = "default_invitation_ttl")]
    pub ttl: u64,
    /// Interval (seconds) between expired-code sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            ttl: default_invitation_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_invitation_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    3600
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.repositories.root.as_os_str().is_empty(),
        "repositories.root must not be empty"
    );
    anyhow::ensure!(
        config
            .server
            .http_listen
            .parse::<std::net::SocketAddr>()
            .is_ok(),
        "server.http_listen is not a valid socket address: {}",
        config.server.http_listen
    );
    match config.directory.mode {
        DirectoryMode::Rest => anyhow::ensure!(
            config.directory.rest.is_some(),
            "directory.mode is `rest` but the `directory.rest` block is missing"
        ),
        DirectoryMode::Fixture => anyhow::ensure!(
            config.directory.fixture.is_some(),
            "directory.mode is `fixture` but the `directory.fixture` block is missing"
        ),
    }
    anyhow::ensure!(config.invitations.ttl > 0, "invitations.ttl must be positive");
    anyhow::ensure!(
        config.invitations.sweep_interval > 0,
        "invitations.sweep_interval must be positive"
    );
    Ok(())
}
