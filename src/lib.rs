//! packgate: a protocol-aware HTTP front for multi-tenant git hosting.
//!
//! The crate terminates git smart-HTTP traffic for bare repositories laid
//! out as `{root}/{owner}/{name}.git`, gates every request through a
//! directory-backed access decision chain, and hands the wire work to
//! short-lived `git` child processes: `upload-pack`/`receive-pack` for the
//! smart protocol, `git http-backend` behind a per-request CGI shim for
//! dumb-protocol file access.
//!
//! The library surface also carries the pieces an embedding control plane
//! needs: the [`directory`] abstraction over accounts and repositories, the
//! [`git`] merge coordinator, and the collaborator invitation store.

use std::sync::Arc;

pub mod auth;
pub mod cgi;
pub mod config;
pub mod directory;
pub mod git;
pub mod health;
pub mod http;
pub mod metrics;

pub use auth::invitations::InvitationStore;
pub use cgi::CgiSupervisor;
pub use config::Config;
pub use directory::{build_directory, DirectoryBackend};
pub use http::handler::create_router;
pub use metrics::MetricsRegistry;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<dyn DirectoryBackend>,
    pub supervisor: CgiSupervisor,
    pub invitations: Arc<InvitationStore>,
    pub http_client: reqwest::Client,
    pub metrics: MetricsRegistry,
}
