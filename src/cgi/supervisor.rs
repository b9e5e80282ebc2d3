//! Request-scoped backend lifecycle.
//!
//! One [`CgiBackend`] serves exactly one gateway request. `acquire` binds an
//! ephemeral loopback port before returning, so a returned backend is
//! already connectable; dropping the handle aborts the server task, which
//! closes the port and kills any in-flight `git http-backend` child.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::bridge::{self, CgiBridge};
use crate::config::Config;

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct CgiSupervisor {
    bridge: Arc<CgiBridge>,
}

impl CgiSupervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            bridge: Arc::new(CgiBridge::new(
                &config.repositories.root,
                &config.git.binary,
            )),
        }
    }

    /// Spawn a backend for one request.
    ///
    /// Bind failure is fatal for the request and is never retried; the
    /// caller maps it to 502.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<CgiBackend> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("failed to bind CGI backend listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read CGI backend address")?;

        let app = Router::new()
            .fallback(bridge::serve)
            .with_state(Arc::clone(&self.bridge));

        let task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                warn!(error = %error, "CGI backend server exited with error");
            }
        });

        debug!(%addr, "CGI backend ready");
        Ok(CgiBackend { addr, task })
    }
}

// ---------------------------------------------------------------------------
// Backend handle
// ---------------------------------------------------------------------------

/// Live per-request backend. Owns the server task for its port.
pub struct CgiBackend {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl CgiBackend {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL on this backend for `path_and_query` (which must start
    /// with `/`).
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

impl Drop for CgiBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpStream;

    use super::*;

    fn test_supervisor() -> CgiSupervisor {
        CgiSupervisor {
            bridge: Arc::new(CgiBridge::new("/tmp/does-not-matter", "git")),
        }
    }

    #[tokio::test]
    async fn acquire_returns_a_connectable_backend() {
        let supervisor = test_supervisor();
        let backend = supervisor.acquire().await.unwrap();

        assert!(TcpStream::connect(backend.local_addr()).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_backends_get_distinct_ports() {
        let supervisor = test_supervisor();
        let first = supervisor.acquire().await.unwrap();
        let second = supervisor.acquire().await.unwrap();

        assert_ne!(first.local_addr(), second.local_addr());
    }

    #[tokio::test]
    async fn drop_closes_the_port() {
        let supervisor = test_supervisor();
        let backend = supervisor.acquire().await.unwrap();
        let addr = backend.local_addr();

        drop(backend);
        // Abort lands at the next await point of the serve task.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn url_for_joins_address_and_path() {
        let backend = CgiBackend {
            addr: "127.0.0.1:4321".parse().unwrap(),
            task: tokio::spawn(async {}),
        };

        assert_eq!(
            backend.url_for("/alice/widgets.git/info/refs?service=git-upload-pack"),
            "http://127.0.0.1:4321/alice/widgets.git/info/refs?service=git-upload-pack"
        );
    }
}
