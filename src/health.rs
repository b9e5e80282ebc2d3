use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tokio::process::Command;

use crate::config::Config;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub repository_root: CheckResult,
    pub git_binary: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state expected by the handler
// ---------------------------------------------------------------------------

/// Minimal subset of `AppState` required by the health-check handler.
#[derive(Clone)]
pub struct HealthState {
    pub config: Arc<Config>,
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_repository_root(config: &Config) -> CheckResult {
    let root = &config.repositories.root;
    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => CheckResult::healthy(),
        Ok(_) => CheckResult::unhealthy(format!("{} is not a directory", root.display())),
        Err(e) => CheckResult::unhealthy(format!("{}: {e}", root.display())),
    }
}

async fn check_git_binary(config: &Config) -> CheckResult {
    match Command::new(&config.git.binary)
        .arg("--version")
        .output()
        .await
    {
        Ok(output) if output.status.success() => CheckResult {
            ok: true,
            detail: Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
        },
        Ok(output) => {
            CheckResult::unhealthy(format!("git --version exited with {}", output.status))
        }
        Err(e) => CheckResult::unhealthy(format!("failed to run {}: {e}", config.git.binary)),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    if checks.repository_root.ok && checks.git_binary.ok {
        HealthStatus::Ok
    } else {
        HealthStatus::Unhealthy
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler. Returns 200 when every check passes, 503
/// otherwise.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let (repository_root, git_binary) = tokio::join!(
        check_repository_root(&state.config),
        check_git_binary(&state.config),
    );

    let checks = HealthChecks {
        repository_root,
        git_binary,
    };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
