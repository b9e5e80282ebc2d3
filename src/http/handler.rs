//! Axum router and request handlers for the git Smart-HTTP gateway.
//!
//! Routes:
//! - `GET  /{owner}/{repo}/info/refs`        - ref advertisement
//! - `POST /{owner}/{repo}/git-upload-pack`  - fetch/clone RPC
//! - `POST /{owner}/{repo}/git-receive-pack` - push RPC
//! - `GET  /{owner}/{repo}/{*path}`          - raw repository files via CGI
//! - `GET  /healthz`                         - Health check
//! - `GET  /metrics`                         - Prometheus metrics
//!
//! The repository segment accepts an optional `.git` suffix; the decision
//! chain always sees the bare name. Every repository route runs
//! [`DecisionChain`] before any git process is spawned.

use std::io::Read as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context as _};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::auth::chain::{
    AccessGrant, AccessRequest, Decision, DecisionChain, Operation, Rejection,
};
use crate::config::Config;
use crate::directory::RepoId;
use crate::git::process::{feed_stdin, ProcessStream};
use crate::http::{pktline, proxy};
use crate::metrics::{EndpointLabels, RequestLabels, ServiceLabels};
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state. The
/// default body limit is disabled so large packfile pushes pass through.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Git smart HTTP protocol endpoints
        .route("/{owner}/{repo}/info/refs", get(handle_info_refs))
        .route("/{owner}/{repo}/git-upload-pack", post(handle_upload_pack))
        .route(
            "/{owner}/{repo}/git-receive-pack",
            post(handle_receive_pack),
        )
        // Dumb-protocol raw file pass-through
        .route("/{owner}/{repo}/{*path}", get(handle_repo_file))
        // Health, metrics
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query parameter types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /{owner}/{repo}/info/refs?service=git-upload-pack`
///
/// Authorizes the caller, runs the service command with `--advertise-refs`
/// and frames its output with the smart-HTTP service announcement.
#[instrument(skip(state, query, headers), fields(%owner, %repo))]
async fn handle_info_refs(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let result = info_refs(&state, &owner, &repo, query, &headers).await;
    finish(&state, "info_refs", started, result)
}

async fn info_refs(
    state: &AppState,
    owner: &str,
    repo: &str,
    query: InfoRefsQuery,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    // 1. Classify the requested service. Dumb-protocol discovery sends no
    //    `service` parameter and is not served on this route.
    let service = query.service.unwrap_or_default();
    let (command, operation) = match service.as_str() {
        "git-upload-pack" => ("upload-pack", Operation::Read),
        "git-receive-pack" => ("receive-pack", Operation::Write),
        _ => {
            return Err(AppError::BadRequest(format!(
                "unsupported service: {service:?}"
            )))
        }
    };

    // 2. Run the decision chain.
    let grant = authorize(state, headers, owner, repo, operation).await?;

    // 3. Collect the raw advertisement from the service command.
    let repo_path = repo_store_path(&state.config, &grant.repository.id);
    let mut advertise = Command::new(&state.config.git.binary);
    advertise
        .arg(command)
        .arg("--stateless-rpc")
        .arg("--advertise-refs")
        .arg(&repo_path)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(protocol) = header_str(headers, "git-protocol") {
        advertise.env("GIT_PROTOCOL", protocol);
    }

    state
        .metrics
        .metrics
        .git_processes_started
        .get_or_create(&ServiceLabels {
            service: service.clone(),
        })
        .inc();

    let output = advertise
        .output()
        .await
        .with_context(|| format!("failed to run git {command} --advertise-refs"))
        .map_err(AppError::BackendFailure)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::BackendFailure(anyhow!(
            "git {command} --advertise-refs exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    // 4. Frame it: service announcement pkt-line, flush-pkt, then the raw
    //    advertisement bytes unchanged.
    let mut body = pktline::advertisement_prefix(&service);
    body.extend_from_slice(&output.stdout);

    debug!(
        user = grant.user.as_deref().unwrap_or("anonymous"),
        bytes = body.len(),
        "served ref advertisement"
    );

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("application/x-{service}-advertisement"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response())
}

/// `POST /{owner}/{repo}/git-upload-pack`
#[instrument(skip(state, headers, body), fields(%owner, %repo))]
async fn handle_upload_pack(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let result = rpc(
        &state,
        &owner,
        &repo,
        "git-upload-pack",
        Operation::Read,
        &headers,
        body,
    )
    .await;
    finish(&state, "upload_pack", started, result)
}

/// `POST /{owner}/{repo}/git-receive-pack`
#[instrument(skip(state, headers, body), fields(%owner, %repo))]
async fn handle_receive_pack(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let result = rpc(
        &state,
        &owner,
        &repo,
        "git-receive-pack",
        Operation::Write,
        &headers,
        body,
    )
    .await;
    finish(&state, "receive_pack", started, result)
}

/// Shared body of the two RPC endpoints: authorize, undo transport
/// compression, pipe the request into the service process and stream its
/// stdout back as the response.
async fn rpc(
    state: &AppState,
    owner: &str,
    repo: &str,
    service: &'static str,
    operation: Operation,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    // 1. Run the decision chain.
    let grant = authorize(state, headers, owner, repo, operation).await?;

    // 2. Undo transport compression. The service process expects raw
    //    pkt-lines on stdin.
    let body = decode_request_body(headers, body).await?;

    // 3. Spawn the service process, tied to this response's lifetime.
    let command = service.trim_start_matches("git-");
    let repo_path = repo_store_path(&state.config, &grant.repository.id);
    let mut builder = Command::new(&state.config.git.binary);
    builder
        .arg(command)
        .arg("--stateless-rpc")
        .arg(&repo_path)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(protocol) = header_str(headers, "git-protocol") {
        builder.env("GIT_PROTOCOL", protocol);
    }

    state
        .metrics
        .metrics
        .git_processes_started
        .get_or_create(&ServiceLabels {
            service: service.to_string(),
        })
        .inc();

    let mut child = builder
        .spawn()
        .with_context(|| format!("failed to spawn git {command}"))
        .map_err(AppError::BackendFailure)?;

    // 4. Write the request body to stdin; a failed write is logged and the
    //    child's exit status tells the rest.
    feed_stdin(child.stdin.take(), &body, service).await;

    // 5. Stream stdout as the response body; the child is reaped when the
    //    stream ends and killed if the client disconnects first.
    let stdout = child
        .stdout
        .take()
        .context("failed to capture git service stdout")
        .map_err(AppError::BackendFailure)?;
    let stream = ProcessStream::new(service, child, stdout);

    debug!(
        user = grant.user.as_deref().unwrap_or("anonymous"),
        request_bytes = body.len(),
        "streaming rpc response"
    );

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("application/x-{service}-result"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// `GET /{owner}/{repo}/{*path}`
///
/// Raw file access (`HEAD`, `objects/...`, `info/...`): read-gated, then
/// reverse-proxied to a request-scoped CGI backend. The backend handle rides
/// inside the response stream so the child outlives the handler but not the
/// response.
#[instrument(skip(state, request), fields(%owner, %repo, %path))]
async fn handle_repo_file(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, path)): Path<(String, String, String)>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let result = repo_file(&state, &owner, &repo, &path, request).await;
    finish(&state, "repo_file", started, result)
}

async fn repo_file(
    state: &AppState,
    owner: &str,
    repo: &str,
    path: &str,
    request: Request,
) -> Result<Response, AppError> {
    let grant = authorize(state, request.headers(), owner, repo, Operation::Read).await?;
    validate_file_path(path)?;

    // The upstream path is rebuilt from the authorized repository identity
    // and the validated file path; the inbound URI never reaches the
    // backend.
    let mut upstream = format!(
        "/{}/{}.git/{}",
        grant.repository.id.owner, grant.repository.id.name, path
    );
    if let Some(query) = request.uri().query() {
        upstream.push('?');
        upstream.push_str(query);
    }

    let backend = state
        .supervisor
        .acquire()
        .await
        .map_err(AppError::BackendFailure)?;
    state.metrics.metrics.cgi_backends_started.inc();

    let addr = backend.local_addr();
    proxy::forward(&state.http_client, addr, &upstream, request, backend)
        .await
        .map_err(AppError::BackendFailure)
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        config: Arc::clone(&state.config),
    };
    crate::health::health_handler(axum::extract::State(health_state)).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the gateway.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let mut buf = String::new();
    prometheus_client::encoding::text::encode(&mut buf, &state.metrics.registry)
        .map_err(|e| AppError::Internal(anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Validate the URL segments, strip an optional `.git` suffix and run the
/// decision chain. Rejections map onto [`AppError`]; the grant carries the
/// resolved repository record.
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
    operation: Operation,
) -> Result<AccessGrant, AppError> {
    validate_path_segment(owner, "owner")?;
    validate_path_segment(repo, "repository")?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    let chain = DecisionChain::new(state.directory.as_ref());
    let decision = chain
        .evaluate(&AccessRequest {
            owner,
            repo,
            operation,
            authorization: header_str(headers, header::AUTHORIZATION),
            session_user: None,
        })
        .await
        .map_err(AppError::Internal)?;

    match decision {
        Decision::Forward(grant) => Ok(grant),
        Decision::Reject(Rejection::AuthenticationRequired) => {
            Err(AppError::AuthenticationRequired)
        }
        Decision::Reject(Rejection::NotFound) => Err(AppError::NotFound),
    }
}

/// Owner and repository URL segments must be plain single names. Checked
/// before any directory lookup or filesystem access.
fn validate_path_segment(segment: &str, what: &str) -> Result<(), AppError> {
    if segment.is_empty() {
        return Err(AppError::BadRequest(format!("{what} must not be empty")));
    }
    if segment.contains("..")
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(AppError::BadRequest(format!("invalid {what}: {segment:?}")));
    }
    Ok(())
}

/// The wildcard file path walks the bare repository tree; every segment must
/// be a plain name. Dot segments would survive into the upstream URL and be
/// collapsed by its parser, stepping outside the repository the decision
/// chain authorized.
fn validate_file_path(path: &str) -> Result<(), AppError> {
    for segment in path.split('/') {
        let plain = !segment.is_empty() && segment != "." && segment != "..";
        let clean = segment
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b'\\' | b'%' | b'?' | b'#'));
        if !plain || !clean {
            return Err(AppError::BadRequest(format!(
                "invalid repository file path: {path:?}"
            )));
        }
    }
    Ok(())
}

fn repo_store_path(config: &Config, id: &RepoId) -> PathBuf {
    config.repositories.root.join(id.store_path())
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Undo `Content-Encoding: gzip` on a buffered RPC body. Identity passes
/// through; anything else is rejected before a process is spawned.
async fn decode_request_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes, AppError> {
    match header_str(headers, header::CONTENT_ENCODING).unwrap_or("") {
        "" | "identity" => Ok(body),
        "gzip" | "x-gzip" => {
            let decoded = tokio::task::spawn_blocking(move || {
                let mut decoder = GzDecoder::new(body.as_ref());
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf).map(|_| buf)
            })
            .await
            .context("gzip decode task failed")
            .map_err(AppError::Internal)?
            .map_err(|e| AppError::BadRequest(format!("invalid gzip request body: {e}")))?;
            Ok(Bytes::from(decoded))
        }
        other => Err(AppError::BadRequest(format!(
            "unsupported Content-Encoding: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Request accounting
// ---------------------------------------------------------------------------

/// Record the endpoint/outcome counter and the latency histogram, then
/// materialize the response.
fn finish(
    state: &AppState,
    endpoint: &'static str,
    started: Instant,
    result: Result<Response, AppError>,
) -> Response {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(error) => error.outcome(),
    };
    let metrics = &state.metrics.metrics;
    metrics
        .requests
        .get_or_create(&RequestLabels {
            endpoint: endpoint.to_string(),
            outcome: outcome.to_string(),
        })
        .inc();
    metrics
        .request_duration_seconds
        .get_or_create(&EndpointLabels {
            endpoint: endpoint.to_string(),
        })
        .observe(started.elapsed().as_secs_f64());

    result.unwrap_or_else(IntoResponse::into_response)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
///
/// Missing and invisible repositories share [`AppError::NotFound`], and all
/// credential failures share [`AppError::AuthenticationRequired`], so a
/// caller cannot probe for repository existence or learn which validation
/// step failed.
#[derive(Debug)]
pub enum AppError {
    /// Credentials absent, malformed or wrong. Always the same challenge.
    AuthenticationRequired,
    /// Unknown repository, or one the caller may not see.
    NotFound,
    /// The request itself is unusable: bad service, bad path segment, bad
    /// body encoding.
    BadRequest(String),
    /// A git child process or CGI backend failed. Logged, never retried,
    /// never echoed to the client.
    BackendFailure(anyhow::Error),
    /// Directory I/O and other unexpected failures.
    Internal(anyhow::Error),
}

impl AppError {
    fn outcome(&self) -> &'static str {
        match self {
            AppError::AuthenticationRequired => "unauthorized",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::BackendFailure(_) => "backend_failure",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=git")],
                "authentication required",
            )
                .into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, "repository not found").into_response(),
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            AppError::BackendFailure(error) => {
                error!(error = %format!("{error:#}"), "backend failure");
                (StatusCode::BAD_GATEWAY, "backend failure").into_response()
            }
            AppError::Internal(error) => {
                error!(error = %format!("{error:#}"), "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
