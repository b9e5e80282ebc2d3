//! HTTP-to-CGI translation for `git http-backend`.
//!
//! `git http-backend` is a CGI program: it reads the request from
//! environment variables and stdin and writes a CGI response (header block,
//! blank line, body) to stdout. The bridge builds that environment from the
//! incoming HTTP request, pipes the body in, parses the header block, and
//! streams the rest of stdout out as the HTTP response body.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::git::process::{feed_stdin, ProcessStream};

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Shared context for CGI invocations: where the bare repositories live and
/// which `git` executable to run.
pub struct CgiBridge {
    repo_root: PathBuf,
    git_binary: String,
}

impl CgiBridge {
    pub fn new(repo_root: impl Into<PathBuf>, git_binary: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            git_binary: git_binary.into(),
        }
    }

    /// Run one `git http-backend` invocation for `request`.
    #[instrument(
        skip(self, request),
        fields(method = %request.method(), path = %request.uri().path())
    )]
    async fn invoke(&self, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();

        let mut command = Command::new(&self.git_binary);
        command
            .arg("http-backend")
            .env("GIT_HTTP_EXPORT_ALL", "1")
            .env("GIT_PROJECT_ROOT", &self.repo_root)
            .env("REQUEST_METHOD", parts.method.as_str())
            .env("PATH_INFO", decode_path_info(parts.uri.path())?)
            .env("QUERY_STRING", parts.uri.query().unwrap_or(""))
            .env("REMOTE_ADDR", "127.0.0.1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(value) = header_str(&parts.headers, header::CONTENT_TYPE) {
            command.env("CONTENT_TYPE", value);
        }
        if let Some(value) = header_str(&parts.headers, header::CONTENT_LENGTH) {
            command.env("CONTENT_LENGTH", value);
        }
        if let Some(value) = header_str(&parts.headers, header::CONTENT_ENCODING) {
            // http-backend inflates gzip request bodies itself.
            command.env("HTTP_CONTENT_ENCODING", value);
        }
        if let Some(value) = header_str(&parts.headers, "git-protocol") {
            command.env("GIT_PROTOCOL", value);
        }

        let mut child = command.spawn().context("failed to spawn git http-backend")?;

        let request_body = axum::body::to_bytes(body, usize::MAX)
            .await
            .context("failed to read request body for CGI")?;
        feed_stdin(child.stdin.take(), &request_body, "git http-backend").await;

        let stdout = child
            .stdout
            .take()
            .context("failed to capture git http-backend stdout")?;
        let mut reader = BufReader::new(stdout);
        let (status, headers) = read_cgi_headers(&mut reader).await?;

        // The reader's buffer already holds the first body bytes; hand the
        // whole thing to the guard stream so the child dies with the
        // response.
        let mut response = Response::builder().status(status);
        for (name, value) in headers {
            response = response.header(name, value);
        }
        let stream = ProcessStream::new("git http-backend", child, reader);
        response
            .body(Body::from_stream(stream))
            .context("failed to assemble CGI response")
    }
}

/// Fallback handler installed on every per-request backend router.
pub async fn serve(State(bridge): State<Arc<CgiBridge>>, request: Request) -> Response {
    match bridge.invoke(request).await {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "git http-backend invocation failed");
            (StatusCode::BAD_GATEWAY, "backend failure").into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// CGI response parsing
// ---------------------------------------------------------------------------

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// CGI expects `PATH_INFO` percent-decoded; the URI path arrives encoded.
fn decode_path_info(path: &str) -> Result<String> {
    Ok(percent_decode_str(path)
        .decode_utf8()
        .context("request path is not valid UTF-8 after percent-decoding")?
        .into_owned())
}

/// Read the CGI header block (terminated by a blank line) off `reader`,
/// leaving it positioned at the first body byte. The `Status:` pseudo
/// header becomes the HTTP status; absent one, 200 applies.
async fn read_cgi_headers<R>(reader: &mut R) -> Result<(StatusCode, Vec<(HeaderName, HeaderValue)>)>
where
    R: AsyncBufRead + Unpin,
{
    let mut status = StatusCode::OK;
    let mut headers = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .context("failed to read CGI header from git http-backend")?;
        anyhow::ensure!(
            read > 0,
            "git http-backend closed stdout before the CGI header block ended"
        );

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        let (name, value) = trimmed
            .split_once(':')
            .with_context(|| format!("malformed CGI header line: {trimmed:?}"))?;
        let value = value.trim_start();

        if name.eq_ignore_ascii_case("status") {
            status = parse_cgi_status(value)?;
        } else {
            headers.push((
                HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("invalid CGI header name: {name:?}"))?,
                HeaderValue::from_str(value)
                    .with_context(|| format!("invalid CGI header value for {name}"))?,
            ));
        }
    }

    Ok((status, headers))
}

/// `Status: 404 Not Found` carries the code first; the reason phrase is
/// ignored.
fn parse_cgi_status(value: &str) -> Result<StatusCode> {
    let code = value
        .split_whitespace()
        .next()
        .context("empty CGI Status value")?;
    StatusCode::from_bytes(code.as_bytes())
        .with_context(|| format!("invalid CGI Status value: {value:?}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_info_is_percent_decoded() {
        assert_eq!(
            decode_path_info("/alice/widgets.git/HEAD").unwrap(),
            "/alice/widgets.git/HEAD"
        );
        assert_eq!(
            decode_path_info("/alice/my%20docs.git/HEAD").unwrap(),
            "/alice/my docs.git/HEAD"
        );
        assert!(decode_path_info("/alice/%ff.git").is_err());
    }

    #[test]
    fn status_line_parses_code_and_ignores_reason() {
        assert_eq!(parse_cgi_status("404 Not Found").unwrap(), StatusCode::NOT_FOUND);
        assert_eq!(parse_cgi_status("200").unwrap(), StatusCode::OK);
        assert!(parse_cgi_status("not-a-code").is_err());
        assert!(parse_cgi_status("").is_err());
    }

    #[tokio::test]
    async fn header_block_parses_and_leaves_body_in_reader() {
        let mut raw: &[u8] = b"Status: 404 Not Found\r\n\
              Content-Type: text/plain; charset=utf-8\r\n\
              Expires: Fri, 01 Jan 1980 00:00:00 GMT\r\n\
              \r\n\
              not found";

        let (status, headers) = read_cgi_headers(&mut raw).await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, header::CONTENT_TYPE);
        assert_eq!(headers[0].1, "text/plain; charset=utf-8");
        assert_eq!(raw, b"not found");
    }

    #[tokio::test]
    async fn status_defaults_to_ok() {
        let mut raw: &[u8] = b"Content-Type: application/x-git-loose-object\r\n\r\n\x01\x02";

        let (status, headers) = read_cgi_headers(&mut raw).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.len(), 1);
        assert_eq!(raw, b"\x01\x02");
    }

    #[tokio::test]
    async fn bare_lf_line_endings_are_accepted() {
        let mut raw: &[u8] = b"Status: 304 Not Modified\nCache-Control: no-cache\n\nrest";

        let (status, headers) = read_cgi_headers(&mut raw).await.unwrap();
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert_eq!(headers.len(), 1);
        assert_eq!(raw, b"rest");
    }

    #[tokio::test]
    async fn truncated_header_block_is_an_error() {
        let mut raw: &[u8] = b"Content-Type: text/plain\r\n";

        let err = read_cgi_headers(&mut raw).await.unwrap_err();
        assert!(err.to_string().contains("closed stdout"));
    }

    #[tokio::test]
    async fn header_line_without_colon_is_an_error() {
        let mut raw: &[u8] = b"garbage line\r\n\r\n";

        let err = read_cgi_headers(&mut raw).await.unwrap_err();
        assert!(err.to_string().contains("malformed CGI header"));
    }
}
