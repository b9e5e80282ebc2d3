//! Child process lifetime tied to its output stream.
//!
//! Service processes (`upload-pack`, `receive-pack`, `http-backend`) must
//! die when the client walks away mid-transfer.  [`ProcessStream`] owns the
//! [`Child`] alongside its stdout reader: axum drops the response body on
//! disconnect, dropping the stream drops the child, and `kill_on_drop`
//! takes the process down.  On normal completion the child moves to a
//! background reaper so its exit status still reaches the logs.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncWriteExt as _};
use tokio::process::{Child, ChildStdin};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Write a request body to a service child's stdin, then drop the handle to
/// signal EOF. A write failure usually means the child already exited; it is
/// logged rather than surfaced, since the child's own exit status carries
/// the real diagnosis and the caller is about to stream whatever stdout the
/// child produced.
pub async fn feed_stdin(stdin: Option<ChildStdin>, body: &[u8], label: &'static str) {
    let Some(mut stdin) = stdin else { return };
    if let Err(error) = stdin.write_all(body).await {
        warn!(label, %error, "failed to write request body to service stdin");
    }
}

pub struct ProcessStream<R> {
    child: Option<Child>,
    reader: ReaderStream<R>,
    label: &'static str,
}

impl<R: AsyncRead> ProcessStream<R> {
    /// `child` must have been spawned with `kill_on_drop(true)`; `reader`
    /// is its stdout (possibly wrapped, e.g. in a `BufReader` that already
    /// consumed a header section).
    pub fn new(label: &'static str, child: Child, reader: R) -> Self {
        Self {
            child: Some(child),
            reader: ReaderStream::new(reader),
            label,
        }
    }
}

impl<R: AsyncRead + Unpin> Stream for ProcessStream<R> {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.reader).poll_next(cx) {
            Poll::Ready(None) => {
                if let Some(mut child) = this.child.take() {
                    let label = this.label;
                    tokio::spawn(async move {
                        match child.wait().await {
                            Ok(status) if status.success() => {
                                debug!(label, "service process completed");
                            }
                            Ok(status) => {
                                warn!(label, %status, "service process exited with non-zero status");
                            }
                            Err(error) => {
                                warn!(label, %error, "failed to reap service process");
                            }
                        }
                    });
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use super::*;

    #[tokio::test]
    async fn feed_stdin_tolerates_a_child_that_exited_before_reading() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take();
        child.wait().await.unwrap();

        // Larger than the pipe buffer, so the write fails with a broken
        // pipe; the helper logs and returns instead of erroring out.
        feed_stdin(stdin, &vec![0u8; 1 << 20], "test-service").await;
    }

    #[tokio::test]
    async fn feed_stdin_without_a_handle_is_a_noop() {
        feed_stdin(None, b"unused", "test-service").await;
    }
}
