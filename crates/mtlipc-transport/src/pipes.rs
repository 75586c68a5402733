use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Type-erased writable end of the remote's input pipe.
pub type PipeWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Readable end of the remote's output pipe.
///
/// Wraps the child's stdout when spawned by [`crate::ProcessSupervisor`], or
/// any in-memory reader when the transport is driven without a process.
pub struct ProcessOutput {
    inner: Pin<Box<dyn AsyncRead + Send>>,
}

impl ProcessOutput {
    /// Wrap an arbitrary reader as remote output.
    pub fn new(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            inner: Box::pin(reader),
        }
    }
}

impl AsyncRead for ProcessOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.get_mut().inner.as_mut().poll_read(cx, buf)
    }
}

impl std::fmt::Debug for ProcessOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOutput").finish_non_exhaustive()
    }
}
