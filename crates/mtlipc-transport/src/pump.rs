use std::io::ErrorKind;
use std::ops::ControlFlow;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Why [`pump_output`] returned.
#[derive(Debug)]
pub enum PumpExit {
    /// The remote closed its output.
    Eof,
    /// The cancellation token fired.
    Cancelled,
    /// The data callback asked to stop.
    Stopped,
    /// Reading failed.
    Failed(std::io::Error),
}

/// Drain remote output, forwarding every chunk to `on_data` in arrival order.
///
/// Chunk boundaries are whatever the pipe delivers; callers must not assume
/// they line up with protocol frames.
pub async fn pump_output<R, F>(mut output: R, cancel: CancellationToken, mut on_data: F) -> PumpExit
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]) -> ControlFlow<()>,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            read = output.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => return PumpExit::Eof,
            Ok(n) => {
                trace!(len = n, "remote output chunk");
                if on_data(&chunk[..n]).is_break() {
                    return PumpExit::Stopped;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return PumpExit::Failed(err),
        }
    }
}
