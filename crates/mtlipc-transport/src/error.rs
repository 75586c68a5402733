/// Errors that can occur in remote-process transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The remote controller could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Writing to the remote controller's stdin failed.
    #[error("failed to write to remote process: {0}")]
    Write(std::io::Error),

    /// An I/O error occurred while managing the remote process.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote process input has been closed by `terminate`.
    #[error("remote process input closed")]
    Closed,
}

impl TransportError {
    /// Returns true if the error means the remote end is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Write(err) | TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransportError::Spawn { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
