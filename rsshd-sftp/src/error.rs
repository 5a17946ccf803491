use thiserror::Error;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error, from the file-system.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The path resolved outside of the root directory.
    #[error("The path `{0}` escapes the root directory")]
    PathEscape(String),

    /// The channel has been closed while an operation was in progress.
    #[error("The channel has been closed")]
    Cancelled,

    /// The peer sent a malformed message.
    #[error("Malformed message: {0}")]
    BadMessage(&'static str),
}

impl Error {
    /// Convert errors of the underlying stream, where a closed channel cancels the transfer.
    pub(crate) fn stream(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::BrokenPipe => Self::Cancelled,
            _ => Self::Io(err),
        }
    }
}

impl From<rsshd_connect::Error> for Error {
    fn from(_: rsshd_connect::Error) -> Self {
        Self::Cancelled
    }
}

impl From<ssh_encoding::Error> for Error {
    fn from(err: ssh_encoding::Error) -> Self {
        match err {
            ssh_encoding::Error::CharacterEncoding => Self::BadMessage("invalid UTF-8 string"),
            _ => Self::BadMessage("truncated field"),
        }
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
