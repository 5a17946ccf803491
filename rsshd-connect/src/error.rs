use thiserror::Error;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error.
    #[error(transparent)]
    Transport(#[from] rsshd::Error),

    /// The session went away while the channel was in use.
    #[error("The session has been torn down")]
    Cancelled,

    /// No more channels can be opened on this session.
    #[error("The maximum number of channels has been reached")]
    ResourceExhausted,

    /// The channel has been closed.
    #[error("The channel has been closed")]
    ChannelClosed,
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        let kind = match value {
            Error::Cancelled => std::io::ErrorKind::ConnectionAborted,
            Error::ChannelClosed => std::io::ErrorKind::BrokenPipe,
            _ => std::io::ErrorKind::Other,
        };

        std::io::Error::new(kind, value)
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
