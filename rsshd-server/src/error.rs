use thiserror::Error;

/// The error types that can occur when running the server.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// SSH Key error.
    #[error(transparent)]
    Key(#[from] ssh_key::Error),

    /// Transport error, from the session or the authentication.
    #[error(transparent)]
    Transport(#[from] rsshd::Error),

    /// Channel error.
    #[error(transparent)]
    Connect(#[from] rsshd_connect::Error),

    /// File transfer error.
    #[error(transparent)]
    Sftp(#[from] rsshd_sftp::Error),

    /// The `authorized_keys` file could not be loaded.
    #[error(transparent)]
    AuthorizedKeys(#[from] rsshd_auth::Error),

    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The requested key type cannot be generated.
    #[error("Unsupported key type `{0}`")]
    Unsupported(&'static str),
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
