use thiserror::Error;

/// The error types that can occur when loading authentication material.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A key of the `authorized_keys` file could not be decoded.
    #[error("Invalid key at line {line}: {source}")]
    Key {
        /// The line of the faulty entry, starting at 1.
        line: usize,
        /// The decoding error.
        source: ssh_key::Error,
    },

    /// An option of the `authorized_keys` file is unknown or malformed.
    #[error("Invalid option `{option}` at line {line}")]
    Option {
        /// The line of the faulty entry, starting at 1.
        line: usize,
        /// The faulty option.
        option: String,
    },
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
