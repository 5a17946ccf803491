use thiserror::Error;

use crate::packet::trans::DisconnectReason;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// SSH Key error.
    #[error(transparent)]
    Key(#[from] ssh_key::Error),

    /// SSH binary encoding error, from the key stack.
    #[error(transparent)]
    Encoding(#[from] ssh_encoding::Error),

    /// Signature error during the key-exchange or authentication.
    #[error(transparent)]
    Signature(#[from] signature::Error),

    /// The peer violated the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No common algorithm could be found in a category.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Error while encrypting or decrypting messages.
    #[error("The cipher ended up in an error")]
    Cipher,

    /// Error while (de)compressing messages.
    #[error("The compression stream ended up in an error")]
    Compression,

    /// The peer exceeded the allowed number of authentication attempts.
    #[error("Too many failed authentication attempts")]
    AuthExhausted,

    /// The requested service is unknown to us.
    #[error("The requested service is unknown")]
    UnknownService,

    /// The peer took too long to send data.
    #[error("The peer timed out")]
    Timeout,

    /// The session has been disconnected.
    #[error("The session has been disconnected")]
    Disconnected(DisconnectReason),
}

impl Error {
    /// The disconnect reason to report to the peer when this error is fatal to the session,
    /// `None` when the session is already gone.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            Self::Io(_) | Self::Disconnected(_) => None,
            Self::Protocol(ProtocolError::Integrity) => Some(DisconnectReason::MacError),
            Self::Protocol(_) | Self::Encoding(_) => Some(DisconnectReason::ProtocolError),
            Self::Negotiation(_) | Self::Signature(_) | Self::Key(_) | Self::Cipher => {
                Some(DisconnectReason::KeyExchangeFailed)
            }
            Self::Compression => Some(DisconnectReason::CompressionError),
            Self::AuthExhausted => Some(DisconnectReason::NoMoreAuthMethodsAvailable),
            Self::UnknownService => Some(DisconnectReason::ServiceNotAvailable),
            Self::Timeout => Some(DisconnectReason::ConnectionLost),
        }
    }
}

/// Protocol violations, always fatal to the session.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The identification line was malformed.
    #[error("Malformed identification line")]
    BadIdentification,

    /// The message could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(&'static str),

    /// A packet announced a size larger than the allowed maximum.
    #[error("Packet of {size} bytes exceeds the maximum of {max} bytes")]
    PacketTooLarge {
        /// Announced size.
        size: usize,
        /// Configured maximum size.
        max: usize,
    },

    /// A packet was not aligned on the cipher block size.
    #[error("Packet length is not aligned to the cipher block size")]
    Misaligned,

    /// The packet failed its integrity check, either padding or authentication tag.
    #[error("Packet integrity check failed")]
    Integrity,

    /// The peer sent a message that is not allowed in the current state.
    #[error("Unexpected message #{0} in the current state")]
    UnexpectedMessage(u8),

    /// The peer sent more data than the channel window allowed.
    #[error("Channel window exceeded by the peer")]
    WindowExceeded,

    /// A channel message referred to a channel that is not opened.
    #[error("Message for an unknown channel")]
    UnknownChannel,

    /// The peer sent invalid key-exchange values.
    #[error("Invalid key-exchange parameters")]
    KexParameters,
}

/// The category in which the algorithm negotiation failed.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationError {
    /// No common kex algorithm found between both sides.
    #[error("Unable to negociate a common kex algorithm")]
    Kex,

    /// No common host key algorithm found between both sides.
    #[error("Unable to negociate a common host key algorithm")]
    Key,

    /// No common cipher algorithm found between both sides.
    #[error("Unable to negociate a common encryption algorithm")]
    Cipher,

    /// No common hmac algorithm found between both sides.
    #[error("Unable to negociate a common HMAC algorithm")]
    Hmac,

    /// No common compression algorithm found between both sides.
    #[error("Unable to negociate a common compression algorithm")]
    Compression,
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
