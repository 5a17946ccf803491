//! Messages of the transport layer protocol (RFC 4253), including key-exchange methods.

use super::{
    arch::{read_bool, write_bool},
    message_u32, CheckedSum, Decode, Encode, Message, Mpint, NameList, Reader, Writer,
};
use crate::{Error, Result};

/// Reason codes of the `SSH_MSG_DISCONNECT` message.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    HostNotAllowedToConnect,
    ProtocolError,
    KeyExchangeFailed,
    Reserved,
    MacError,
    CompressionError,
    ServiceNotAvailable,
    ProtocolVersionNotSupported,
    HostKeyNotVerifiable,
    ConnectionLost,
    ByApplication,
    TooManyConnections,
    AuthCancelledByUser,
    NoMoreAuthMethodsAvailable,
    IllegalUserName,
    Other(u32),
}

impl From<u32> for DisconnectReason {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MacError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            other => Self::Other(other),
        }
    }
}

impl From<DisconnectReason> for u32 {
    fn from(value: DisconnectReason) -> Self {
        match value {
            DisconnectReason::HostNotAllowedToConnect => 1,
            DisconnectReason::ProtocolError => 2,
            DisconnectReason::KeyExchangeFailed => 3,
            DisconnectReason::Reserved => 4,
            DisconnectReason::MacError => 5,
            DisconnectReason::CompressionError => 6,
            DisconnectReason::ServiceNotAvailable => 7,
            DisconnectReason::ProtocolVersionNotSupported => 8,
            DisconnectReason::HostKeyNotVerifiable => 9,
            DisconnectReason::ConnectionLost => 10,
            DisconnectReason::ByApplication => 11,
            DisconnectReason::TooManyConnections => 12,
            DisconnectReason::AuthCancelledByUser => 13,
            DisconnectReason::NoMoreAuthMethodsAvailable => 14,
            DisconnectReason::IllegalUserName => 15,
            DisconnectReason::Other(other) => other,
        }
    }
}

/// The `SSH_MSG_DISCONNECT` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Reason for disconnection.
    pub reason: DisconnectReason,

    /// Human-readable description.
    pub description: String,

    /// Language tag.
    pub language: String,
}

impl Encode for Disconnect {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [
            4,
            self.description.encoded_len()?,
            self.language.encoded_len()?,
        ]
        .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        u32::from(self.reason).encode(writer)?;
        self.description.encode(writer)?;
        self.language.encode(writer)
    }
}

impl Decode for Disconnect {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            reason: u32::decode(reader)?.into(),
            description: String::from_utf8_lossy(&Vec::<u8>::decode(reader)?).into_owned(),
            language: String::decode(reader).unwrap_or_default(),
        })
    }
}

impl Message for Disconnect {
    const ID: u8 = 1;
}

/// The `SSH_MSG_IGNORE` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ignore {
    /// Arbitrary data.
    pub data: Vec<u8>,
}

impl Encode for Ignore {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.data.encoded_len()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.data.encode(writer)
    }
}

impl Decode for Ignore {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            data: Vec::decode(reader)?,
        })
    }
}

impl Message for Ignore {
    const ID: u8 = 2;
}

message_u32! {
    /// The `SSH_MSG_UNIMPLEMENTED` message.
    Unimplemented = 3 {
        /// Sequence number of the rejected packet.
        seq,
    }
}

/// The `SSH_MSG_DEBUG` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debug {
    /// Whether the message should be displayed.
    pub always_display: bool,

    /// The debug message.
    pub message: String,

    /// Language tag.
    pub language: String,
}

impl Encode for Debug {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [1, self.message.encoded_len()?, self.language.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        write_bool(writer, self.always_display)?;
        self.message.encode(writer)?;
        self.language.encode(writer)
    }
}

impl Decode for Debug {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            always_display: read_bool(reader)?,
            message: String::from_utf8_lossy(&Vec::<u8>::decode(reader)?).into_owned(),
            language: String::decode(reader).unwrap_or_default(),
        })
    }
}

impl Message for Debug {
    const ID: u8 = 4;
}

/// The `SSH_MSG_SERVICE_REQUEST` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// The requested service name.
    pub service_name: String,
}

impl Encode for ServiceRequest {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.service_name.encoded_len()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.service_name.encode(writer)
    }
}

impl Decode for ServiceRequest {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            service_name: String::decode(reader)?,
        })
    }
}

impl Message for ServiceRequest {
    const ID: u8 = 5;
}

/// The `SSH_MSG_SERVICE_ACCEPT` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    /// The accepted service name.
    pub service_name: String,
}

impl Encode for ServiceAccept {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.service_name.encoded_len()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.service_name.encode(writer)
    }
}

impl Decode for ServiceAccept {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            service_name: String::decode(reader)?,
        })
    }
}

impl Message for ServiceAccept {
    const ID: u8 = 6;
}

/// The `SSH_MSG_EXT_INFO` message (RFC 8308).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtInfo {
    /// The extensions as name/value pairs.
    pub extensions: Vec<(String, Vec<u8>)>,
}

impl Encode for ExtInfo {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.extensions
            .iter()
            .map(|(name, value)| [name.encoded_len()?, value.encoded_len()?].checked_sum())
            .collect::<ssh_encoding::Result<Vec<_>>>()?
            .into_iter()
            .chain([4])
            .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.extensions.len().encode(writer)?;

        for (name, value) in &self.extensions {
            name.encode(writer)?;
            value.encode(writer)?;
        }

        Ok(())
    }
}

impl Decode for ExtInfo {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        let count = u32::decode(reader)?;
        let mut extensions = Vec::new();

        for _ in 0..count {
            extensions.push((String::decode(reader)?, Vec::decode(reader)?));
        }

        Ok(Self { extensions })
    }
}

impl Message for ExtInfo {
    const ID: u8 = 7;
}

/// The `SSH_MSG_KEXINIT` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// Random cookie.
    pub cookie: [u8; 16],

    /// Key-exchange algorithms.
    pub kex_algorithms: NameList,

    /// Host key signature algorithms.
    pub server_host_key_algorithms: NameList,

    /// Ciphers from client to server.
    pub encryption_algorithms_client_to_server: NameList,

    /// Ciphers from server to client.
    pub encryption_algorithms_server_to_client: NameList,

    /// MACs from client to server.
    pub mac_algorithms_client_to_server: NameList,

    /// MACs from server to client.
    pub mac_algorithms_server_to_client: NameList,

    /// Compression from client to server.
    pub compression_algorithms_client_to_server: NameList,

    /// Compression from server to client.
    pub compression_algorithms_server_to_client: NameList,

    /// Languages from client to server.
    pub languages_client_to_server: NameList,

    /// Languages from server to client.
    pub languages_server_to_client: NameList,

    /// Whether a guessed key-exchange packet follows.
    pub first_kex_packet_follows: bool,

    /// Reserved for future extension.
    pub reserved: u32,
}

impl KexInit {
    fn lists(&self) -> [&NameList; 10] {
        [
            &self.kex_algorithms,
            &self.server_host_key_algorithms,
            &self.encryption_algorithms_client_to_server,
            &self.encryption_algorithms_server_to_client,
            &self.mac_algorithms_client_to_server,
            &self.mac_algorithms_server_to_client,
            &self.compression_algorithms_client_to_server,
            &self.compression_algorithms_server_to_client,
            &self.languages_client_to_server,
            &self.languages_server_to_client,
        ]
    }
}

impl Encode for KexInit {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.lists()
            .into_iter()
            .map(NameList::encoded_len)
            .collect::<ssh_encoding::Result<Vec<_>>>()?
            .into_iter()
            .chain([self.cookie.len(), 1, 4])
            .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        writer.write(&self.cookie)?;

        for list in self.lists() {
            list.encode(writer)?;
        }

        write_bool(writer, self.first_kex_packet_follows)?;
        self.reserved.encode(writer)
    }
}

impl Decode for KexInit {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        let mut cookie = [0; 16];
        reader.read(&mut cookie)?;

        Ok(Self {
            cookie,
            kex_algorithms: NameList::decode(reader)?,
            server_host_key_algorithms: NameList::decode(reader)?,
            encryption_algorithms_client_to_server: NameList::decode(reader)?,
            encryption_algorithms_server_to_client: NameList::decode(reader)?,
            mac_algorithms_client_to_server: NameList::decode(reader)?,
            mac_algorithms_server_to_client: NameList::decode(reader)?,
            compression_algorithms_client_to_server: NameList::decode(reader)?,
            compression_algorithms_server_to_client: NameList::decode(reader)?,
            languages_client_to_server: NameList::decode(reader)?,
            languages_server_to_client: NameList::decode(reader)?,
            first_kex_packet_follows: read_bool(reader)?,
            reserved: u32::decode(reader)?,
        })
    }
}

impl Message for KexInit {
    const ID: u8 = 20;
}

/// The `SSH_MSG_NEWKEYS` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKeys;

impl Encode for NewKeys {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        Ok(0)
    }

    fn encode(&self, _: &mut impl Writer) -> ssh_encoding::Result<()> {
        Ok(())
    }
}

impl Decode for NewKeys {
    type Error = Error;

    fn decode(_: &mut impl Reader) -> Result<Self> {
        Ok(Self)
    }
}

impl Message for NewKeys {
    const ID: u8 = 21;
}

/// The `SSH_MSG_KEX_ECDH_INIT` message (RFC 5656), also used by curve25519 and curve448.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhInit {
    /// Client's ephemeral public key.
    pub q_c: Vec<u8>,
}

impl Encode for KexEcdhInit {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.q_c.encoded_len()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.q_c.encode(writer)
    }
}

impl Decode for KexEcdhInit {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            q_c: Vec::decode(reader)?,
        })
    }
}

impl Message for KexEcdhInit {
    const ID: u8 = 30;
}

/// A server reply made of the host key, a public value and the signature of the exchange hash.
macro_rules! message_reply {
    ($( #[$meta:meta] $name:ident<$public:ty> = $id:literal { $(#[$pmeta:meta])* $field:ident } )+) => {
        $(
            #[$meta]
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name {
                /// Server's public host key.
                pub k_s: Vec<u8>,

                $(#[$pmeta])*
                pub $field: $public,

                /// Signature of the exchange hash.
                pub signature: Vec<u8>,
            }

            impl Encode for $name {
                fn encoded_len(&self) -> ssh_encoding::Result<usize> {
                    [
                        self.k_s.encoded_len()?,
                        self.$field.encoded_len()?,
                        self.signature.encoded_len()?,
                    ]
                    .checked_sum()
                }

                fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
                    self.k_s.encode(writer)?;
                    self.$field.encode(writer)?;
                    self.signature.encode(writer)
                }
            }

            impl Decode for $name {
                type Error = Error;

                fn decode(reader: &mut impl Reader) -> Result<Self> {
                    Ok(Self {
                        k_s: Vec::decode(reader)?,
                        $field: <$public>::decode(reader)?,
                        signature: Vec::decode(reader)?,
                    })
                }
            }

            impl Message for $name {
                const ID: u8 = $id;
            }
        )+
    };
}

/// A client message carrying its public value.
macro_rules! message_public {
    ($( #[$meta:meta] $name:ident<$public:ty> = $id:literal { $(#[$pmeta:meta])* $field:ident } )+) => {
        $(
            #[$meta]
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name {
                $(#[$pmeta])*
                pub $field: $public,
            }

            impl Encode for $name {
                fn encoded_len(&self) -> ssh_encoding::Result<usize> {
                    self.$field.encoded_len()
                }

                fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
                    self.$field.encode(writer)
                }
            }

            impl Decode for $name {
                type Error = Error;

                fn decode(reader: &mut impl Reader) -> Result<Self> {
                    Ok(Self {
                        $field: <$public>::decode(reader)?,
                    })
                }
            }

            impl Message for $name {
                const ID: u8 = $id;
            }
        )+
    };
}

message_reply! {
    /// The `SSH_MSG_KEX_ECDH_REPLY` message (RFC 5656).
    KexEcdhReply<Vec<u8>> = 31 {
        /// Server's ephemeral public key.
        q_s
    }

    /// The `SSH_MSG_KEXDH_REPLY` message (RFC 4253 §8).
    KexdhReply<Mpint> = 31 {
        /// Server's public value.
        f
    }

    /// The `SSH_MSG_KEX_DH_GEX_REPLY` message (RFC 4419).
    KexDhGexReply<Mpint> = 33 {
        /// Server's public value.
        f
    }
}

message_public! {
    /// The `SSH_MSG_KEXDH_INIT` message (RFC 4253 §8).
    KexdhInit<Mpint> = 30 {
        /// Client's public value.
        e
    }

    /// The `SSH_MSG_KEX_DH_GEX_INIT` message (RFC 4419).
    KexDhGexInit<Mpint> = 32 {
        /// Client's public value.
        e
    }
}

message_u32! {
    /// The `SSH_MSG_KEX_DH_GEX_REQUEST_OLD` message (RFC 4419).
    KexDhGexRequestOld = 30 {
        /// Preferred group size, in bits.
        n,
    }

    /// The `SSH_MSG_KEX_DH_GEX_REQUEST` message (RFC 4419).
    KexDhGexRequest = 34 {
        /// Minimal group size, in bits.
        min,
        /// Preferred group size, in bits.
        n,
        /// Maximal group size, in bits.
        max,
    }
}

/// The `SSH_MSG_KEX_DH_GEX_GROUP` message (RFC 4419).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhGexGroup {
    /// Safe prime.
    pub p: Mpint,

    /// Generator.
    pub g: Mpint,
}

impl Encode for KexDhGexGroup {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.p.encoded_len()?, self.g.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.p.encode(writer)?;
        self.g.encode(writer)
    }
}

impl Decode for KexDhGexGroup {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            p: Mpint::decode(reader)?,
            g: Mpint::decode(reader)?,
        })
    }
}

impl Message for KexDhGexGroup {
    const ID: u8 = 31;
}

/// Whether the message number belongs to the key-exchange range
/// (`KEXINIT`, `NEWKEYS` and the method-specific numbers 30 to 49).
pub fn is_kex_message(id: u8) -> bool {
    matches!(id, 20 | 21 | 30..=49)
}

/// Whether the message number is a transport-generic message
/// allowed at any point of the protocol.
pub fn is_generic_message(id: u8) -> bool {
    matches!(id, 1..=4)
}
