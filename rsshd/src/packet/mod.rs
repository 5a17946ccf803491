//! Binary messages of the SSH protocol and their framing.

use std::fmt::Debug;

use crate::{error::ProtocolError, Error, Result};

pub use ssh_encoding::{CheckedSum, Decode, Encode, Reader, Writer};

pub mod arch;
pub use arch::{Mpint, NameList};

mod id;
pub use id::Id;

pub mod connect;
pub mod trans;
pub mod userauth;

/// A message of the SSH protocol, identified by its message number.
pub trait Message: Encode + Decode<Error = Error> + Debug {
    /// The message number.
    const ID: u8;

    /// Serialize the message into a [`Packet`] payload.
    fn to_packet(&self) -> Result<Packet> {
        let mut payload = Vec::with_capacity([1, self.encoded_len()?].checked_sum()?);
        Self::ID.encode(&mut payload)?;
        self.encode(&mut payload)?;

        Ok(Packet { payload })
    }
}

/// The decrypted and decompressed payload of a binary packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The payload, starting with the message number.
    pub payload: Vec<u8>,
}

impl Packet {
    /// The message number of the payload.
    pub fn id(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }

    /// Whether the payload holds a message of type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.payload.first() == Some(&T::ID)
    }

    /// Decode the payload as a message of type `T`.
    pub fn to<T: Message>(&self) -> Result<T> {
        match self.payload.split_first() {
            Some((&id, mut body)) if id == T::ID => T::decode(&mut body),
            _ => Err(ProtocolError::UnexpectedMessage(self.id()).into()),
        }
    }
}

/// Implement [`Encode`], [`Decode`] and [`Message`] for a struct
/// made only of `uint32` fields.
macro_rules! message_u32 {
    ($( #[$meta:meta] $name:ident = $id:literal { $( $(#[$fmeta:meta])* $field:ident ),* $(,)? } )+) => {
        $(
            #[$meta]
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name {
                $( $(#[$fmeta])* pub $field: u32, )*
            }

            impl $crate::packet::Encode for $name {
                fn encoded_len(&self) -> ::ssh_encoding::Result<usize> {
                    $crate::packet::CheckedSum::checked_sum(
                        [0 $(, $crate::packet::Encode::encoded_len(&self.$field)?)*]
                    )
                }

                fn encode(&self, writer: &mut impl $crate::packet::Writer) -> ::ssh_encoding::Result<()> {
                    $( $crate::packet::Encode::encode(&self.$field, writer)?; )*

                    Ok(())
                }
            }

            impl $crate::packet::Decode for $name {
                type Error = $crate::Error;

                fn decode(reader: &mut impl $crate::packet::Reader) -> $crate::Result<Self> {
                    Ok(Self { $( $field: <u32 as $crate::packet::Decode>::decode(reader)?, )* })
                }
            }

            impl $crate::packet::Message for $name {
                const ID: u8 = $id;
            }
        )+
    };
}
pub(crate) use message_u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_mismatch_is_a_protocol_error() {
        let packet = trans::NewKeys.to_packet().unwrap();

        assert!(packet.is::<trans::NewKeys>());
        assert!(matches!(
            packet.to::<trans::Ignore>(),
            Err(crate::Error::Protocol(ProtocolError::UnexpectedMessage(21)))
        ));
    }

    #[test]
    fn truncated_bodies_are_encoding_errors() {
        let packet = Packet {
            payload: vec![trans::Unimplemented::ID, 0, 0],
        };

        assert!(matches!(
            packet.to::<trans::Unimplemented>(),
            Err(crate::Error::Encoding(_))
        ));
    }
}
