//! Messages of the authentication protocol (RFC 4252).

use super::{
    arch::{read_bool, read_rest, write_bool},
    CheckedSum, Decode, Encode, Message, NameList, Reader, Writer,
};
use crate::{Error, Result};

/// The authentication method of a [`Request`], with its method-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// The `none` method, used to query the allowed methods.
    None,

    /// The `publickey` method.
    Publickey {
        /// The public key algorithm name.
        algorithm: String,

        /// The public key (or certificate) blob.
        blob: Vec<u8>,

        /// The signature, absent when the client only queries the key.
        signature: Option<Vec<u8>>,
    },

    /// The `password` method.
    Password {
        /// The plaintext password.
        password: String,

        /// The new password, when the client requests a password change.
        new: Option<String>,
    },

    /// Any other method, unsupported.
    Other(String),
}

impl Method {
    /// The method name, as sent on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Publickey { .. } => "publickey",
            Self::Password { .. } => "password",
            Self::Other(name) => name,
        }
    }
}

/// The `SSH_MSG_USERAUTH_REQUEST` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The user name to authenticate as.
    pub username: String,

    /// The service to start once authenticated.
    pub service_name: String,

    /// The authentication method.
    pub method: Method,
}

impl Method {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        match self {
            Self::None | Self::Other(_) => Ok(0),
            Self::Publickey {
                algorithm,
                blob,
                signature,
            } => [
                1,
                algorithm.encoded_len()?,
                blob.encoded_len()?,
                signature.as_ref().map_or(Ok(0), Encode::encoded_len)?,
            ]
            .checked_sum(),
            Self::Password { password, new } => [
                1,
                password.encoded_len()?,
                new.as_ref().map_or(Ok(0), Encode::encoded_len)?,
            ]
            .checked_sum(),
        }
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        match self {
            Self::None | Self::Other(_) => Ok(()),
            Self::Publickey {
                algorithm,
                blob,
                signature,
            } => {
                write_bool(writer, signature.is_some())?;
                algorithm.encode(writer)?;
                blob.encode(writer)?;

                match signature {
                    Some(signature) => signature.encode(writer),
                    None => Ok(()),
                }
            }
            Self::Password { password, new } => {
                write_bool(writer, new.is_some())?;
                password.encode(writer)?;

                match new {
                    Some(new) => new.encode(writer),
                    None => Ok(()),
                }
            }
        }
    }

    fn decode(name: String, reader: &mut impl Reader) -> Result<Self> {
        Ok(match name.as_str() {
            "none" => Self::None,
            "publickey" => {
                let signed = read_bool(reader)?;

                Self::Publickey {
                    algorithm: String::decode(reader)?,
                    blob: Vec::decode(reader)?,
                    signature: signed.then(|| Vec::decode(reader)).transpose()?,
                }
            }
            "password" => {
                let change = read_bool(reader)?;

                Self::Password {
                    password: String::decode(reader)?,
                    new: change.then(|| String::decode(reader)).transpose()?,
                }
            }
            _ => {
                read_rest(reader)?;

                Self::Other(name)
            }
        })
    }
}

impl Encode for Request {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [
            self.username.encoded_len()?,
            self.service_name.encoded_len()?,
            self.method.name().encoded_len()?,
            self.method.encoded_len()?,
        ]
        .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.username.encode(writer)?;
        self.service_name.encode(writer)?;
        self.method.name().encode(writer)?;
        self.method.encode(writer)
    }
}

impl Decode for Request {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        let username = String::decode(reader)?;
        let service_name = String::decode(reader)?;
        let method = Method::decode(String::decode(reader)?, reader)?;

        Ok(Self {
            username,
            service_name,
            method,
        })
    }
}

impl Message for Request {
    const ID: u8 = 50;
}

/// The `SSH_MSG_USERAUTH_FAILURE` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// The methods that may productively continue the authentication.
    pub continue_with: NameList,

    /// Whether the request succeeded but more authentication is required.
    pub partial_success: bool,
}

impl Encode for Failure {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.continue_with.encoded_len()?, 1].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.continue_with.encode(writer)?;
        write_bool(writer, self.partial_success)
    }
}

impl Decode for Failure {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            continue_with: NameList::decode(reader)?,
            partial_success: read_bool(reader)?,
        })
    }
}

impl Message for Failure {
    const ID: u8 = 51;
}

/// The `SSH_MSG_USERAUTH_SUCCESS` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Success;

impl Encode for Success {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        Ok(0)
    }

    fn encode(&self, _: &mut impl Writer) -> ssh_encoding::Result<()> {
        Ok(())
    }
}

impl Decode for Success {
    type Error = Error;

    fn decode(_: &mut impl Reader) -> Result<Self> {
        Ok(Self)
    }
}

impl Message for Success {
    const ID: u8 = 52;
}

/// The `SSH_MSG_USERAUTH_BANNER` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    /// The banner text.
    pub message: String,

    /// Language tag.
    pub language: String,
}

impl Encode for Banner {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.message.encoded_len()?, self.language.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.message.encode(writer)?;
        self.language.encode(writer)
    }
}

impl Decode for Banner {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            message: String::decode(reader)?,
            language: String::decode(reader)?,
        })
    }
}

impl Message for Banner {
    const ID: u8 = 53;
}

/// The `SSH_MSG_USERAUTH_PK_OK` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkOk {
    /// The public key algorithm name, from the request.
    pub algorithm: String,

    /// The public key blob, from the request.
    pub blob: Vec<u8>,
}

impl Encode for PkOk {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.algorithm.encoded_len()?, self.blob.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.algorithm.encode(writer)?;
        self.blob.encode(writer)
    }
}

impl Decode for PkOk {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            algorithm: String::decode(reader)?,
            blob: Vec::decode(reader)?,
        })
    }
}

impl Message for PkOk {
    const ID: u8 = 60;
}

/// The data signed by the client in a `publickey` authentication request.
#[derive(Debug)]
pub struct PublickeySignature<'a> {
    /// The session identifier.
    pub session_id: &'a [u8],

    /// The user name to authenticate as.
    pub username: &'a str,

    /// The service to start once authenticated.
    pub service_name: &'a str,

    /// The public key algorithm name.
    pub algorithm: &'a str,

    /// The public key (or certificate) blob.
    pub blob: &'a [u8],
}

impl PublickeySignature<'_> {
    /// Serialize the signed data.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        self.session_id.encode(&mut buf)?;
        Request::ID.encode(&mut buf)?;
        self.username.encode(&mut buf)?;
        self.service_name.encode(&mut buf)?;
        "publickey".encode(&mut buf)?;
        write_bool(&mut buf, true)?;
        self.algorithm.encode(&mut buf)?;
        self.blob.encode(&mut buf)?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_publickey_request() {
        let request = Request {
            username: "alice".into(),
            service_name: "ssh-connection".into(),
            method: Method::Publickey {
                algorithm: "ssh-ed25519".into(),
                blob: vec![1, 2, 3],
                signature: None,
            },
        };

        let packet = request.to_packet().unwrap();
        assert_eq!(packet.to::<Request>().unwrap(), request);
    }

    #[test]
    fn unknown_method_is_preserved() {
        let mut payload = vec![Request::ID];
        for field in ["bob", "ssh-connection", "keyboard-interactive", "", ""] {
            field.encode(&mut payload).unwrap();
        }

        let packet = crate::packet::Packet { payload };

        assert_eq!(
            packet.to::<Request>().unwrap().method,
            Method::Other("keyboard-interactive".into())
        );
    }
}
