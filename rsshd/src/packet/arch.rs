//! Primitive data types of the SSH binary protocol (RFC 4251 §5) that [`ssh_encoding`]
//! leaves to its users: `boolean`, `name-list` and trailing opaque data.

use std::fmt;

use ssh_encoding::{Decode, Encode, Reader, Writer};

use crate::{error::ProtocolError, Error, Result};

pub use ssh_key::Mpint;

/// Read a `boolean`, any non-zero value being `true`.
pub fn read_bool(reader: &mut impl Reader) -> Result<bool> {
    Ok(u8::decode(reader)? != 0)
}

/// Write a `boolean`.
pub fn write_bool(writer: &mut impl Writer, value: bool) -> ssh_encoding::Result<()> {
    u8::from(value).encode(writer)
}

/// Consume all the remaining bytes of the `reader`, as request-specific data.
pub fn read_rest(reader: &mut impl Reader) -> Result<Vec<u8>> {
    let mut rest = vec![0; reader.remaining_len()];
    reader.read(&mut rest)?;

    Ok(rest)
}

/// Encode an unsigned big-endian magnitude as a `mpint`.
pub fn mpint(magnitude: &[u8]) -> Result<Mpint> {
    Ok(Mpint::from_positive_bytes(magnitude)?)
}

/// A comma-separated list of algorithm or method names.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NameList(Vec<String>);

impl NameList {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self(
            bytes
                .split(|&b| b == b',')
                .filter(|name| !name.is_empty())
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect(),
        )
    }

    /// Iterate over the names of the list.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether the list contains the provided `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|item| item == name)
    }

    /// The first name of the list that is contained in the `other` list.
    pub fn preferred_in<'l>(&'l self, other: &NameList) -> Option<&'l str> {
        self.iter().find(|name| other.contains(name))
    }

    /// The first name of the list.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Append a name at the end of the list.
    pub fn push(&mut self, name: impl Into<String>) {
        self.0.push(name.into());
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: AsRef<str>> FromIterator<T> for NameList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(|item| item.as_ref().to_string()).collect())
    }
}

impl fmt::Display for NameList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl Encode for NameList {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        self.to_string().encoded_len()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.to_string().encode(writer)
    }
}

impl Decode for NameList {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        let bytes = Vec::<u8>::decode(reader)?;

        if !bytes.is_ascii() {
            return Err(ProtocolError::Malformed("non-ASCII name-list").into());
        }

        Ok(Self::from_bytes(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpint_sign_and_leading_zeroes() {
        assert_eq!(mpint(&[0x00, 0x00, 0x7f]).unwrap().as_bytes(), [0x7f]);
        assert_eq!(mpint(&[0x80, 0x01]).unwrap().as_bytes(), [0x00, 0x80, 0x01]);
        assert!(mpint(&[0x00, 0x00]).unwrap().as_bytes().is_empty());
    }

    #[test]
    fn name_list_preference() {
        let client = NameList::from_iter(["curve25519-sha256"]);
        let server = NameList::from_iter(["curve448-sha512", "curve25519-sha256"]);

        assert_eq!(client.preferred_in(&server), Some("curve25519-sha256"));
        assert_eq!(server.preferred_in(&client), Some("curve25519-sha256"));
        assert_eq!(client.preferred_in(&NameList::default()), None);
    }

    #[test]
    fn truncated_reads_fail() {
        let mut reader: &[u8] = &[0, 0, 0, 8, b'a'];

        assert!(Vec::<u8>::decode(&mut reader).is_err());
    }

    #[test]
    fn name_list_wire_format() {
        let mut bytes = Vec::new();
        NameList::from_iter(["a", "b"]).encode(&mut bytes).unwrap();
        assert_eq!(bytes, b"\x00\x00\x00\x03a,b");

        let list = NameList::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn non_ascii_name_lists_are_rejected() {
        let mut bytes = Vec::new();
        "é".encode(&mut bytes).unwrap();

        assert!(NameList::decode(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn rest_drains_the_reader() {
        let mut reader: &[u8] = &[1, 2, 3];

        assert_eq!(read_rest(&mut reader).unwrap(), [1, 2, 3]);
        assert!(reader.is_empty());
    }
}
