use digest::{KeyInit, Mac, OutputSizeUser};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;

use super::{Catalog, Negociate};
use crate::{
    error::{NegotiationError, ProtocolError},
    packet::{trans::KexInit, NameList},
    side::{client::Client, server::Server},
    Error, Result,
};

impl Negociate<Client> for Hmac {
    const ERR: NegotiationError = NegotiationError::Hmac;

    fn field(kex: &KexInit) -> &NameList {
        &kex.mac_algorithms_client_to_server
    }
}

impl Negociate<Server> for Hmac {
    const ERR: NegotiationError = NegotiationError::Hmac;

    fn field(kex: &KexInit) -> &NameList {
        &kex.mac_algorithms_server_to_client
    }
}

/// SSH hmac algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Hmac {
    /// HMAC with sha-2-256 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-256-etm@openssh.com")]
    HmacSha256ETM,

    /// HMAC with sha-2-512 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-512-etm@openssh.com")]
    HmacSha512ETM,

    /// HMAC with sha-1 digest on encrypted message.
    #[strum(serialize = "hmac-sha1-etm@openssh.com")]
    HmacSha1ETM,

    /// HMAC with sha-2-256 digest.
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha256,

    /// HMAC with sha-2-512 digest.
    #[strum(serialize = "hmac-sha2-512")]
    HmacSha512,

    /// HMAC with sha-1 digest.
    HmacSha1,

    /// HMAC with sha-1 digest, truncated to 96 bits.
    #[strum(serialize = "hmac-sha1-96")]
    HmacSha1_96,

    /// HMAC with md5 digest on encrypted message.
    #[strum(serialize = "hmac-md5-etm@openssh.com")]
    HmacMd5ETM,

    /// HMAC with md5 digest.
    HmacMd5,

    /// HMAC with md5 digest, truncated to 96 bits.
    #[strum(serialize = "hmac-md5-96")]
    HmacMd5_96,

    /// No HMAC algorithm.
    #[default]
    None,
}

impl Catalog for Hmac {
    fn all() -> Vec<Self> {
        vec![
            Self::HmacSha256ETM,
            Self::HmacSha512ETM,
            Self::HmacSha1ETM,
            Self::HmacSha256,
            Self::HmacSha512,
            Self::HmacSha1,
            Self::HmacSha1_96,
            Self::HmacMd5ETM,
            Self::HmacMd5,
            Self::HmacMd5_96,
        ]
    }

    fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::HmacSha1 | Self::HmacSha1_96 | Self::HmacMd5ETM | Self::HmacMd5 | Self::HmacMd5_96
        )
    }
}

impl Hmac {
    pub(crate) fn sign(&self, seq: u32, buf: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        fn sign<D: Mac + KeyInit>(seq: u32, buf: &[u8], key: &[u8]) -> Result<Vec<u8>> {
            Ok(<D as Mac>::new_from_slice(key)
                .map_err(|_| Error::Cipher)?
                .chain_update(seq.to_be_bytes())
                .chain_update(buf)
                .finalize()
                .into_bytes()
                .to_vec())
        }

        let mut mac = match self {
            Self::HmacSha512ETM | Self::HmacSha512 => sign::<hmac::Hmac<Sha512>>(seq, buf, key),
            Self::HmacSha256ETM | Self::HmacSha256 => sign::<hmac::Hmac<Sha256>>(seq, buf, key),
            Self::HmacSha1ETM | Self::HmacSha1 | Self::HmacSha1_96 => {
                sign::<hmac::Hmac<Sha1>>(seq, buf, key)
            }
            Self::HmacMd5ETM | Self::HmacMd5 | Self::HmacMd5_96 => {
                sign::<hmac::Hmac<Md5>>(seq, buf, key)
            }
            Self::None => Ok(Vec::new()),
        }?;
        mac.truncate(self.size());

        Ok(mac)
    }

    pub(crate) fn verify(&self, seq: u32, buf: &[u8], key: &[u8], mac: &[u8]) -> Result<()> {
        if bool::from(self.sign(seq, buf, key)?.ct_eq(mac)) {
            Ok(())
        } else {
            Err(ProtocolError::Integrity.into())
        }
    }

    /// The size of the transmitted MAC.
    pub(crate) fn size(&self) -> usize {
        match self {
            Self::HmacSha1_96 | Self::HmacMd5_96 => 12,
            _ => self.key_size(),
        }
    }

    /// The size of the MAC key, equal to the digest size.
    pub(crate) fn key_size(&self) -> usize {
        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => Sha512::output_size(),
            Self::HmacSha256ETM | Self::HmacSha256 => Sha256::output_size(),
            Self::HmacSha1ETM | Self::HmacSha1 | Self::HmacSha1_96 => Sha1::output_size(),
            Self::HmacMd5ETM | Self::HmacMd5 | Self::HmacMd5_96 => Md5::output_size(),
            Self::None => 0,
        }
    }

    pub(crate) fn etm(&self) -> bool {
        matches!(
            self,
            Self::HmacSha512ETM | Self::HmacSha256ETM | Self::HmacSha1ETM | Self::HmacMd5ETM
        )
    }
}
