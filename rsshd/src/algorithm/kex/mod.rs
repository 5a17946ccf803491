//! Key-exchange methods, computing the shared secret and exchange hash from which the session keys are derived.

use digest::{Digest, FixedOutputReset};
use secrecy::{ExposeSecret, SecretBox};
use strum::{AsRefStr, EnumString};

use super::{
    key::{self, HostKey},
    Catalog, Key, Negociate,
};
use crate::{
    error::NegotiationError,
    packet::{arch::mpint, trans::KexInit, Encode, Mpint, NameList},
    stream::{Keys, Stream, TransportPair},
    Pipe, Result,
};

mod meta;
pub use meta::KexMeta;

pub mod groups;

mod curve25519;
mod curve448;
mod dh;
mod ecdh;

impl Negociate for Kex {
    const ERR: NegotiationError = NegotiationError::Kex;

    fn field(kex: &KexInit) -> &NameList {
        &kex.kex_algorithms
    }
}

/// SSH key-exchange algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kex {
    /// Curve25519 ECDH with sha-2-256 digest.
    Curve25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest (pre-RFC 8731).
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,

    /// Curve448 ECDH with sha-2-512 digest.
    Curve448Sha512,

    /// ECDH on the NIST P-256 curve with sha-2-256 digest.
    EcdhSha2Nistp256,

    /// ECDH on the NIST P-384 curve with sha-2-384 digest.
    EcdhSha2Nistp384,

    /// ECDH on the NIST P-521 curve with sha-2-512 digest.
    EcdhSha2Nistp521,

    /// Diffie-Hellman group exchange with sha-2-256 digest.
    DiffieHellmanGroupExchangeSha256,

    /// Diffie-Hellman on the 4096-bit MODP group with sha-2-512 digest.
    DiffieHellmanGroup16Sha512,

    /// Diffie-Hellman on the 8192-bit MODP group with sha-2-512 digest.
    DiffieHellmanGroup18Sha512,

    /// Diffie-Hellman on the 2048-bit MODP group with sha-2-256 digest.
    DiffieHellmanGroup14Sha256,

    /// Diffie-Hellman on the 3072-bit MODP group with sha-2-512 digest.
    DiffieHellmanGroup15Sha512,

    /// Diffie-Hellman on the 6144-bit MODP group with sha-2-512 digest.
    DiffieHellmanGroup17Sha512,

    /// Diffie-Hellman on the 2048-bit MODP group with sha-2-224 digest.
    #[strum(serialize = "diffie-hellman-group14-sha224@ssh.com")]
    DiffieHellmanGroup14Sha224Ssh,

    /// Diffie-Hellman on the 2048-bit MODP group with sha-2-256 digest.
    #[strum(serialize = "diffie-hellman-group14-sha256@ssh.com")]
    DiffieHellmanGroup14Sha256Ssh,

    /// Diffie-Hellman on the 3072-bit MODP group with sha-2-256 digest.
    #[strum(serialize = "diffie-hellman-group15-sha256@ssh.com")]
    DiffieHellmanGroup15Sha256Ssh,

    /// Diffie-Hellman on the 3072-bit MODP group with sha-2-384 digest.
    #[strum(serialize = "diffie-hellman-group15-sha384@ssh.com")]
    DiffieHellmanGroup15Sha384Ssh,

    /// Diffie-Hellman on the 4096-bit MODP group with sha-2-384 digest.
    #[strum(serialize = "diffie-hellman-group16-sha384@ssh.com")]
    DiffieHellmanGroup16Sha384Ssh,

    /// Diffie-Hellman on the 4096-bit MODP group with sha-2-512 digest.
    #[strum(serialize = "diffie-hellman-group16-sha512@ssh.com")]
    DiffieHellmanGroup16Sha512Ssh,

    /// Diffie-Hellman on the 8192-bit MODP group with sha-2-512 digest.
    #[strum(serialize = "diffie-hellman-group18-sha512@ssh.com")]
    DiffieHellmanGroup18Sha512Ssh,

    /// Diffie-Hellman on the 2048-bit MODP group with sha-1 digest.
    DiffieHellmanGroup14Sha1,

    /// Diffie-Hellman on the 1024-bit Oakley group 2 with sha-1 digest.
    DiffieHellmanGroup1Sha1,

    /// Diffie-Hellman group exchange with sha-1 digest.
    DiffieHellmanGroupExchangeSha1,
}

impl Catalog for Kex {
    fn all() -> Vec<Self> {
        vec![
            Self::Curve25519Sha256,
            Self::Curve25519Sha256Libssh,
            Self::Curve448Sha512,
            Self::EcdhSha2Nistp256,
            Self::EcdhSha2Nistp384,
            Self::EcdhSha2Nistp521,
            Self::DiffieHellmanGroupExchangeSha256,
            Self::DiffieHellmanGroup16Sha512,
            Self::DiffieHellmanGroup18Sha512,
            Self::DiffieHellmanGroup14Sha256,
            Self::DiffieHellmanGroup15Sha512,
            Self::DiffieHellmanGroup17Sha512,
            Self::DiffieHellmanGroup14Sha224Ssh,
            Self::DiffieHellmanGroup14Sha256Ssh,
            Self::DiffieHellmanGroup15Sha256Ssh,
            Self::DiffieHellmanGroup15Sha384Ssh,
            Self::DiffieHellmanGroup16Sha384Ssh,
            Self::DiffieHellmanGroup16Sha512Ssh,
            Self::DiffieHellmanGroup18Sha512Ssh,
            Self::DiffieHellmanGroup14Sha1,
            Self::DiffieHellmanGroup1Sha1,
            Self::DiffieHellmanGroupExchangeSha1,
        ]
    }

    fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::DiffieHellmanGroup14Sha1
                | Self::DiffieHellmanGroup1Sha1
                | Self::DiffieHellmanGroupExchangeSha1
        )
    }
}

/// Dispatch a key-exchange method to its implementation, monomorphized over its digest.
macro_rules! dispatch {
    ($kex:expr, $method:ident, $($args:expr),*) => {{
        use sha1::Sha1;
        use sha2::{Sha224, Sha256, Sha384, Sha512};

        match $kex {
            Kex::Curve25519Sha256 | Kex::Curve25519Sha256Libssh => {
                curve25519::$method::<Sha256>($($args),*).await
            }
            Kex::Curve448Sha512 => curve448::$method::<Sha512>($($args),*).await,
            Kex::EcdhSha2Nistp256 => ecdh::$method::<p256::NistP256, Sha256>($($args),*).await,
            Kex::EcdhSha2Nistp384 => ecdh::$method::<p384::NistP384, Sha384>($($args),*).await,
            Kex::EcdhSha2Nistp521 => ecdh::$method::<p521::NistP521, Sha512>($($args),*).await,
            Kex::DiffieHellmanGroupExchangeSha256 => {
                dh::gex::$method::<Sha256>($($args),*).await
            }
            Kex::DiffieHellmanGroupExchangeSha1 => dh::gex::$method::<Sha1>($($args),*).await,
            Kex::DiffieHellmanGroup1Sha1 => {
                dh::fixed::$method::<Sha1>(groups::GROUP1, $($args),*).await
            }
            Kex::DiffieHellmanGroup14Sha1 => {
                dh::fixed::$method::<Sha1>(groups::GROUP14, $($args),*).await
            }
            Kex::DiffieHellmanGroup14Sha224Ssh => {
                dh::fixed::$method::<Sha224>(groups::GROUP14, $($args),*).await
            }
            Kex::DiffieHellmanGroup14Sha256 | Kex::DiffieHellmanGroup14Sha256Ssh => {
                dh::fixed::$method::<Sha256>(groups::GROUP14, $($args),*).await
            }
            Kex::DiffieHellmanGroup15Sha256Ssh => {
                dh::fixed::$method::<Sha256>(groups::GROUP15, $($args),*).await
            }
            Kex::DiffieHellmanGroup15Sha384Ssh => {
                dh::fixed::$method::<Sha384>(groups::GROUP15, $($args),*).await
            }
            Kex::DiffieHellmanGroup15Sha512 => {
                dh::fixed::$method::<Sha512>(groups::GROUP15, $($args),*).await
            }
            Kex::DiffieHellmanGroup16Sha384Ssh => {
                dh::fixed::$method::<Sha384>(groups::GROUP16, $($args),*).await
            }
            Kex::DiffieHellmanGroup16Sha512 | Kex::DiffieHellmanGroup16Sha512Ssh => {
                dh::fixed::$method::<Sha512>(groups::GROUP16, $($args),*).await
            }
            Kex::DiffieHellmanGroup17Sha512 => {
                dh::fixed::$method::<Sha512>(groups::GROUP17, $($args),*).await
            }
            Kex::DiffieHellmanGroup18Sha512 | Kex::DiffieHellmanGroup18Sha512Ssh => {
                dh::fixed::$method::<Sha512>(groups::GROUP18, $($args),*).await
            }
        }
    }};
}

impl Kex {
    pub(crate) async fn as_client(
        &self,
        stream: &mut Stream<impl Pipe>,
        client: KexMeta<'_>,
        server: KexMeta<'_>,
        key: &Key,
    ) -> Result<TransportPair> {
        let (client, server) = dispatch!(self, as_client, stream, client, server, key)?;

        Ok(TransportPair {
            tx: client,
            rx: server,
        })
    }

    pub(crate) async fn as_server(
        &self,
        stream: &mut Stream<impl Pipe>,
        client: KexMeta<'_>,
        server: KexMeta<'_>,
        key: &HostKey,
        algorithm: &Key,
    ) -> Result<TransportPair> {
        let (client, server) =
            dispatch!(self, as_server, stream, client, server, key, algorithm)?;

        Ok(TransportPair {
            tx: server,
            rx: client,
        })
    }
}

/// The exchange hash `H`, over the common prefix of every method's transcript.
pub(crate) struct Exchange {
    buf: Vec<u8>,
}

impl Exchange {
    pub fn new(client: &KexMeta<'_>, server: &KexMeta<'_>, k_s: &[u8]) -> Result<Self> {
        let mut buf = Vec::new();

        client.id.to_string().encode(&mut buf)?;
        server.id.to_string().encode(&mut buf)?;
        client.kexinit.encode(&mut buf)?;
        server.kexinit.encode(&mut buf)?;
        k_s.encode(&mut buf)?;

        Ok(Self { buf })
    }

    pub fn u32(mut self, value: u32) -> Result<Self> {
        value.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Result<Self> {
        bytes.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn mpint(mut self, value: &Mpint) -> Result<Self> {
        value.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn hash<H: Digest>(self, secret: &Secret) -> Vec<u8> {
        H::new()
            .chain_update(&self.buf)
            .chain_update((secret.expose_secret().len() as u32).to_be_bytes())
            .chain_update(secret.expose_secret())
            .finalize()
            .to_vec()
    }
}

/// The shared secret `K`, as the body of its `mpint` encoding.
pub(crate) type Secret = SecretBox<Vec<u8>>;

pub(crate) fn secret(magnitude: &[u8]) -> Result<Secret> {
    Ok(SecretBox::new(Box::new(mpint(magnitude)?.as_bytes().to_vec())))
}

/// Derive the keys of both directions, and fix the session identifier on the first exchange.
pub(crate) fn transports<H: Digest + FixedOutputReset>(
    stream: &mut Stream<impl Pipe>,
    secret: &Secret,
    hash: &[u8],
    client: KexMeta<'_>,
    server: KexMeta<'_>,
    encrypt: bool,
) -> Result<(crate::stream::Transport, crate::stream::Transport)> {
    let session_id = stream.with_session(hash).to_vec();

    let keys = Keys::as_client::<H>(
        secret.expose_secret(),
        hash,
        &session_id,
        &client.cipher,
        &client.hmac,
    );
    let client = client.into_transport(keys, !encrypt)?;

    let keys = Keys::as_server::<H>(
        secret.expose_secret(),
        hash,
        &session_id,
        &server.cipher,
        &server.hmac,
    );
    let server = server.into_transport(keys, encrypt)?;

    Ok((client, server))
}

/// Verify the server's signature over the exchange hash, from the client side.
pub(crate) fn verify_host(algorithm: &Key, k_s: &[u8], hash: &[u8], signature: &[u8]) -> Result<()> {
    let (key, _) = key::decode_blob(algorithm, k_s)?;

    key::verify(&key, algorithm, hash, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kexinit(kex: &[&str]) -> KexInit {
        let any = NameList::from_iter(["any"]);

        KexInit {
            cookie: [0; 16],
            kex_algorithms: NameList::from_iter(kex),
            server_host_key_algorithms: any.clone(),
            encryption_algorithms_client_to_server: any.clone(),
            encryption_algorithms_server_to_client: any.clone(),
            mac_algorithms_client_to_server: any.clone(),
            mac_algorithms_server_to_client: any.clone(),
            compression_algorithms_client_to_server: any.clone(),
            compression_algorithms_server_to_client: any,
            languages_client_to_server: NameList::default(),
            languages_server_to_client: NameList::default(),
            first_kex_packet_follows: false,
            reserved: 0,
        }
    }

    #[test]
    fn negotiation_follows_client_preference() {
        let client = kexinit(&["curve25519-sha256"]);
        let server = kexinit(&["curve448-sha512", "curve25519-sha256"]);

        assert_eq!(
            Kex::negociate(&client, &server).unwrap(),
            Kex::Curve25519Sha256
        );
    }

    #[test]
    fn no_common_kex_fails() {
        let client = kexinit(&["diffie-hellman-group1-sha1"]);
        let server = kexinit(&["curve448-sha512", "curve25519-sha256"]);

        assert!(matches!(
            Kex::negociate(&client, &server),
            Err(crate::Error::Negotiation(NegotiationError::Kex))
        ));
    }

    #[test]
    fn names_and_legacy_set() {
        let names = Kex::defaults()
            .iter()
            .map(|kex| kex.as_ref().to_string())
            .collect::<Vec<_>>();

        assert!(names.contains(&"diffie-hellman-group14-sha256".to_string()));
        assert!(names.contains(&"ecdh-sha2-nistp521".to_string()));
        assert!(names.contains(&"diffie-hellman-group-exchange-sha256".to_string()));
        assert!(!names.contains(&"diffie-hellman-group1-sha1".to_string()));
    }
}
