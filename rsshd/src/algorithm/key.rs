//! Signature algorithms, host identities and signature verification.

use digest::{const_oid::AssociatedOid, Digest};
use signature::{SignatureEncoding, Signer, Verifier};
use ssh_key::{public::KeyData, Algorithm, Certificate, EcdsaCurve, PrivateKey};
use strum::{AsRefStr, EnumString};

use super::{Catalog, Negociate};
use crate::{
    error::NegotiationError,
    packet::{trans::KexInit, Decode, Encode, NameList},
    Error, Result,
};

impl Negociate for Key {
    const ERR: NegotiationError = NegotiationError::Key;

    fn field(kex: &KexInit) -> &NameList {
        &kex.server_host_key_algorithms
    }
}

/// SSH public key signature algorithms, for host keys and user keys.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, EnumString, AsRefStr)]
pub enum Key {
    /// Ed25519 certificate.
    #[strum(serialize = "ssh-ed25519-cert-v01@openssh.com")]
    Ed25519Cert,

    /// ECDSA certificate on the NIST P-256 curve.
    #[strum(serialize = "ecdsa-sha2-nistp256-cert-v01@openssh.com")]
    EcdsaNistp256Cert,

    /// ECDSA certificate on the NIST P-384 curve.
    #[strum(serialize = "ecdsa-sha2-nistp384-cert-v01@openssh.com")]
    EcdsaNistp384Cert,

    /// ECDSA certificate on the NIST P-521 curve.
    #[strum(serialize = "ecdsa-sha2-nistp521-cert-v01@openssh.com")]
    EcdsaNistp521Cert,

    /// RSA certificate with sha-2-512 signatures.
    #[strum(serialize = "rsa-sha2-512-cert-v01@openssh.com")]
    RsaSha512Cert,

    /// RSA certificate with sha-2-256 signatures.
    #[strum(serialize = "rsa-sha2-256-cert-v01@openssh.com")]
    RsaSha256Cert,

    /// RSA certificate with sha-1 signatures.
    #[strum(serialize = "ssh-rsa-cert-v01@openssh.com")]
    RsaCert,

    /// DSA certificate.
    #[strum(serialize = "ssh-dss-cert-v01@openssh.com")]
    DsaCert,

    /// Ed25519.
    #[strum(serialize = "ssh-ed25519")]
    Ed25519,

    /// ECDSA on the NIST P-256 curve.
    #[strum(serialize = "ecdsa-sha2-nistp256")]
    EcdsaNistp256,

    /// ECDSA on the NIST P-384 curve.
    #[strum(serialize = "ecdsa-sha2-nistp384")]
    EcdsaNistp384,

    /// ECDSA on the NIST P-521 curve.
    #[strum(serialize = "ecdsa-sha2-nistp521")]
    EcdsaNistp521,

    /// RSA with sha-2-512 signatures.
    #[strum(serialize = "rsa-sha2-512")]
    RsaSha512,

    /// RSA with sha-2-256 signatures.
    #[strum(serialize = "rsa-sha2-256")]
    RsaSha256,

    /// RSA with sha-1 signatures.
    #[strum(serialize = "ssh-rsa")]
    Rsa,

    /// DSA.
    #[strum(serialize = "ssh-dss")]
    Dsa,
}

impl Catalog for Key {
    fn all() -> Vec<Self> {
        vec![
            Self::Ed25519Cert,
            Self::EcdsaNistp256Cert,
            Self::EcdsaNistp384Cert,
            Self::EcdsaNistp521Cert,
            Self::RsaSha512Cert,
            Self::RsaSha256Cert,
            Self::RsaCert,
            Self::DsaCert,
            Self::Ed25519,
            Self::EcdsaNistp256,
            Self::EcdsaNistp384,
            Self::EcdsaNistp521,
            Self::RsaSha512,
            Self::RsaSha256,
            Self::Rsa,
            Self::Dsa,
        ]
    }

    fn is_legacy(&self) -> bool {
        matches!(self.plain(), Self::Rsa | Self::Dsa)
    }
}

impl Key {
    /// Whether the algorithm designates a certificate.
    pub fn is_certificate(&self) -> bool {
        self.plain() != *self
    }

    /// The algorithm without its certificate part.
    pub fn plain(&self) -> Self {
        match self {
            Self::Ed25519Cert => Self::Ed25519,
            Self::EcdsaNistp256Cert => Self::EcdsaNistp256,
            Self::EcdsaNistp384Cert => Self::EcdsaNistp384,
            Self::EcdsaNistp521Cert => Self::EcdsaNistp521,
            Self::RsaSha512Cert => Self::RsaSha512,
            Self::RsaSha256Cert => Self::RsaSha256,
            Self::RsaCert => Self::Rsa,
            Self::DsaCert => Self::Dsa,
            other => other.clone(),
        }
    }

    /// Whether a key of the provided type can produce signatures for this algorithm.
    pub fn accepts(&self, algorithm: &Algorithm) -> bool {
        match self.plain() {
            Self::Ed25519 => *algorithm == Algorithm::Ed25519,
            Self::EcdsaNistp256 => {
                *algorithm == Algorithm::Ecdsa {
                    curve: EcdsaCurve::NistP256,
                }
            }
            Self::EcdsaNistp384 => {
                *algorithm == Algorithm::Ecdsa {
                    curve: EcdsaCurve::NistP384,
                }
            }
            Self::EcdsaNistp521 => {
                *algorithm == Algorithm::Ecdsa {
                    curve: EcdsaCurve::NistP521,
                }
            }
            Self::RsaSha512 | Self::RsaSha256 | Self::Rsa => {
                matches!(algorithm, Algorithm::Rsa { .. })
            }
            _ => *algorithm == Algorithm::Dsa,
        }
    }
}

/// A host identity: a private key, and optionally the certificate that binds it to a certificate authority.
#[derive(Debug, Clone)]
pub struct HostKey {
    /// The private key.
    pub key: PrivateKey,

    /// The certificate of the key.
    pub certificate: Option<Certificate>,
}

impl From<PrivateKey> for HostKey {
    fn from(key: PrivateKey) -> Self {
        Self {
            key,
            certificate: None,
        }
    }
}

impl HostKey {
    /// Attach a `certificate` to the key, failing if it was issued for another key.
    pub fn with_certificate(mut self, certificate: Certificate) -> Result<Self> {
        if certificate.public_key() != self.key.public_key().key_data() {
            return Err(ssh_key::Error::PublicKey.into());
        }

        self.certificate = Some(certificate);

        Ok(self)
    }

    /// Whether this identity is able to sign for the `algorithm`.
    pub fn supports(&self, algorithm: &Key) -> bool {
        algorithm.accepts(&self.key.algorithm())
            && (!algorithm.is_certificate() || self.certificate.is_some())
    }

    /// The signature algorithms this identity is able to sign for, by order of preference.
    pub fn algorithms(&self, legacy: bool) -> impl Iterator<Item = Key> + '_ {
        Key::enabled(legacy)
            .into_iter()
            .filter(|algorithm| self.supports(algorithm))
    }

    /// The public key (or certificate) blob to send for this `algorithm`.
    pub fn blob(&self, algorithm: &Key) -> Result<Vec<u8>> {
        match &self.certificate {
            Some(certificate) if algorithm.is_certificate() => {
                let mut buf = Vec::new();
                certificate.encode(&mut buf)?;

                Ok(buf)
            }
            _ => Ok(self.key.public_key().to_bytes()?),
        }
    }

    /// Sign `data` for this `algorithm`, returning the encoded signature blob.
    pub fn sign(&self, algorithm: &Key, data: &[u8]) -> Result<Vec<u8>> {
        fn rsa<D: Digest + AssociatedOid>(
            key: &PrivateKey,
            name: &str,
            data: &[u8],
        ) -> Result<Vec<u8>> {
            let keypair = key
                .key_data()
                .rsa()
                .ok_or(ssh_key::Error::AlgorithmUnknown)?;
            let key = rsa::pkcs1v15::SigningKey::<D>::new(rsa::RsaPrivateKey::try_from(keypair)?);
            let signature = key.try_sign(data)?;

            let mut buf = Vec::new();
            name.encode(&mut buf)?;
            signature.to_vec().encode(&mut buf)?;

            Ok(buf)
        }

        match algorithm.plain() {
            Key::RsaSha512 => rsa::<sha2::Sha512>(&self.key, Key::RsaSha512.as_ref(), data),
            Key::RsaSha256 => rsa::<sha2::Sha256>(&self.key, Key::RsaSha256.as_ref(), data),
            Key::Rsa => rsa::<sha1::Sha1>(&self.key, Key::Rsa.as_ref(), data),
            _ => {
                let signature: ssh_key::Signature = self.key.try_sign(data)?;

                Ok(signature.to_vec())
            }
        }
    }
}

/// Verify the signature `blob` of `data` by `key`, the signature being required to match the `algorithm`.
pub fn verify(key: &KeyData, algorithm: &Key, data: &[u8], blob: &[u8]) -> Result<()> {
    let mut reader = blob;
    let name = String::decode(&mut reader)?;

    if name != algorithm.plain().as_ref() || !algorithm.accepts(&key.algorithm()) {
        return Err(signature::Error::new().into());
    }

    match algorithm.plain() {
        Key::Rsa => {
            let public = key.rsa().ok_or(ssh_key::Error::AlgorithmUnknown)?;
            let signature = rsa::pkcs1v15::Signature::try_from(Vec::<u8>::decode(&mut reader)?.as_slice())?;

            rsa::pkcs1v15::VerifyingKey::<sha1::Sha1>::new(rsa::RsaPublicKey::try_from(public)?)
                .verify(data, &signature)?;
        }
        _ => {
            let signature = ssh_key::Signature::try_from(blob)?;

            key.verify(data, &signature)?;
        }
    }

    Ok(())
}

/// Decode a public key blob, or the key embedded in a certificate blob.
pub fn decode_blob(algorithm: &Key, blob: &[u8]) -> Result<(KeyData, Option<Certificate>)> {
    if algorithm.is_certificate() {
        let certificate = Certificate::decode(&mut &blob[..])?;

        Ok((certificate.public_key().clone(), Some(certificate)))
    } else {
        let key = ssh_key::PublicKey::from_bytes(blob)?;

        if !algorithm.accepts(&key.algorithm()) {
            return Err(Error::Key(ssh_key::Error::AlgorithmUnknown));
        }

        Ok((key.key_data().clone(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519() -> HostKey {
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .unwrap()
            .into()
    }

    #[test]
    fn sign_and_verify() {
        let host = ed25519();
        let signature = host.sign(&Key::Ed25519, b"exchange hash").unwrap();

        let (key, certificate) =
            decode_blob(&Key::Ed25519, &host.blob(&Key::Ed25519).unwrap()).unwrap();
        assert!(certificate.is_none());

        assert!(verify(&key, &Key::Ed25519, b"exchange hash", &signature).is_ok());
        assert!(verify(&key, &Key::Ed25519, b"another hash", &signature).is_err());
    }

    #[test]
    fn certificates_are_sent_as_blobs() {
        let ca = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let host = ed25519();

        let mut builder = ssh_key::certificate::Builder::new_with_random_nonce(
            &mut rand::thread_rng(),
            host.key.public_key().key_data().clone(),
            0,
            u64::MAX,
        )
        .unwrap();
        builder
            .cert_type(ssh_key::certificate::CertType::Host)
            .unwrap()
            .valid_principal("localhost")
            .unwrap();
        let certificate = builder.sign(&ca).unwrap();

        let host = host.with_certificate(certificate.clone()).unwrap();
        assert!(host.supports(&Key::Ed25519Cert));

        let (key, decoded) = decode_blob(&Key::Ed25519Cert, &host.blob(&Key::Ed25519Cert).unwrap()).unwrap();
        assert_eq!(decoded, Some(certificate));
        assert_eq!(&key, host.key.public_key().key_data());

        // The plain algorithm still sends the bare public key.
        let (_, decoded) = decode_blob(&Key::Ed25519, &host.blob(&Key::Ed25519).unwrap()).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn certificate_algorithms_need_a_certificate() {
        let host = ed25519();
        let algorithms = host.algorithms(false).collect::<Vec<_>>();

        assert_eq!(algorithms, [Key::Ed25519]);
    }

    #[test]
    fn legacy_names() {
        assert!(Key::Rsa.is_legacy());
        assert!(Key::RsaCert.is_legacy());
        assert!(!Key::RsaSha256Cert.is_legacy());
        assert_eq!(Key::RsaSha256Cert.plain().as_ref(), "rsa-sha2-256");
    }
}
