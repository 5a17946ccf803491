use aes_gcm::aead::{AeadInPlace, KeyInit};
use chacha20::ChaCha20Legacy;
use cipher::{
    generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit,
    StreamCipher, StreamCipherSeek,
};
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;

use super::{Catalog, Negociate};
use crate::{
    error::{NegotiationError, ProtocolError},
    packet::{trans::KexInit, NameList},
    side::{client::Client, server::Server},
    Error, Result,
};

impl Negociate<Client> for Cipher {
    const ERR: NegotiationError = NegotiationError::Cipher;

    fn field(kex: &KexInit) -> &NameList {
        &kex.encryption_algorithms_client_to_server
    }
}

impl Negociate<Server> for Cipher {
    const ERR: NegotiationError = NegotiationError::Cipher;

    fn field(kex: &KexInit) -> &NameList {
        &kex.encryption_algorithms_server_to_client
    }
}

/// SSH cipher algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    /// ChaCha20 stream cipher with Poly1305 authenticator (OpenSSH mode).
    #[strum(serialize = "chacha20-poly1305@openssh.com")]
    ChaCha20Poly1305,

    /// AES-256 in Galois/Counter Mode (GCM).
    #[strum(serialize = "aes256-gcm@openssh.com")]
    Aes256Gcm,

    /// AES-128 in Galois/Counter Mode (GCM).
    #[strum(serialize = "aes128-gcm@openssh.com")]
    Aes128Gcm,

    /// AES-256 in counter (CTR) mode.
    Aes256Ctr,

    /// AES-192 in counter (CTR) mode.
    Aes192Ctr,

    /// AES-128 in counter (CTR) mode.
    Aes128Ctr,

    /// AES-256 in cipher block chaining (CBC) mode.
    Aes256Cbc,

    /// AES-192 in cipher block chaining (CBC) mode.
    Aes192Cbc,

    /// AES-128 in cipher block chaining (CBC) mode.
    Aes128Cbc,

    /// TripleDES in cipher block chaining (CBC) mode.
    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    /// No cipher algorithm, only in effect before the first key-exchange.
    #[default]
    None,
}

impl Catalog for Cipher {
    fn all() -> Vec<Self> {
        vec![
            Self::ChaCha20Poly1305,
            Self::Aes256Gcm,
            Self::Aes128Gcm,
            Self::Aes256Ctr,
            Self::Aes192Ctr,
            Self::Aes128Ctr,
            Self::Aes256Cbc,
            Self::Aes192Cbc,
            Self::Aes128Cbc,
            Self::TDesCbc,
        ]
    }

    fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::Aes256Cbc | Self::Aes192Cbc | Self::Aes128Cbc | Self::TDesCbc
        )
    }
}

impl Cipher {
    pub(crate) fn block_size(&self) -> usize {
        match self {
            Self::None | Self::TDesCbc | Self::ChaCha20Poly1305 => 8,
            Self::Aes256Gcm
            | Self::Aes128Gcm
            | Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    pub(crate) fn key_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Gcm | Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::TDesCbc | Self::Aes192Cbc | Self::Aes192Ctr => 24,
            Self::Aes256Gcm | Self::Aes256Cbc | Self::Aes256Ctr => 32,
            Self::ChaCha20Poly1305 => 64,
        }
    }

    pub(crate) fn iv_size(&self) -> usize {
        match self {
            Self::None | Self::ChaCha20Poly1305 => 0,
            Self::TDesCbc => 8,
            Self::Aes256Gcm | Self::Aes128Gcm => 12,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    /// Whether the cipher authenticates the packets itself, making the MAC irrelevant.
    pub(crate) fn is_aead(&self) -> bool {
        matches!(
            self,
            Self::ChaCha20Poly1305 | Self::Aes256Gcm | Self::Aes128Gcm
        )
    }

    pub(crate) fn tag_size(&self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }

    /// Initialize the cipher state for one direction from the derived `key` and `iv`.
    pub(crate) fn state(&self, key: &[u8], iv: &[u8], encrypt: bool) -> Result<CipherState> {
        fn ctr<C: KeyIvInit + StreamCipher + Send + Sync + 'static>(
            key: &[u8],
            iv: &[u8],
        ) -> Result<CipherState> {
            Ok(CipherState::Block(Box::new(Ctr(
                C::new_from_slices(key, iv).map_err(|_| Error::Cipher)?,
            ))))
        }

        fn cbc<E, D>(key: &[u8], iv: &[u8], encrypt: bool) -> Result<CipherState>
        where
            E: KeyIvInit + BlockEncryptMut + Send + Sync + 'static,
            D: KeyIvInit + BlockDecryptMut + Send + Sync + 'static,
        {
            Ok(CipherState::Block(if encrypt {
                Box::new(CbcEncrypt(
                    E::new_from_slices(key, iv).map_err(|_| Error::Cipher)?,
                ))
            } else {
                Box::new(CbcDecrypt(
                    D::new_from_slices(key, iv).map_err(|_| Error::Cipher)?,
                ))
            }))
        }

        match self {
            Self::None => Ok(CipherState::None),
            Self::ChaCha20Poly1305 => {
                if key.len() != 64 {
                    return Err(Error::Cipher);
                }

                let mut main = [0u8; 32];
                let mut header = [0u8; 32];
                main.copy_from_slice(&key[..32]);
                header.copy_from_slice(&key[32..]);

                Ok(CipherState::ChaCha(ChaCha { main, header }))
            }
            Self::Aes256Gcm => Gcm::new(
                GcmCipher::Aes256(Box::new(
                    aes_gcm::Aes256Gcm::new_from_slice(key).map_err(|_| Error::Cipher)?,
                )),
                iv,
            ),
            Self::Aes128Gcm => Gcm::new(
                GcmCipher::Aes128(Box::new(
                    aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| Error::Cipher)?,
                )),
                iv,
            ),
            Self::Aes256Ctr => ctr::<ctr::Ctr128BE<aes::Aes256>>(key, iv),
            Self::Aes192Ctr => ctr::<ctr::Ctr128BE<aes::Aes192>>(key, iv),
            Self::Aes128Ctr => ctr::<ctr::Ctr128BE<aes::Aes128>>(key, iv),
            Self::Aes256Cbc => {
                cbc::<cbc::Encryptor<aes::Aes256>, cbc::Decryptor<aes::Aes256>>(key, iv, encrypt)
            }
            Self::Aes192Cbc => {
                cbc::<cbc::Encryptor<aes::Aes192>, cbc::Decryptor<aes::Aes192>>(key, iv, encrypt)
            }
            Self::Aes128Cbc => {
                cbc::<cbc::Encryptor<aes::Aes128>, cbc::Decryptor<aes::Aes128>>(key, iv, encrypt)
            }
            Self::TDesCbc => {
                cbc::<cbc::Encryptor<des::TdesEde3>, cbc::Decryptor<des::TdesEde3>>(
                    key, iv, encrypt,
                )
            }
        }
    }
}

/// A non-authenticating cipher, applied in place on block-aligned buffers.
pub(crate) trait Crypt: Send + Sync {
    fn apply(&mut self, buf: &mut [u8]) -> Result<()>;
}

struct Ctr<C>(C);

impl<C: StreamCipher + Send + Sync> Crypt for Ctr<C> {
    fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.try_apply_keystream(buf).map_err(|_| Error::Cipher)
    }
}

struct CbcEncrypt<C>(C);

impl<C: BlockEncryptMut + Send + Sync> Crypt for CbcEncrypt<C> {
    fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        let size = C::block_size();
        if buf.len() % size != 0 {
            return Err(ProtocolError::Misaligned.into());
        }

        for block in buf.chunks_exact_mut(size) {
            self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        Ok(())
    }
}

struct CbcDecrypt<C>(C);

impl<C: BlockDecryptMut + Send + Sync> Crypt for CbcDecrypt<C> {
    fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        let size = C::block_size();
        if buf.len() % size != 0 {
            return Err(ProtocolError::Misaligned.into());
        }

        for block in buf.chunks_exact_mut(size) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        Ok(())
    }
}

enum GcmCipher {
    Aes128(Box<aes_gcm::Aes128Gcm>),
    Aes256(Box<aes_gcm::Aes256Gcm>),
}

/// AES-GCM as used by OpenSSH: the packet length is the additional data,
/// and the last 8 bytes of the nonce are an invocation counter.
pub(crate) struct Gcm {
    cipher: GcmCipher,
    nonce: [u8; 12],
}

impl Gcm {
    fn new(cipher: GcmCipher, iv: &[u8]) -> Result<CipherState> {
        Ok(CipherState::Gcm(Self {
            cipher,
            nonce: iv.try_into().map_err(|_| Error::Cipher)?,
        }))
    }

    fn increment(&mut self) {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.nonce[4..]);

        let counter = u64::from_be_bytes(counter).wrapping_add(1);
        self.nonce[4..].copy_from_slice(&counter.to_be_bytes());
    }

    pub(crate) fn seal(&mut self, aad: &[u8], buf: &mut [u8]) -> Result<Vec<u8>> {
        let nonce = aes_gcm::Nonce::from_slice(&self.nonce);
        let tag = match &self.cipher {
            GcmCipher::Aes128(cipher) => cipher.encrypt_in_place_detached(nonce, aad, buf),
            GcmCipher::Aes256(cipher) => cipher.encrypt_in_place_detached(nonce, aad, buf),
        }
        .map_err(|_| Error::Cipher)?;

        self.increment();

        Ok(tag.to_vec())
    }

    pub(crate) fn open(&mut self, aad: &[u8], buf: &mut [u8], tag: &[u8]) -> Result<()> {
        let nonce = aes_gcm::Nonce::from_slice(&self.nonce);
        let tag = aes_gcm::Tag::from_slice(tag);
        match &self.cipher {
            GcmCipher::Aes128(cipher) => cipher.decrypt_in_place_detached(nonce, aad, buf, tag),
            GcmCipher::Aes256(cipher) => cipher.decrypt_in_place_detached(nonce, aad, buf, tag),
        }
        .map_err(|_| ProtocolError::Integrity)?;

        self.increment();

        Ok(())
    }
}

/// The `chacha20-poly1305@openssh.com` construction, keyed by the packet sequence number.
pub(crate) struct ChaCha {
    main: [u8; 32],
    header: [u8; 32],
}

impl ChaCha {
    fn stream(key: &[u8; 32], seq: u32) -> ChaCha20Legacy {
        let nonce = (seq as u64).to_be_bytes();

        ChaCha20Legacy::new(GenericArray::from_slice(key), GenericArray::from_slice(&nonce))
    }

    /// Decrypt or encrypt the 4-byte packet length.
    pub(crate) fn length(&self, seq: u32, buf: &mut [u8]) {
        Self::stream(&self.header, seq).apply_keystream(buf);
    }

    fn payload(&self, seq: u32) -> (ChaCha20Legacy, poly1305::Poly1305) {
        use poly1305::universal_hash::KeyInit;

        let mut stream = Self::stream(&self.main, seq);

        let mut key = [0u8; 32];
        stream.apply_keystream(&mut key);
        stream.seek(64u64);

        (stream, poly1305::Poly1305::new(GenericArray::from_slice(&key)))
    }

    /// Encrypt the whole packet in place, returning the authentication tag.
    pub(crate) fn seal(&self, seq: u32, packet: &mut [u8]) -> Vec<u8> {
        let (length, body) = packet.split_at_mut(4);
        self.length(seq, length);

        let (mut stream, mac) = self.payload(seq);
        stream.apply_keystream(body);

        mac.compute_unpadded(packet).to_vec()
    }

    /// Verify the authentication tag over the encrypted packet,
    /// and decrypt its body in place, leaving the encrypted length untouched.
    pub(crate) fn open(&self, seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<()> {
        let (mut stream, mac) = self.payload(seq);

        if !bool::from(mac.compute_unpadded(packet).as_slice().ct_eq(tag)) {
            return Err(ProtocolError::Integrity.into());
        }

        stream.apply_keystream(&mut packet[4..]);

        Ok(())
    }
}

/// The running state of the cipher for one direction of the transport.
#[derive(Default)]
pub(crate) enum CipherState {
    #[default]
    None,
    Block(Box<dyn Crypt>),
    Gcm(Gcm),
    ChaCha(ChaCha),
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Block(_) => "Block",
            Self::Gcm(_) => "Gcm",
            Self::ChaCha(_) => "ChaCha",
        })
    }
}
