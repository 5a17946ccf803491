use futures::{AsyncRead, AsyncReadExt};
use rand::Rng;
use secrecy::ExposeSecret;

use crate::{
    algorithm::{Cipher, CipherState, Compress, CompressState, Hmac},
    error::ProtocolError,
    Result,
};

use super::Keys;

/// Minimum size of the padding, in bytes.
const MIN_PADDING: usize = 4;

/// Minimum size of a whole packet, excluding the MAC, in bytes.
const MIN_PACKET: usize = 16;

#[derive(Debug, Default)]
pub struct TransportPair {
    pub rx: Transport,
    pub tx: Transport,
}

impl TransportPair {
    /// Start compressing in both directions, if a delayed compression has been negotiated.
    pub fn enable_delayed_compression(&mut self) {
        self.rx.enable_delayed_compression();
        self.tx.enable_delayed_compression();
    }
}

/// The algorithms, keys and running state of one direction of the transport.
#[derive(Debug, Default)]
pub struct Transport {
    pub cipher: Cipher,
    pub hmac: Hmac,
    pub compress: Compress,

    chain: Keys,
    state: CipherState,
    compression: CompressState,
    compressing: bool,
}

impl Transport {
    pub fn new(
        cipher: Cipher,
        hmac: Hmac,
        compress: Compress,
        chain: Keys,
        encrypt: bool,
    ) -> Result<Self> {
        let state = cipher.state(
            chain.key.expose_secret(),
            chain.iv.expose_secret(),
            encrypt,
        )?;
        let compressing = compress != Compress::None && !compress.is_delayed();

        Ok(Self {
            cipher,
            hmac,
            compress,
            chain,
            state,
            compression: Default::default(),
            compressing,
        })
    }

    pub fn enable_delayed_compression(&mut self) {
        if self.compress.is_delayed() {
            self.compressing = true;
        }
    }

    fn block_size(&self) -> usize {
        self.cipher.block_size().max(8)
    }

    /// Whether the packet length is sent in clear or separately from the encrypted body.
    fn is_length_apart(&self) -> bool {
        self.cipher.is_aead() || self.hmac.etm()
    }

    fn mac_size(&self) -> usize {
        if self.cipher.is_aead() {
            self.cipher.tag_size()
        } else {
            self.hmac.size()
        }
    }

    fn crypt(state: &mut CipherState, buf: &mut [u8]) -> Result<()> {
        match state {
            CipherState::Block(crypt) => crypt.apply(buf),
            _ => Ok(()),
        }
    }

    /// Compress, pad, encrypt and authenticate the `payload` into a binary packet.
    pub fn seal(&mut self, payload: &[u8], seq: u32) -> Result<Vec<u8>> {
        let compressed;
        let payload = if self.compressing {
            compressed = self.compression.compress(payload)?;
            &compressed[..]
        } else {
            payload
        };

        let block = self.block_size();
        let aligned = if self.is_length_apart() { 1 } else { 5 } + payload.len();

        let mut padding = block - aligned % block;
        if padding < MIN_PADDING {
            padding += block;
        }
        if 5 + payload.len() + padding < MIN_PACKET {
            padding += block;
        }

        let length = 1 + payload.len() + padding;
        let mut buf = Vec::with_capacity(4 + length + self.mac_size());
        buf.extend_from_slice(&(length as u32).to_be_bytes());
        buf.push(padding as u8);
        buf.extend_from_slice(payload);

        let mut rng = rand::thread_rng();
        buf.resize_with(4 + length, || rng.gen());

        let Self {
            state, hmac, chain, ..
        } = self;
        let key = chain.hmac.expose_secret();

        match state {
            CipherState::ChaCha(chacha) => {
                let tag = chacha.seal(seq, &mut buf);
                buf.extend_from_slice(&tag);
            }
            CipherState::Gcm(gcm) => {
                let (aad, body) = buf.split_at_mut(4);
                let tag = gcm.seal(aad, body)?;
                buf.extend_from_slice(&tag);
            }
            state if hmac.etm() => {
                Self::crypt(state, &mut buf[4..])?;
                let mac = hmac.sign(seq, &buf, key)?;
                buf.extend_from_slice(&mac);
            }
            state => {
                let mac = hmac.sign(seq, &buf, key)?;
                Self::crypt(state, &mut buf)?;
                buf.extend_from_slice(&mac);
            }
        }

        Ok(buf)
    }

    /// Read a binary packet from the `reader`, then authenticate, decrypt
    /// and decompress it into its payload.
    pub async fn open(
        &mut self,
        reader: &mut (impl AsyncRead + Unpin),
        seq: u32,
        max: usize,
    ) -> Result<Vec<u8>> {
        let block = self.block_size();
        let mac_size = self.mac_size();
        let length_apart = self.is_length_apart();

        let Self {
            state,
            hmac,
            chain,
            compression,
            compressing,
            ..
        } = self;
        let key = chain.hmac.expose_secret();

        let mut buf = vec![0u8; if length_apart { 4 } else { block }];
        reader.read_exact(&mut buf).await?;

        let length = match &mut *state {
            CipherState::ChaCha(chacha) => {
                let mut length = [0u8; 4];
                length.copy_from_slice(&buf);
                chacha.length(seq, &mut length);

                check(u32::from_be_bytes(length) as usize, max, |length| {
                    length % 8 == 0
                })?
            }
            _ if length_apart => check(read_length(&buf), max, |length| length % block == 0)?,
            state => {
                Self::crypt(state, &mut buf)?;

                // The length is decrypted but not yet authenticated.
                check(read_length(&buf), max, |length| {
                    (length + 4) % block == 0 && length + 4 >= block
                })
                .map_err(|_| ProtocolError::Integrity)?
            }
        };

        let received = buf.len();
        buf.resize(4 + length + mac_size, 0);
        reader.read_exact(&mut buf[received..]).await?;
        let mac = buf.split_off(4 + length);

        match state {
            CipherState::ChaCha(chacha) => {
                chacha.open(seq, &mut buf, &mac)?;
            }
            CipherState::Gcm(gcm) => {
                let (aad, body) = buf.split_at_mut(4);
                gcm.open(aad, body, &mac)?;
            }
            state if hmac.etm() => {
                hmac.verify(seq, &buf, key, &mac)?;
                Self::crypt(state, &mut buf[4..])?;
            }
            state => {
                Self::crypt(state, &mut buf[received..])?;
                hmac.verify(seq, &buf, key, &mac)?;
            }
        }

        let padding = buf[4] as usize;
        if padding < MIN_PADDING || padding + 1 > length {
            return Err(ProtocolError::Integrity.into());
        }

        let payload = &buf[5..4 + length - padding];
        if *compressing {
            compression.decompress(payload, max)
        } else {
            Ok(payload.to_vec())
        }
    }
}

fn read_length(buf: &[u8]) -> usize {
    let mut length = [0u8; 4];
    length.copy_from_slice(&buf[..4]);

    u32::from_be_bytes(length) as usize
}

/// Validate the announced packet `length` against the maximum size and the `aligned` predicate.
fn check(length: usize, max: usize, aligned: impl FnOnce(usize) -> bool) -> Result<usize> {
    if length > max {
        Err(ProtocolError::PacketTooLarge { size: length, max }.into())
    } else if length < MIN_PACKET - 4 || !aligned(length) {
        Err(ProtocolError::Misaligned.into())
    } else {
        Ok(length)
    }
}
