use digest::{Digest, FixedOutputReset};
use secrecy::SecretBox;

use crate::algorithm::{Cipher, Hmac};

/// The keys of one direction of the transport, derived from the key-exchange (RFC 4253 §7.2).
#[derive(Debug, Default)]
pub struct Keys {
    /// Cipher _initialization vector_.
    pub iv: SecretBox<Vec<u8>>,

    /// Cipher _key_.
    pub key: SecretBox<Vec<u8>>,

    /// Hmac _key_.
    pub hmac: SecretBox<Vec<u8>>,
}

impl Keys {
    pub fn as_client<D: Digest + FixedOutputReset>(
        secret: &impl AsRef<[u8]>,
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(secret, hash, b'A', session_id, cipher.iv_size()),
            key: Self::derive::<D>(secret, hash, b'C', session_id, cipher.key_size()),
            hmac: Self::derive::<D>(secret, hash, b'E', session_id, hmac.key_size()),
        }
    }

    pub fn as_server<D: Digest + FixedOutputReset>(
        secret: &impl AsRef<[u8]>,
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(secret, hash, b'B', session_id, cipher.iv_size()),
            key: Self::derive::<D>(secret, hash, b'D', session_id, cipher.key_size()),
            hmac: Self::derive::<D>(secret, hash, b'F', session_id, hmac.key_size()),
        }
    }

    /// `K1 = HASH(K || H || X || session_id)`, extended with `Kn = HASH(K || H || K1 || ... || Kn-1)`,
    /// `K` being the `mpint` body of the shared secret.
    fn derive<D: Digest + FixedOutputReset>(
        secret: &impl AsRef<[u8]>,
        hash: &[u8],
        kind: u8,
        session_id: &[u8],
        size: usize,
    ) -> SecretBox<Vec<u8>> {
        SecretBox::<Vec<u8>>::init_with_mut(|key| {
            let mut hasher = D::new()
                .chain_update((secret.as_ref().len() as u32).to_be_bytes())
                .chain_update(secret)
                .chain_update(hash)
                .chain_update([kind])
                .chain_update(session_id);

            key.extend_from_slice(&hasher.finalize_reset());

            while key.len() < size {
                hasher = hasher
                    .chain_update((secret.as_ref().len() as u32).to_be_bytes())
                    .chain_update(secret)
                    .chain_update(hash)
                    .chain_update(&*key);

                key.extend_from_slice(&hasher.finalize_reset());
            }

            key.truncate(size);
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn keys_are_extended_to_the_cipher_size() {
        let keys = Keys::as_client::<sha2::Sha256>(
            &[1u8; 32],
            &[2u8; 32],
            &[3u8; 32],
            &Cipher::ChaCha20Poly1305,
            &Hmac::HmacSha512,
        );

        assert_eq!(keys.key.expose_secret().len(), 64);
        assert_eq!(keys.iv.expose_secret().len(), 0);
        assert_eq!(keys.hmac.expose_secret().len(), 64);
    }

    #[test]
    fn directions_have_distinct_keys() {
        let client = Keys::as_client::<sha2::Sha256>(
            &[1u8; 32],
            &[2u8; 32],
            &[3u8; 32],
            &Cipher::Aes128Ctr,
            &Hmac::HmacSha256,
        );
        let server = Keys::as_server::<sha2::Sha256>(
            &[1u8; 32],
            &[2u8; 32],
            &[3u8; 32],
            &Cipher::Aes128Ctr,
            &Hmac::HmacSha256,
        );

        assert_ne!(client.key.expose_secret(), server.key.expose_secret());
    }
}
