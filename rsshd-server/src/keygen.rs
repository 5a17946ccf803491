//! Host key generation, in the OpenSSH format.

use std::path::Path;

use ssh_key::{
    private::{KeypairData, RsaKeypair},
    Algorithm, EcdsaCurve, LineEnding, PrivateKey,
};

use crate::{Error, Result};

/// The size of generated RSA keys, in bits.
pub const RSA_BITS: usize = 3072;

/// The types of keys that can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyType {
    /// `ssh-ed25519`
    Ed25519,
    /// `ecdsa-sha2-nistp256`
    EcdsaP256,
    /// `ecdsa-sha2-nistp384`
    EcdsaP384,
    /// `ecdsa-sha2-nistp521`
    EcdsaP521,
    /// `rsa-sha2-256`, `rsa-sha2-512` and the legacy `ssh-rsa`
    Rsa,
    /// `ssh-ed448`, which has no implementation.
    Ed448,
}

/// Generate a random private key of type `kind`.
pub fn generate(kind: KeyType, comment: &str) -> Result<PrivateKey> {
    let mut rng = rand::thread_rng();

    let mut key = match kind {
        KeyType::Ed25519 => PrivateKey::random(&mut rng, Algorithm::Ed25519)?,
        KeyType::EcdsaP256 => PrivateKey::random(
            &mut rng,
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256,
            },
        )?,
        KeyType::EcdsaP384 => PrivateKey::random(
            &mut rng,
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP384,
            },
        )?,
        KeyType::EcdsaP521 => PrivateKey::random(
            &mut rng,
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP521,
            },
        )?,
        KeyType::Rsa => PrivateKey::new(
            KeypairData::from(RsaKeypair::random(&mut rng, RSA_BITS)?),
            comment,
        )?,
        KeyType::Ed448 => return Err(Error::Unsupported("ed448")),
    };

    key.set_comment(comment);

    Ok(key)
}

/// Write the `key` at `path`, and its public part next to it with the `.pub` extension.
pub fn write(key: &PrivateKey, path: &Path) -> Result<()> {
    key.write_openssh_file(path, LineEnding::LF)?;

    let mut public = path.as_os_str().to_owned();
    public.push(".pub");
    key.public_key().write_openssh_file(Path::new(&public))?;

    tracing::info!(
        "Wrote the `{}` key `{}` to `{}`",
        key.algorithm(),
        key.fingerprint(Default::default()),
        path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use ssh_key::PublicKey;

    use super::*;

    #[test]
    fn keys_are_written_with_their_public_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssh_host_ed25519_key");

        let key = generate(KeyType::Ed25519, "host").unwrap();
        write(&key, &path).unwrap();

        let read = PrivateKey::read_openssh_file(&path).unwrap();
        assert_eq!(read.public_key().key_data(), key.public_key().key_data());
        assert_eq!(read.comment(), "host");

        let public = PublicKey::read_openssh_file(&dir.path().join("ssh_host_ed25519_key.pub")).unwrap();
        assert_eq!(public.key_data(), key.public_key().key_data());
    }

    #[test]
    fn ecdsa_keys_match_their_curve() {
        let key = generate(KeyType::EcdsaP256, "").unwrap();

        assert_eq!(
            key.algorithm(),
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256
            }
        );
    }

    #[test]
    fn ed448_is_unsupported() {
        assert!(matches!(
            generate(KeyType::Ed448, ""),
            Err(Error::Unsupported("ed448"))
        ));
    }
}
