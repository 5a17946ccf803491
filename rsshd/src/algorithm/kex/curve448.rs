use digest::{Digest, FixedOutputReset};
use rand::RngCore;

use super::{transports, verify_host, Exchange, KexMeta, Secret};
use crate::{
    algorithm::{HostKey, Key},
    error::ProtocolError,
    packet::trans::{KexEcdhInit, KexEcdhReply},
    stream::{Stream, Transport},
    Pipe, Result,
};

fn ephemeral() -> Result<(x448::Secret, x448::PublicKey)> {
    let mut bytes = [0u8; 56];
    rand::thread_rng().fill_bytes(&mut bytes);

    let secret = x448::Secret::from_bytes(&bytes).ok_or(ProtocolError::KexParameters)?;
    let public = x448::PublicKey::from(&secret);

    Ok((secret, public))
}

fn agree(secret: x448::Secret, peer: &[u8]) -> Result<Secret> {
    let peer = x448::PublicKey::from_bytes(peer).ok_or(ProtocolError::KexParameters)?;
    let shared = secret
        .to_diffie_hellman(&peer)
        .ok_or(ProtocolError::KexParameters)?;

    super::secret(shared.as_bytes())
}

pub async fn as_client<H: Digest + FixedOutputReset>(
    stream: &mut Stream<impl Pipe>,
    client: KexMeta<'_>,
    server: KexMeta<'_>,
    key: &Key,
) -> Result<(Transport, Transport)> {
    let (e_c, q_c) = ephemeral()?;

    stream
        .send(&KexEcdhInit {
            q_c: q_c.as_bytes().to_vec(),
        })
        .await?;

    let ecdh: KexEcdhReply = stream.recv_kex().await?.to()?;
    let secret = agree(e_c, &ecdh.q_s)?;

    let hash = Exchange::new(&client, &server, &ecdh.k_s)?
        .bytes(q_c.as_bytes())?
        .bytes(&ecdh.q_s)?
        .hash::<H>(&secret);

    verify_host(key, &ecdh.k_s, &hash, &ecdh.signature)?;

    transports::<H>(stream, &secret, &hash, client, server, false)
}

pub async fn as_server<H: Digest + FixedOutputReset>(
    stream: &mut Stream<impl Pipe>,
    client: KexMeta<'_>,
    server: KexMeta<'_>,
    key: &HostKey,
    algorithm: &Key,
) -> Result<(Transport, Transport)> {
    let ecdh: KexEcdhInit = stream.recv_kex().await?.to()?;

    let (e_s, q_s) = ephemeral()?;
    let secret = agree(e_s, &ecdh.q_c)?;

    let k_s = key.blob(algorithm)?;
    let hash = Exchange::new(&client, &server, &k_s)?
        .bytes(&ecdh.q_c)?
        .bytes(q_s.as_bytes())?
        .hash::<H>(&secret);

    let signature = key.sign(algorithm, &hash)?;

    stream
        .send(&KexEcdhReply {
            k_s,
            q_s: q_s.as_bytes().to_vec(),
            signature,
        })
        .await?;

    transports::<H>(stream, &secret, &hash, client, server, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let (a, q_a) = ephemeral().unwrap();
        let (b, q_b) = ephemeral().unwrap();

        let k_a = agree(a, q_b.as_bytes()).unwrap();
        let k_b = agree(b, q_a.as_bytes()).unwrap();

        use secrecy::ExposeSecret;
        assert_eq!(k_a.expose_secret(), k_b.expose_secret());
    }

    #[test]
    fn low_order_points_are_rejected() {
        let (a, _) = ephemeral().unwrap();

        assert!(agree(a, &[0u8; 56]).is_err());
    }
}
