use digest::{Digest, FixedOutputReset};

use super::{secret, transports, verify_host, Exchange, KexMeta};
use crate::{
    algorithm::{HostKey, Key},
    error::ProtocolError,
    packet::trans::{KexEcdhInit, KexEcdhReply},
    stream::{Stream, Transport},
    Pipe, Result,
};

fn public(bytes: &[u8]) -> Result<x25519_dalek::PublicKey> {
    Ok(x25519_dalek::PublicKey::from(
        <[u8; 32]>::try_from(bytes).map_err(|_| ProtocolError::KexParameters)?,
    ))
}

pub async fn as_client<H: Digest + FixedOutputReset>(
    stream: &mut Stream<impl Pipe>,
    client: KexMeta<'_>,
    server: KexMeta<'_>,
    key: &Key,
) -> Result<(Transport, Transport)> {
    let e_c = x25519_dalek::EphemeralSecret::random_from_rng(rand::thread_rng());
    let q_c = x25519_dalek::PublicKey::from(&e_c);

    stream
        .send(&KexEcdhInit {
            q_c: q_c.as_bytes().to_vec(),
        })
        .await?;

    let ecdh: KexEcdhReply = stream.recv_kex().await?.to()?;
    let q_s = public(&ecdh.q_s)?;

    let shared = e_c.diffie_hellman(&q_s);
    if !shared.was_contributory() {
        return Err(ProtocolError::KexParameters.into());
    }
    let secret = secret(shared.as_bytes())?;

    let hash = Exchange::new(&client, &server, &ecdh.k_s)?
        .bytes(q_c.as_bytes())?
        .bytes(q_s.as_bytes())?
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
    let q_c = public(&ecdh.q_c)?;

    let e_s = x25519_dalek::EphemeralSecret::random_from_rng(rand::thread_rng());
    let q_s = x25519_dalek::PublicKey::from(&e_s);

    let shared = e_s.diffie_hellman(&q_c);
    if !shared.was_contributory() {
        return Err(ProtocolError::KexParameters.into());
    }
    let secret = secret(shared.as_bytes())?;

    let k_s = key.blob(algorithm)?;
    let hash = Exchange::new(&client, &server, &k_s)?
        .bytes(q_c.as_bytes())?
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
