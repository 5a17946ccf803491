use digest::{Digest, FixedOutputReset};
use p256::elliptic_curve::{
    ecdh::EphemeralSecret,
    sec1::{FromEncodedPoint, ModulusSize, ToEncodedPoint},
    AffinePoint, CurveArithmetic, FieldBytesSize, PublicKey,
};

use super::{secret, transports, verify_host, Exchange, KexMeta, Secret};
use crate::{
    algorithm::{HostKey, Key},
    error::ProtocolError,
    packet::trans::{KexEcdhInit, KexEcdhReply},
    stream::{Stream, Transport},
    Pipe, Result,
};

/// Generate an ephemeral key and agree on the shared secret with the `peer`'s SEC1-encoded point,
/// returning our own SEC1-encoded point.
fn agree<C>(peer: &[u8]) -> Result<(Vec<u8>, Secret)>
where
    C: CurveArithmetic,
    FieldBytesSize<C>: ModulusSize,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
{
    let peer = PublicKey::<C>::from_sec1_bytes(peer).map_err(|_| ProtocolError::KexParameters)?;

    let ephemeral = EphemeralSecret::<C>::random(&mut rand::thread_rng());
    let public = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&peer);

    Ok((
        public.as_bytes().to_vec(),
        secret(shared.raw_secret_bytes().as_slice())?,
    ))
}

pub async fn as_client<C, H>(
    stream: &mut Stream<impl Pipe>,
    client: KexMeta<'_>,
    server: KexMeta<'_>,
    key: &Key,
) -> Result<(Transport, Transport)>
where
    C: CurveArithmetic,
    FieldBytesSize<C>: ModulusSize,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    H: Digest + FixedOutputReset,
{
    let (q_c, ephemeral) = {
        let ephemeral = EphemeralSecret::<C>::random(&mut rand::thread_rng());

        (
            ephemeral.public_key().to_encoded_point(false).as_bytes().to_vec(),
            ephemeral,
        )
    };

    stream.send(&KexEcdhInit { q_c: q_c.clone() }).await?;

    let ecdh: KexEcdhReply = stream.recv_kex().await?.to()?;
    let q_s =
        PublicKey::<C>::from_sec1_bytes(&ecdh.q_s).map_err(|_| ProtocolError::KexParameters)?;
    let secret = secret(ephemeral.diffie_hellman(&q_s).raw_secret_bytes().as_slice())?;

    let hash = Exchange::new(&client, &server, &ecdh.k_s)?
        .bytes(&q_c)?
        .bytes(&ecdh.q_s)?
        .hash::<H>(&secret);

    verify_host(key, &ecdh.k_s, &hash, &ecdh.signature)?;

    transports::<H>(stream, &secret, &hash, client, server, false)
}

pub async fn as_server<C, H>(
    stream: &mut Stream<impl Pipe>,
    client: KexMeta<'_>,
    server: KexMeta<'_>,
    key: &HostKey,
    algorithm: &Key,
) -> Result<(Transport, Transport)>
where
    C: CurveArithmetic,
    FieldBytesSize<C>: ModulusSize,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    H: Digest + FixedOutputReset,
{
    let ecdh: KexEcdhInit = stream.recv_kex().await?.to()?;
    let (q_s, secret) = agree::<C>(&ecdh.q_c)?;

    let k_s = key.blob(algorithm)?;
    let hash = Exchange::new(&client, &server, &k_s)?
        .bytes(&ecdh.q_c)?
        .bytes(&q_s)?
        .hash::<H>(&secret);

    let signature = key.sign(algorithm, &hash)?;

    stream
        .send(&KexEcdhReply {
            k_s,
            q_s,
            signature,
        })
        .await?;

    transports::<H>(stream, &secret, &hash, client, server, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_points_are_rejected() {
        assert!(agree::<p256::NistP256>(&[4u8; 65]).is_err());
        assert!(agree::<p384::NistP384>(&[]).is_err());
    }
}
