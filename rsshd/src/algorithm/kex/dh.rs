//! Finite-field Diffie-Hellman, over fixed groups (RFC 4253 §8, RFC 8268) or negotiated ones (RFC 4419).

use num_bigint::BigUint;
use rand::RngCore;

use super::{groups::Group, Secret};
use crate::{
    error::ProtocolError,
    packet::{arch::mpint, Mpint},
    Result,
};

/// Size of the private exponents, in bytes.
const EXPONENT_SIZE: usize = 64;

fn exponent() -> BigUint {
    let mut bytes = [0u8; EXPONENT_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);

    BigUint::from_bytes_be(&bytes) + 2u32
}

/// Generate a private exponent `x` and the public value `g^x mod p`.
fn keypair(group: &Group) -> (BigUint, BigUint) {
    let x = exponent();
    let public = group.g().modpow(&x, &group.p());

    (x, public)
}

/// Parse the peer's public value, rejecting values outside of `]1, p-1[`.
fn public(value: &Mpint, group: &Group) -> Result<BigUint> {
    let bytes = value
        .as_positive_bytes()
        .ok_or(ProtocolError::KexParameters)?;
    let value = BigUint::from_bytes_be(bytes);
    let p = group.p();

    if value <= BigUint::from(1u32) || value >= p - 1u32 {
        return Err(ProtocolError::KexParameters.into());
    }

    Ok(value)
}

fn agree(peer: &BigUint, x: &BigUint, group: &Group) -> Result<Secret> {
    super::secret(&peer.modpow(x, &group.p()).to_bytes_be())
}

fn encode(value: &BigUint) -> Result<Mpint> {
    mpint(&value.to_bytes_be())
}

pub mod fixed {
    use digest::{Digest, FixedOutputReset};

    use super::{agree, encode, keypair, public, Group};
    use crate::{
        algorithm::{
            kex::{transports, verify_host, Exchange, KexMeta},
            HostKey, Key,
        },
        packet::trans::{KexdhInit, KexdhReply},
        stream::{Stream, Transport},
        Pipe, Result,
    };

    pub async fn as_client<H: Digest + FixedOutputReset>(
        group: Group,
        stream: &mut Stream<impl Pipe>,
        client: KexMeta<'_>,
        server: KexMeta<'_>,
        key: &Key,
    ) -> Result<(Transport, Transport)> {
        let (x, e) = keypair(&group);

        let e = encode(&e)?;
        stream.send(&KexdhInit { e: e.clone() }).await?;

        let reply: KexdhReply = stream.recv_kex().await?.to()?;
        let f = public(&reply.f, &group)?;
        let secret = agree(&f, &x, &group)?;

        let hash = Exchange::new(&client, &server, &reply.k_s)?
            .mpint(&e)?
            .mpint(&reply.f)?
            .hash::<H>(&secret);

        verify_host(key, &reply.k_s, &hash, &reply.signature)?;

        transports::<H>(stream, &secret, &hash, client, server, false)
    }

    pub async fn as_server<H: Digest + FixedOutputReset>(
        group: Group,
        stream: &mut Stream<impl Pipe>,
        client: KexMeta<'_>,
        server: KexMeta<'_>,
        key: &HostKey,
        algorithm: &Key,
    ) -> Result<(Transport, Transport)> {
        let init: KexdhInit = stream.recv_kex().await?.to()?;
        let e = public(&init.e, &group)?;

        let (x, f) = keypair(&group);
        let secret = agree(&e, &x, &group)?;

        let f = encode(&f)?;
        let k_s = key.blob(algorithm)?;
        let hash = Exchange::new(&client, &server, &k_s)?
            .mpint(&init.e)?
            .mpint(&f)?
            .hash::<H>(&secret);

        let signature = key.sign(algorithm, &hash)?;

        stream.send(&KexdhReply { k_s, f, signature }).await?;

        transports::<H>(stream, &secret, &hash, client, server, true)
    }
}

pub mod gex {
    use digest::{Digest, FixedOutputReset};
    use num_bigint::BigUint;

    use super::{agree, encode, keypair, public, Group};
    use crate::{
        algorithm::{
            kex::{groups, transports, verify_host, Exchange, KexMeta},
            HostKey, Key,
        },
        error::ProtocolError,
        packet::trans::{
            KexDhGexGroup, KexDhGexInit, KexDhGexReply, KexDhGexRequest, KexDhGexRequestOld,
        },
        stream::{Stream, Transport},
        Pipe, Result,
    };

    /// Bounds requested by the client, in bits.
    const REQUEST: KexDhGexRequest = KexDhGexRequest {
        min: 2048,
        n: 3072,
        max: 8192,
    };

    /// The size request, either in its current form or the legacy `n`-only form.
    enum Request {
        Range(KexDhGexRequest),
        Old(KexDhGexRequestOld),
    }

    impl Request {
        fn group(&self) -> Option<Group> {
            match self {
                Self::Range(request) => groups::select(request.min, request.n, request.max),
                Self::Old(request) => groups::select(request.n.min(2048), request.n, u32::MAX),
            }
        }

        fn hash(&self, exchange: Exchange) -> Result<Exchange> {
            match self {
                Self::Range(request) => exchange.u32(request.min)?.u32(request.n)?.u32(request.max),
                Self::Old(request) => exchange.u32(request.n),
            }
        }
    }

    pub async fn as_client<H: Digest + FixedOutputReset>(
        stream: &mut Stream<impl Pipe>,
        client: KexMeta<'_>,
        server: KexMeta<'_>,
        key: &Key,
    ) -> Result<(Transport, Transport)> {
        stream.send(&REQUEST).await?;

        let offer: KexDhGexGroup = stream.recv_kex().await?.to()?;
        let p = BigUint::from_bytes_be(offer.p.as_positive_bytes().unwrap_or_default());
        let g = BigUint::from_bytes_be(offer.g.as_positive_bytes().unwrap_or_default());

        let group = groups::EXCHANGE_GROUPS
            .into_iter()
            .find(|group| group.p() == p && group.g() == g)
            .filter(|group| (REQUEST.min..=REQUEST.max).contains(&group.bits))
            .ok_or(ProtocolError::KexParameters)?;

        let (x, e) = keypair(&group);
        let e = encode(&e)?;
        stream.send(&KexDhGexInit { e: e.clone() }).await?;

        let reply: KexDhGexReply = stream.recv_kex().await?.to()?;
        let f = public(&reply.f, &group)?;
        let secret = agree(&f, &x, &group)?;

        let hash = Request::Range(REQUEST)
            .hash(Exchange::new(&client, &server, &reply.k_s)?)?
            .mpint(&offer.p)?
            .mpint(&offer.g)?
            .mpint(&e)?
            .mpint(&reply.f)?
            .hash::<H>(&secret);

        verify_host(key, &reply.k_s, &hash, &reply.signature)?;

        transports::<H>(stream, &secret, &hash, client, server, false)
    }

    pub async fn as_server<H: Digest + FixedOutputReset>(
        stream: &mut Stream<impl Pipe>,
        client: KexMeta<'_>,
        server: KexMeta<'_>,
        key: &HostKey,
        algorithm: &Key,
    ) -> Result<(Transport, Transport)> {
        let packet = stream.recv_kex().await?;
        let request = if packet.is::<KexDhGexRequest>() {
            Request::Range(packet.to()?)
        } else {
            Request::Old(packet.to()?)
        };

        let group = request.group().ok_or(ProtocolError::KexParameters)?;
        let offer = KexDhGexGroup {
            p: encode(&group.p())?,
            g: encode(&group.g())?,
        };

        tracing::debug!("Selected the {}-bit group for the group exchange", group.bits);

        stream.send(&offer).await?;

        let init: KexDhGexInit = stream.recv_kex().await?.to()?;
        let e = public(&init.e, &group)?;

        let (x, f) = keypair(&group);
        let secret = agree(&e, &x, &group)?;

        let f = encode(&f)?;
        let k_s = key.blob(algorithm)?;
        let hash = request
            .hash(Exchange::new(&client, &server, &k_s)?)?
            .mpint(&offer.p)?
            .mpint(&offer.g)?
            .mpint(&init.e)?
            .mpint(&f)?
            .hash::<H>(&secret);

        let signature = key.sign(algorithm, &hash)?;

        stream.send(&KexDhGexReply { k_s, f, signature }).await?;

        transports::<H>(stream, &secret, &hash, client, server, true)
    }
}
