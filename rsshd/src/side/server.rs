//! Server-[`Side`] implementation of the _session_.

use std::time::Duration;

use futures_time::time::Duration as Timeout;

use super::{Algorithms, Limits, Side};
use crate::{
    algorithm::{kex::KexMeta, HostKey, Kex, Key, Negociate},
    error::NegotiationError,
    packet::trans::{ExtInfo, KexInit},
    stream::{Stream, TransportPair},
    Pipe, Result,
};

#[doc(no_inline)]
pub use crate::packet::Id;
#[doc(no_inline)]
pub use ssh_key::PrivateKey;

/// A _server_-side session configuration.
#[derive(Debug, Clone)]
pub struct Server {
    /// [`Id`] for this _server_ session.
    pub id: Id,

    /// Timeout for the handshake, and for each packet once its first byte arrived.
    pub timeout: Duration,

    /// Server keys for key-exchange signature.
    pub keys: Vec<HostKey>,

    /// The algorithms enabled for this _server_ session.
    pub algorithms: Algorithms,

    /// Packet size limits and re-keying thresholds.
    pub limits: Limits,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            id: Id::v2(
                concat!(
                    env!("CARGO_PKG_NAME"),
                    "@server:",
                    env!("CARGO_PKG_VERSION")
                ),
                None::<&str>,
            ),
            timeout: Duration::from_secs(120),
            keys: Default::default(),
            algorithms: Default::default(),
            limits: Default::default(),
        }
    }
}

impl Server {
    /// The host key algorithms we are able to sign for, by order of preference.
    fn host_key_algorithms(&self) -> impl Iterator<Item = &Key> {
        self.algorithms
            .keys
            .iter()
            .filter(|algorithm| self.keys.iter().any(|key| key.supports(algorithm)))
    }

    /// The signature algorithms accepted for user authentication, for the `server-sig-algs` extension.
    fn signature_algorithms(&self) -> String {
        self.algorithms
            .keys
            .iter()
            .filter(|algorithm| !algorithm.is_certificate())
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Side for Server {
    fn id(&self) -> &Id {
        &self.id
    }

    fn timeout(&self) -> Timeout {
        self.timeout.into()
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    fn kexinit(&self) -> KexInit {
        self.algorithms
            .kexinit(&[self.strict_markers().0], self.host_key_algorithms())
    }

    fn strict_markers(&self) -> (&'static str, &'static str) {
        ("kex-strict-s-v00@openssh.com", "kex-strict-c-v00@openssh.com")
    }

    async fn exchange(
        &self,
        stream: &mut Stream<impl Pipe>,
        (kexinit, raw): (&KexInit, &[u8]),
        (peerkexinit, peerraw): (&KexInit, &[u8]),
        peer_id: &Id,
    ) -> Result<TransportPair> {
        let kex = Kex::negociate(peerkexinit, kexinit)?;
        let algorithm = Key::negociate(peerkexinit, kexinit)?;
        let key = self
            .keys
            .iter()
            .find(|key| key.supports(&algorithm))
            .ok_or(NegotiationError::Key)?;

        let client = KexMeta::client(peer_id, peerraw, peerkexinit, kexinit)?;
        let server = KexMeta::server(self.id(), raw, peerkexinit, kexinit)?;

        tracing::debug!(
            "Negociated `{}` with host key `{}`",
            kex.as_ref(),
            algorithm.as_ref()
        );

        if peerkexinit.first_kex_packet_follows
            && (peerkexinit.kex_algorithms.first() != Some(kex.as_ref())
                || peerkexinit.server_host_key_algorithms.first() != Some(algorithm.as_ref()))
        {
            let guess = stream.recv_kex().await?;

            tracing::debug!("Discarded the wrongly guessed key-exchange packet #{}", guess.id());
        }

        kex.as_server(stream, client, server, key, &algorithm).await
    }

    async fn on_newkeys(
        &self,
        stream: &mut Stream<impl Pipe>,
        peerkexinit: &KexInit,
        initial: bool,
    ) -> Result<()> {
        if initial && peerkexinit.kex_algorithms.contains("ext-info-c") {
            stream
                .send(&ExtInfo {
                    extensions: vec![(
                        "server-sig-algs".into(),
                        self.signature_algorithms().into_bytes(),
                    )],
                })
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ssh_key::Algorithm;

    use super::*;

    #[test]
    fn only_signable_host_keys_are_advertised() {
        let server = Server {
            keys: vec![PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
                .unwrap()
                .into()],
            ..Default::default()
        };

        let kexinit = server.kexinit();

        assert_eq!(
            kexinit.server_host_key_algorithms.iter().collect::<Vec<_>>(),
            vec!["ssh-ed25519"]
        );
        assert!(kexinit
            .kex_algorithms
            .contains("kex-strict-s-v00@openssh.com"));
    }

    #[test]
    fn signature_algorithms_exclude_certificates() {
        let algorithms = Server::default().signature_algorithms();

        assert!(algorithms.contains("ssh-ed25519"));
        assert!(algorithms.contains("rsa-sha2-512"));
        assert!(!algorithms.contains("cert-v01"));
        assert!(!algorithms.contains("ssh-rsa"));
    }
}
