//! Client-[`Side`] implementation of the _session_, driving the server in tests and tooling.

use std::time::Duration;

use futures_time::time::Duration as Timeout;

use super::{Algorithms, Limits, Side};
use crate::{
    algorithm::{kex::KexMeta, Kex, Key, Negociate},
    packet::trans::KexInit,
    stream::{Stream, TransportPair},
    Pipe, Result,
};

#[doc(no_inline)]
pub use crate::packet::Id;

/// A _client_-side session configuration.
///
/// The server's host key signature is verified during the key-exchange,
/// but the key itself is trusted as-is.
#[derive(Debug, Clone)]
pub struct Client {
    /// [`Id`] for this _client_ session.
    pub id: Id,

    /// Timeout for the handshake, and for each packet once its first byte arrived.
    pub timeout: Duration,

    /// The algorithms enabled for this _client_ session.
    pub algorithms: Algorithms,

    /// Packet size limits and re-keying thresholds.
    pub limits: Limits,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            id: Id::v2(
                concat!(
                    env!("CARGO_PKG_NAME"),
                    "@client:",
                    env!("CARGO_PKG_VERSION")
                ),
                None::<&str>,
            ),
            timeout: Duration::from_secs(120),
            algorithms: Default::default(),
            limits: Default::default(),
        }
    }
}

impl Side for Client {
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
        self.algorithms.kexinit(
            &["ext-info-c", self.strict_markers().0],
            &self.algorithms.keys,
        )
    }

    fn strict_markers(&self) -> (&'static str, &'static str) {
        ("kex-strict-c-v00@openssh.com", "kex-strict-s-v00@openssh.com")
    }

    async fn exchange(
        &self,
        stream: &mut Stream<impl Pipe>,
        (kexinit, raw): (&KexInit, &[u8]),
        (peerkexinit, peerraw): (&KexInit, &[u8]),
        peer_id: &Id,
    ) -> Result<TransportPair> {
        let kex = Kex::negociate(kexinit, peerkexinit)?;
        let algorithm = Key::negociate(kexinit, peerkexinit)?;

        let client = KexMeta::client(self.id(), raw, kexinit, peerkexinit)?;
        let server = KexMeta::server(peer_id, peerraw, kexinit, peerkexinit)?;

        kex.as_client(stream, client, server, &algorithm).await
    }

    async fn on_newkeys(
        &self,
        _stream: &mut Stream<impl Pipe>,
        _peerkexinit: &KexInit,
        _initial: bool,
    ) -> Result<()> {
        Ok(())
    }
}
