//! Session's [`Side`]s, either [`Client`] or [`Server`].

use futures::Future;
use futures_time::time::Duration;
use rand::RngCore;

use crate::{
    algorithm::{Catalog, Cipher, Compress, Hmac, Kex, Key},
    packet::{trans::KexInit, Id, NameList},
    stream::{Stream, TransportPair},
    Pipe, Result,
};

pub use crate::stream::Limits;

pub mod client;
use client::Client;

pub mod server;
use server::Server;

mod private {
    pub trait Sealed {}

    impl Sealed for super::Client {}
    impl Sealed for super::Server {}
}

/// A side of the SSH protocol, either [`Client`] or [`Server`].
pub trait Side: private::Sealed + Send + Sync {
    /// Get the [`Id`] for this session.
    fn id(&self) -> &Id;

    /// Get the _timeout_ for the handshake and for each packet once started.
    fn timeout(&self) -> Duration;

    /// Get the size limits and re-keying thresholds of the transport.
    fn limits(&self) -> Limits;

    /// Generate a [`KexInit`] message from the config.
    fn kexinit(&self) -> KexInit;

    /// The strict key-exchange markers, as `(ours, peer's)`.
    fn strict_markers(&self) -> (&'static str, &'static str);

    /// Exchange the keys from the config, given both raw `SSH_MSG_KEXINIT` payloads.
    fn exchange(
        &self,
        stream: &mut Stream<impl Pipe>,
        kexinit: (&KexInit, &[u8]),
        peerkexinit: (&KexInit, &[u8]),
        peer_id: &Id,
    ) -> impl Future<Output = Result<TransportPair>> + Send;

    /// Called once the new keys are in use in both directions.
    fn on_newkeys(
        &self,
        stream: &mut Stream<impl Pipe>,
        peerkexinit: &KexInit,
        initial: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The algorithms enabled for a session, by order of preference.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Enabled algorithms for _host key signature_.
    pub keys: Vec<Key>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<Compress>,
}

impl Default for Algorithms {
    fn default() -> Self {
        Self::enabled(false)
    }
}

impl Algorithms {
    /// The algorithms enabled by default, with the legacy ones if `legacy` is set.
    pub fn enabled(legacy: bool) -> Self {
        Self {
            kexs: Kex::enabled(legacy),
            keys: Key::enabled(legacy),
            ciphers: Cipher::enabled(legacy),
            macs: Hmac::enabled(legacy),
            compressions: Compress::enabled(legacy),
        }
    }

    pub(crate) fn kexinit<'a>(
        &self,
        extensions: &[&str],
        keys: impl IntoIterator<Item = &'a Key>,
    ) -> KexInit {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        let mut kex_algorithms = NameList::from_iter(&self.kexs);
        for extension in extensions {
            kex_algorithms.push(*extension);
        }

        KexInit {
            cookie,
            kex_algorithms,
            server_host_key_algorithms: NameList::from_iter(keys),
            encryption_algorithms_client_to_server: NameList::from_iter(&self.ciphers),
            encryption_algorithms_server_to_client: NameList::from_iter(&self.ciphers),
            mac_algorithms_client_to_server: NameList::from_iter(&self.macs),
            mac_algorithms_server_to_client: NameList::from_iter(&self.macs),
            compression_algorithms_client_to_server: NameList::from_iter(&self.compressions),
            compression_algorithms_server_to_client: NameList::from_iter(&self.compressions),
            languages_client_to_server: NameList::default(),
            languages_server_to_client: NameList::default(),
            first_kex_packet_follows: false,
            reserved: 0,
        }
    }
}
