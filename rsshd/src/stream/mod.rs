//! Primitives to extract and encode binary packets from/to an [`AsyncBufRead`] + [`AsyncWrite`] stream.

use std::time::Instant;

use futures::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use futures_time::{future::FutureExt, time::Duration};

use crate::{
    error::ProtocolError,
    packet::{
        trans::{Debug, Disconnect, Ignore},
        Id, Message, Packet,
    },
    Error, Result,
};

mod counter;
use counter::IoCounter;

mod transport;
pub use transport::{Transport, TransportPair};

mod keys;
pub use keys::Keys;

/// Re-key after 1GiB of exchanged data as recommended per the RFC.
const REKEY_BYTES_THRESHOLD: usize = 0x40000000;

/// Re-key after an hour with the same keys.
const REKEY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// The largest packet we accept from the peer.
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Size limits and re-keying thresholds of the transport.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum size of an incoming packet, and of its decompressed payload.
    pub max_packet_size: usize,

    /// Number of bytes exchanged after which the keys are renewed.
    pub rekey_bytes: usize,

    /// Time after which the keys are renewed.
    pub rekey_interval: std::time::Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            rekey_bytes: REKEY_BYTES_THRESHOLD,
            rekey_interval: REKEY_INTERVAL,
        }
    }
}

/// A wrapper around [`AsyncBufRead`] + [`AsyncWrite`]
/// to interface with to the SSH binary protocol.
pub struct Stream<S> {
    inner: IoCounter<S>,
    timeout: Duration,
    limits: Limits,

    /// The pair of transport algorithms and keys computed from the key exchange.
    transport: TransportPair,

    /// When the current keys were installed.
    keyed: Instant,

    /// The session identifier derived from the first key exchange.
    session: Option<Vec<u8>>,

    /// Sequence number for the `tx` side.
    txseq: u32,

    /// Sequence number for the `rx` side.
    rxseq: u32,

    /// Whether the strict key-exchange extension is in effect.
    strict: bool,
}

impl<S: AsyncBufRead + AsyncWrite + Unpin> Stream<S> {
    pub(crate) fn new(stream: S, timeout: Duration, limits: Limits) -> Self {
        Self {
            inner: IoCounter::new(stream),
            timeout,
            limits,
            transport: Default::default(),
            keyed: Instant::now(),
            session: None,
            txseq: 0,
            rxseq: 0,
            strict: false,
        }
    }

    /// Exchange the identification lines with the peer, returning the peer's.
    pub(crate) async fn identify(&mut self, id: &Id) -> Result<Id> {
        id.to_async_writer(&mut self.inner).await?;
        self.inner.flush().await?;

        Id::from_async_reader(&mut self.inner).await
    }

    /// Fix the session identifier if this is the first key-exchange, and return it.
    pub(crate) fn with_session(&mut self, session: &[u8]) -> &[u8] {
        self.session.get_or_insert_with(|| session.to_vec())
    }

    pub(crate) fn session_id(&self) -> Option<&[u8]> {
        self.session.as_deref()
    }

    pub(crate) fn with_transport(&mut self, transport: TransportPair) {
        self.transport = transport;
        self.keyed = Instant::now();
        self.inner.reset();
    }

    pub(crate) fn enable_delayed_compression(&mut self) {
        self.transport.enable_delayed_compression();
    }

    /// Reset the sequence number of the `tx` side, for the strict key-exchange.
    pub(crate) fn reset_txseq(&mut self) {
        self.txseq = 0;
    }

    /// Reset the sequence number of the `rx` side, for the strict key-exchange.
    pub(crate) fn reset_rxseq(&mut self) {
        self.rxseq = 0;
    }

    pub(crate) fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Sequence number of the last received packet.
    pub(crate) fn last_rxseq(&self) -> u32 {
        self.rxseq.wrapping_sub(1)
    }

    /// Wait until data is available to be read from the peer.
    pub async fn readable(&mut self) -> Result<()> {
        if self.inner.fill_buf().await?.is_empty() {
            Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
        } else {
            Ok(())
        }
    }

    /// Receive a _packet_ from the peer, waiting indefinitely for it to start,
    /// but failing if it does not complete within the timeout.
    pub async fn recv(&mut self) -> Result<Packet> {
        self.readable().await?;

        let payload = self
            .transport
            .rx
            .open(&mut self.inner, self.rxseq, self.limits.max_packet_size)
            .timeout(self.timeout)
            .await
            .map_err(|_| Error::Timeout)??;

        if payload.is_empty() {
            return Err(ProtocolError::Malformed("empty payload").into());
        }

        let packet = Packet { payload };
        self.rxseq = self.rxseq.wrapping_add(1);

        tracing::trace!("<-({}) #{}", self.rxseq.wrapping_sub(1), packet.id());

        Ok(packet)
    }

    /// Receive the next packet of a key-exchange, skipping the `ignore` and `debug`
    /// messages unless the strict key-exchange is in effect.
    pub(crate) async fn recv_kex(&mut self) -> Result<Packet> {
        loop {
            let packet = self.recv().await?;

            match packet.id() {
                Disconnect::ID => {
                    let Disconnect { reason, .. } = packet.to()?;

                    break Err(Error::Disconnected(reason));
                }
                Ignore::ID | Debug::ID if !self.strict => {
                    tracing::debug!("Skipped message #{} during the key-exchange", packet.id());
                }
                _ => break Ok(packet),
            }
        }
    }

    /// Send a _packet_ to the peer, by serializing and encrypting the `message`.
    pub async fn send<T: Message>(&mut self, message: &T) -> Result<()> {
        tracing::trace!("({})-> {message:?}", self.txseq);

        self.send_packet(&message.to_packet()?).await
    }

    /// Send an already serialized _packet_ to the peer.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let buf = self.transport.tx.seal(&packet.payload, self.txseq)?;

        async {
            self.inner.write_all(&buf).await?;
            self.inner.flush().await
        }
        .timeout(self.timeout)
        .await
        .map_err(|_| Error::Timeout)??;

        self.txseq = self.txseq.wrapping_add(1);

        Ok(())
    }

    /// Close the underlying stream.
    pub(crate) async fn close(&mut self) -> Result<()> {
        Ok(self.inner.close().await?)
    }

    /// Returns whether the stream should be re-keyed.
    pub(crate) fn is_rekeyable(&self) -> bool {
        self.session.is_none()
            || self.inner.count() > self.limits.rekey_bytes
            || self.keyed.elapsed() > self.limits.rekey_interval
    }
}

#[cfg(test)]
mod tests {
    use futures::io::{BufReader, Cursor};

    use super::*;
    use crate::packet::trans::KexEcdhInit;

    fn wire(messages: &[Packet]) -> Vec<u8> {
        let mut transport = Transport::default();

        messages
            .iter()
            .enumerate()
            .flat_map(|(seq, packet)| transport.seal(&packet.payload, seq as u32).unwrap())
            .collect()
    }

    #[async_std::test]
    async fn sequence_numbers_wrap_and_reset() {
        let mut stream = Stream::new(
            BufReader::new(Cursor::new(Vec::new())),
            Duration::from_secs(1),
            Limits::default(),
        );
        stream.txseq = u32::MAX;

        stream.send(&Ignore { data: vec![] }).await.unwrap();
        assert_eq!(stream.txseq, 0);

        stream.send(&Ignore { data: vec![] }).await.unwrap();
        stream.reset_txseq();
        assert_eq!(stream.txseq, 0);
    }

    #[async_std::test]
    async fn rekeying_follows_the_thresholds() {
        let mut stream = Stream::new(
            BufReader::new(Cursor::new(Vec::new())),
            Duration::from_secs(1),
            Limits {
                rekey_bytes: 64,
                ..Default::default()
            },
        );
        assert!(stream.is_rekeyable());

        stream.with_session(&[0; 32]);
        assert!(!stream.is_rekeyable());

        stream.send(&Ignore { data: vec![0; 128] }).await.unwrap();
        assert!(stream.is_rekeyable());

        stream.with_transport(Default::default());
        assert!(!stream.is_rekeyable());
    }

    #[async_std::test]
    async fn end_of_stream_is_reported() {
        let mut stream = Stream::new(
            BufReader::new(Cursor::new(Vec::new())),
            Duration::from_secs(1),
            Limits::default(),
        );

        assert!(matches!(stream.recv().await, Err(Error::Io(_))));
    }

    #[async_std::test]
    async fn ignored_messages_are_skipped_during_exchange() {
        let ecdh = KexEcdhInit { q_c: vec![0x42; 32] };
        let bytes = wire(&[
            Ignore { data: vec![1, 2] }.to_packet().unwrap(),
            Debug {
                always_display: false,
                message: "hello".into(),
                language: String::new(),
            }
            .to_packet()
            .unwrap(),
            ecdh.to_packet().unwrap(),
        ]);

        let mut stream = Stream::new(
            BufReader::new(Cursor::new(bytes.clone())),
            Duration::from_secs(1),
            Limits::default(),
        );
        let packet = stream.recv_kex().await.unwrap();
        assert_eq!(packet.to::<KexEcdhInit>().unwrap().q_c, ecdh.q_c);

        let mut stream = Stream::new(
            BufReader::new(Cursor::new(bytes)),
            Duration::from_secs(1),
            Limits::default(),
        );
        stream.set_strict(true);
        assert_eq!(stream.recv_kex().await.unwrap().id(), Ignore::ID);
    }
}
