//! Session management and transport handling mechanics.

use std::collections::VecDeque;

use futures_time::future::FutureExt;

use crate::{
    error::ProtocolError,
    packet::{
        trans::{
            is_generic_message, is_kex_message, Debug, Disconnect, DisconnectReason, ExtInfo,
            Ignore, KexInit, NewKeys, Unimplemented,
        },
        Id, Message, Packet,
    },
    side::Side,
    stream::Stream,
    Error, Pipe, Result,
};

/// The state of the transport of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Exchanging the identification lines.
    VersionExchange,

    /// Exchanging the `SSH_MSG_KEXINIT` messages.
    KexInit,

    /// Performing the first key-exchange.
    KeyExchange,

    /// Keys are in use, upper layers may exchange messages.
    Established,

    /// Performing a subsequent key-exchange.
    Rekeying,

    /// Sending our `SSH_MSG_DISCONNECT`.
    Closing,

    /// The session is over.
    Closed,
}

/// The fixed description sent to the peer along with a fatal disconnect `reason`.
fn description(reason: DisconnectReason) -> &'static str {
    match reason {
        DisconnectReason::ProtocolError => "Protocol error",
        DisconnectReason::MacError => "Corrupted packet",
        DisconnectReason::KeyExchangeFailed => "Key exchange failed",
        DisconnectReason::CompressionError => "Compression error",
        DisconnectReason::ServiceNotAvailable => "Service not available",
        DisconnectReason::NoMoreAuthMethodsAvailable => "Too many authentication failures",
        DisconnectReason::ConnectionLost => "Timed out",
        _ => "Disconnected",
    }
}

/// A session wrapping a [`Stream`] to handle **key-exchange** and **`SSH-TRANS`** messages.
pub struct Session<IO: Pipe, S: Side> {
    stream: Option<Stream<IO>>,
    config: S,

    peer_id: Id,
    state: State,

    /// Whether the strict key-exchange extension has been negotiated.
    strict: bool,

    /// Whether the user has been authenticated, enabling delayed compression.
    authenticated: bool,

    /// Non key-exchange messages received during a re-keying, with their sequence number.
    pending: VecDeque<(u32, Packet)>,

    /// Sequence number of the last packet handed to the caller.
    last: u32,

    closed: Option<DisconnectReason>,
}

impl<IO: Pipe, S: Side> Session<IO, S> {
    /// Create a new [`Session`] from a [`Pipe`] stream and some configuration,
    /// performing the identification and first key-exchange within the configured timeout.
    pub async fn new(stream: IO, config: S) -> Result<Self> {
        let mut session = Self {
            stream: Some(Stream::new(stream, config.timeout(), config.limits())),
            config,
            peer_id: Id::v2("", None::<&str>),
            state: State::VersionExchange,
            strict: false,
            authenticated: false,
            pending: Default::default(),
            last: 0,
            closed: None,
        };

        let timeout = session.config.timeout();
        match session.handshake().timeout(timeout).await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(err)) => Err(session.fail(err).await),
            Err(_) => Err(session.fail(Error::Timeout).await),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let id = self.config.id().clone();
        self.peer_id = self.stream()?.identify(&id).await?;
        self.state = State::KexInit;

        tracing::debug!("Session started with peer `{}`", self.peer_id);

        self.kex(None).await
    }

    fn stream(&mut self) -> Result<&mut Stream<IO>> {
        let closed = self.closed;

        self.stream
            .as_mut()
            .ok_or(Error::Disconnected(closed.unwrap_or(DisconnectReason::ConnectionLost)))
    }

    /// Handle the transport-generic messages, failing on `SSH_MSG_DISCONNECT`.
    fn generic(packet: &Packet) -> Result<()> {
        match packet.id() {
            Disconnect::ID => {
                let Disconnect {
                    reason,
                    description,
                    ..
                } = packet.to()?;

                tracing::warn!("Peer disconnected with `{reason:?}`: {description}");

                Err(Error::Disconnected(reason))
            }
            Ignore::ID => {
                let Ignore { data } = packet.to()?;

                tracing::debug!("Received an 'ignore' message with length {}", data.len());

                Ok(())
            }
            Debug::ID => {
                let Debug { message, .. } = packet.to()?;

                tracing::debug!("Received a 'debug' message: {message}");

                Ok(())
            }
            Unimplemented::ID => {
                let Unimplemented { seq } = packet.to()?;

                tracing::debug!("Received a 'unimplemented' message about packet #{seq}");

                Ok(())
            }
            id => Err(ProtocolError::UnexpectedMessage(id).into()),
        }
    }

    /// Perform a key-exchange, either initiated by us or by the peer's `peerkexinit`.
    async fn kex(&mut self, peerkexinit: Option<Packet>) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Disconnected(
                self.closed.unwrap_or(DisconnectReason::ConnectionLost),
            ));
        };

        let initial = stream.session_id().is_none();
        self.state = State::KexInit;

        tracing::debug!("Starting key-exchange procedure");

        let kexinit = self.config.kexinit();
        let raw = kexinit.to_packet()?;
        stream.send(&kexinit).await?;

        let peerraw = match peerkexinit {
            Some(packet) => packet,
            None => loop {
                let packet = stream.recv().await?;

                match packet.id() {
                    KexInit::ID => break packet,
                    id if is_generic_message(id) => Self::generic(&packet)?,
                    id if initial || is_kex_message(id) => {
                        return Err(ProtocolError::UnexpectedMessage(id).into())
                    }
                    _ => self.pending.push_back((stream.last_rxseq(), packet)),
                }
            },
        };
        let peer: KexInit = peerraw.to()?;

        if initial {
            let (ours, theirs) = self.config.strict_markers();
            self.strict =
                kexinit.kex_algorithms.contains(ours) && peer.kex_algorithms.contains(theirs);
            stream.set_strict(self.strict);

            if self.strict && stream.last_rxseq() != 0 {
                return Err(ProtocolError::UnexpectedMessage(KexInit::ID).into());
            }
        }

        self.state = if initial {
            State::KeyExchange
        } else {
            State::Rekeying
        };

        let transport = self
            .config
            .exchange(
                stream,
                (&kexinit, &raw.payload),
                (&peer, &peerraw.payload),
                &self.peer_id,
            )
            .await?;

        stream.send(&NewKeys).await?;
        if self.strict {
            stream.reset_txseq();
        }

        loop {
            let packet = stream.recv().await?;

            if !self.strict && is_generic_message(packet.id()) {
                Self::generic(&packet)?;
            } else {
                packet.to::<NewKeys>()?;
                break;
            }
        }
        if self.strict {
            stream.reset_rxseq();
        }

        tracing::debug!(
            "Key exchange success, negociated algorithms:\nrx: {:?}\ntx: {:?}",
            transport.rx,
            transport.tx,
        );

        stream.with_transport(transport);
        if self.authenticated {
            stream.enable_delayed_compression();
        }

        self.config.on_newkeys(stream, &peer, initial).await?;
        self.state = State::Established;

        Ok(())
    }

    /// Report a fatal `err` to the peer when relevant and tear the session down.
    async fn fail(&mut self, err: Error) -> Error {
        match (&err, err.disconnect_reason()) {
            (Error::Disconnected(reason), _) => self.close(*reason),
            (_, Some(reason)) => {
                tracing::debug!("Session failed fatally: {err}");

                if let Err(error) = self.disconnect(reason, description(reason)).await {
                    tracing::debug!("Unable to notify the peer of the disconnection: {error}");
                }
            }
            (_, None) => self.close(DisconnectReason::ConnectionLost),
        }

        err
    }

    async fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(self.fail(err).await),
        }
    }

    fn close(&mut self, reason: DisconnectReason) {
        self.stream = None;
        self.closed = Some(reason);
        self.state = State::Closed;
    }

    async fn next(&mut self) -> Result<Packet> {
        loop {
            if let Some((seq, packet)) = self.pending.pop_front() {
                self.last = seq;

                break Ok(packet);
            }

            let stream = self.stream()?;
            if stream.is_rekeyable() {
                self.kex(None).await?;
                continue;
            }

            let packet = stream.recv().await?;
            let seq = stream.last_rxseq();

            match packet.id() {
                KexInit::ID => self.kex(Some(packet)).await?,
                ExtInfo::ID => {
                    let ExtInfo { extensions } = packet.to()?;

                    tracing::debug!(
                        "Received extensions: {:?}",
                        extensions.iter().map(|(name, _)| name).collect::<Vec<_>>()
                    );
                }
                id if is_generic_message(id) => Self::generic(&packet)?,
                id if is_kex_message(id) => {
                    break Err(ProtocolError::UnexpectedMessage(id).into())
                }
                _ => {
                    self.last = seq;

                    break Ok(packet);
                }
            }
        }
    }

    /// Receive a _packet_ from the connected peer, handling transport messages and re-keying.
    pub async fn recv(&mut self) -> Result<Packet> {
        let result = self.next().await;

        self.guard(result).await
    }

    async fn transmit(&mut self, packet: &Packet) -> Result<()> {
        if self.stream()?.is_rekeyable() {
            self.kex(None).await?;
        }

        self.stream()?.send_packet(packet).await
    }

    /// Send a _message_ to the connected peer, re-keying beforehand if needed.
    pub async fn send<T: Message>(&mut self, message: &T) -> Result<()> {
        tracing::trace!("-> {message:?}");

        self.send_packet(&message.to_packet()?).await
    }

    /// Send an already serialized _packet_ to the connected peer, re-keying beforehand if needed.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let result = self.transmit(packet).await;

        self.guard(result).await
    }

    /// Wait for an incoming _packet_ to be available.
    pub async fn readable(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            return Ok(());
        }

        let result = self.stream()?.readable().await;

        self.guard(result).await
    }

    /// Reply `SSH_MSG_UNIMPLEMENTED` to the last received packet.
    pub async fn unimplemented(&mut self) -> Result<()> {
        self.send(&Unimplemented { seq: self.last }).await
    }

    /// Send a `SSH_MSG_DISCONNECT` with the `reason` and close the session.
    pub async fn disconnect(
        &mut self,
        reason: DisconnectReason,
        description: impl Into<String>,
    ) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        self.state = State::Closing;

        let description = description.into();
        tracing::info!("Disconnecting the peer with `{reason:?}`: {description}");

        let sent = stream
            .send(&Disconnect {
                reason,
                description,
                language: Default::default(),
            })
            .await;
        let closed = stream.close().await;

        self.close(reason);

        sent.and(closed)
    }

    /// Start the delayed compression, once the user has been authenticated.
    pub fn enable_delayed_compression(&mut self) {
        self.authenticated = true;

        if let Some(stream) = self.stream.as_mut() {
            stream.enable_delayed_compression();
        }
    }

    /// Access [`Id`] of the connected peer.
    pub fn peer_id(&self) -> &Id {
        &self.peer_id
    }

    /// The session identifier, the exchange hash of the first key-exchange.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.stream.as_ref().and_then(Stream::session_id)
    }

    /// The current transport state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Access the configuration of this side.
    pub fn config(&self) -> &S {
        &self.config
    }
}
