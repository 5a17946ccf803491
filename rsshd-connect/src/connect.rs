//! Facilities to serve the SSH _connect_ protocol over an authenticated session.

use std::{collections::HashMap, sync::Arc};

use futures::FutureExt;
use rsshd::{
    packet::{
        connect::{
            self, ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelOpen,
            ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest,
            ChannelWindowAdjust, GlobalRequest, RequestFailure,
        },
        trans::DisconnectReason,
        Message, Packet,
    },
    side::Side,
    Pipe, ProtocolError, Session,
};

use crate::{
    channel::{Channel, LocalWindow, Msg, Outgoing, RemoteWindow, Shared},
    Error, Result,
};

/// The default size of the window we advertise for each channel.
pub const INITIAL_WINDOW_SIZE: u32 = 64 * MAXIMUM_PACKET_SIZE;

/// The default maximum size of the data payloads we accept.
pub const MAXIMUM_PACKET_SIZE: u32 = 32768;

/// Channel types relaying network connections, which are never permitted.
const FORWARDING_TYPES: &[&str] = &[
    "direct-tcpip",
    "forwarded-tcpip",
    "x11",
    "direct-streamlocal@openssh.com",
    "forwarded-streamlocal@openssh.com",
];

/// Limits of the _connect_ layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum count of simultaneously opened channels per session.
    pub max_channels: usize,

    /// The window advertised to the peer for each channel.
    pub window_size: u32,

    /// The maximum data payload accepted from the peer.
    pub maximum_packet_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_channels: 10,
            window_size: INITIAL_WINDOW_SIZE,
            maximum_packet_size: MAXIMUM_PACKET_SIZE,
        }
    }
}

#[derive(Debug)]
struct ChannelDef {
    shared: Arc<Shared>,
    sender: flume::Sender<Msg>,

    /// Whether we sent our `SSH_MSG_CHANNEL_CLOSE`.
    close_sent: bool,
}

impl Drop for ChannelDef {
    fn drop(&mut self) {
        self.shared.remote_window.close();
    }
}

enum Event {
    Outgoing(Outgoing),
    Readable(rsshd::Result<()>),
}

/// A wrapper around a [`Session`] to serve the connect layer,
/// owning the arena of opened channels.
pub struct Connect<'s, IO: Pipe, S: Side> {
    session: &'s mut Session<IO, S>,
    config: Config,

    channels: HashMap<u32, ChannelDef>,
    serial: u64,

    sender: flume::Sender<Outgoing>,
    receiver: flume::Receiver<Outgoing>,
}

impl<'s, IO: Pipe, S: Side> Connect<'s, IO, S> {
    /// Create a new [`Connect`] layer from an authenticated [`Session`].
    pub fn new(session: &'s mut Session<IO, S>, config: Config) -> Self {
        let (sender, receiver) = flume::unbounded();

        Self {
            session,
            config,
            channels: Default::default(),
            serial: 0,
            sender,
            receiver,
        }
    }

    /// The lowest channel identifier not in use.
    fn local_id(&self) -> u32 {
        (0..)
            .find(|id| !self.channels.contains_key(id))
            .unwrap_or_default()
    }

    /// Process messages until the peer disconnects, handing each
    /// opened `session` channel to `on_session`.
    pub async fn run(mut self, mut on_session: impl FnMut(Channel)) -> Result<()> {
        loop {
            let event = futures::select! {
                outgoing = self.receiver.recv_async() => match outgoing {
                    Ok(outgoing) => Event::Outgoing(outgoing),
                    // Never disconnected, since this struct always holds a sender.
                    Err(_) => continue,
                },
                readable = self.session.readable().fuse() => Event::Readable(readable),
            };

            let result = match event {
                Event::Outgoing(outgoing) => self.tx(outgoing).await,
                Event::Readable(readable) => match readable {
                    Ok(()) => self.rx(&mut on_session).await,
                    Err(err) => Err(err.into()),
                },
            };

            match result {
                Err(Error::Transport(rsshd::Error::Disconnected(reason))) => {
                    tracing::debug!("Session disconnected with `{reason:?}`, releasing {} channels", self.channels.len());

                    break Ok(());
                }
                Err(err) => break Err(err),
                Ok(()) => (),
            }
        }
    }

    async fn tx(&mut self, outgoing: Outgoing) -> Result<()> {
        let Outgoing {
            local_id,
            serial,
            packet,
        } = outgoing;

        let Some(def) = self
            .channels
            .get_mut(&local_id)
            .filter(|def| def.shared.serial == serial && !def.close_sent)
        else {
            tracing::trace!("Dropped message #{} for the released channel #{local_id}", packet.id());

            return Ok(());
        };

        if packet.is::<ChannelClose>() {
            def.close_sent = true;
        }

        Ok(self.session.send_packet(&packet).await?)
    }

    async fn rx(&mut self, on_session: &mut impl FnMut(Channel)) -> Result<()> {
        let packet = self.session.recv().await?;

        match packet.id() {
            GlobalRequest::ID => {
                let request: GlobalRequest = packet.to()?;

                tracing::debug!("Refused global request `{}`", request.request_type);

                if request.want_reply {
                    self.session.send(&RequestFailure).await?;
                }

                Ok(())
            }
            ChannelOpen::ID => self.open(packet.to()?, on_session).await,
            ChannelWindowAdjust::ID..=connect::ChannelFailure::ID => self.dispatch(packet).await,
            80..=127 => {
                tracing::debug!("Unhandled connection message #{}", packet.id());

                Ok(self.session.unimplemented().await?)
            }
            id => self.fail(ProtocolError::UnexpectedMessage(id)).await,
        }
    }

    async fn fail(&mut self, err: ProtocolError) -> Result<()> {
        tracing::warn!("Peer violated the connection protocol: {err}");

        self.session
            .disconnect(DisconnectReason::ProtocolError, "Protocol error")
            .await?;

        Err(rsshd::Error::from(err).into())
    }

    async fn open(&mut self, open: ChannelOpen, on_session: &mut impl FnMut(Channel)) -> Result<()> {
        let ChannelOpen {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
            ..
        } = open;

        tracing::debug!("Peer requested to open channel %{sender_channel} of type `{channel_type}`");

        let refusal = if channel_type != "session" {
            Some(if FORWARDING_TYPES.contains(&channel_type.as_str()) {
                (
                    ChannelOpenFailureReason::AdministrativelyProhibited,
                    "Forwarding is not permitted",
                )
            } else {
                (
                    ChannelOpenFailureReason::UnknownChannelType,
                    "Unknown channel type",
                )
            })
        } else if self.channels.len() >= self.config.max_channels {
            Some((
                ChannelOpenFailureReason::ResourceShortage,
                "Too many opened channels",
            ))
        } else {
            None
        };

        if let Some((reason, description)) = refusal {
            tracing::warn!("Refused channel %{sender_channel}: {description}");

            self.session
                .send(&ChannelOpenFailure {
                    recipient_channel: sender_channel,
                    reason,
                    description: description.into(),
                    language: Default::default(),
                })
                .await?;

            return Ok(());
        }

        let local_id = self.local_id();
        self.serial += 1;

        let shared = Arc::new(Shared {
            local_id,
            remote_id: sender_channel,
            serial: self.serial,
            remote_maximum_packet_size: maximum_packet_size.max(1),
            local_window: LocalWindow::new(self.config.window_size),
            remote_window: RemoteWindow::from(initial_window_size),
        });
        let (sender, receiver) = flume::unbounded();

        self.channels.insert(
            local_id,
            ChannelDef {
                shared: shared.clone(),
                sender,
                close_sent: false,
            },
        );

        self.session
            .send(&ChannelOpenConfirmation {
                recipient_channel: sender_channel,
                sender_channel: local_id,
                initial_window_size: self.config.window_size,
                maximum_packet_size: self.config.maximum_packet_size,
            })
            .await?;

        tracing::debug!("Channel opened as #{local_id}:%{sender_channel}");

        on_session(Channel::new(shared, receiver, self.sender.clone()));

        Ok(())
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<()> {
        let Some(def) = connect::recipient_channel(&packet.payload)
            .and_then(|id| self.channels.get_mut(&id))
        else {
            return self.fail(ProtocolError::UnknownChannel).await;
        };
        let local_id = def.shared.local_id;

        let msg = match packet.id() {
            ChannelWindowAdjust::ID => {
                let adjust: ChannelWindowAdjust = packet.to()?;
                def.shared.remote_window.replenish(adjust.bytes_to_add);

                return Ok(());
            }
            ChannelData::ID => {
                let ChannelData { data, .. } = packet.to()?;

                if !Self::receive(def, &data, self.config.maximum_packet_size) {
                    return self.fail(ProtocolError::WindowExceeded).await;
                }

                Msg::Data(data)
            }
            ChannelExtendedData::ID => {
                let ChannelExtendedData { data, .. } = packet.to()?;

                if !Self::receive(def, &data, self.config.maximum_packet_size) {
                    return self.fail(ProtocolError::WindowExceeded).await;
                }

                Msg::ExtendedData(data)
            }
            ChannelEof::ID => Msg::Eof,
            ChannelRequest::ID => Msg::Request(packet.to()?),
            ChannelClose::ID => {
                tracing::debug!("Peer closed channel #{local_id}");

                if let Some(def) = self.channels.remove(&local_id) {
                    def.sender.send(Msg::Close).ok();

                    if !def.close_sent {
                        self.session
                            .send(&ChannelClose {
                                recipient_channel: def.shared.remote_id,
                            })
                            .await?;
                    }
                }

                return Ok(());
            }
            // Replies to requests we never make.
            _ => return self.fail(ProtocolError::UnexpectedMessage(packet.id())).await,
        };

        if def.sender.send(msg).is_err() {
            tracing::trace!("Channel #{local_id} has been dropped, discarding its message");
        }

        Ok(())
    }

    /// Account for the `data` in the channel's window, `false` if the peer overflowed it.
    fn receive(def: &ChannelDef, data: &[u8], maximum_packet_size: u32) -> bool {
        u32::try_from(data.len())
            .ok()
            .filter(|size| *size <= maximum_packet_size)
            .is_some_and(|size| def.shared.local_window.consume(size))
    }
}

impl<IO: Pipe, S: Side> Drop for Connect<'_, IO, S> {
    fn drop(&mut self) {
        for (_, def) in self.channels.drain() {
            def.sender.send(Msg::Close).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_compat::Compat;
    use futures::io::BufReader;
    use rsshd::side::server::Server;
    use tokio::net::TcpStream;

    #[test]
    fn assert_connect_is_send() {
        fn is_send<T: Send>() {}

        is_send::<Connect<'static, BufReader<Compat<TcpStream>>, Server>>();
        is_send::<Channel>();
    }

    #[test]
    fn default_window_holds_many_packets() {
        let config = Config::default();

        assert_eq!(config.window_size, 64 * config.maximum_packet_size);
    }
}
