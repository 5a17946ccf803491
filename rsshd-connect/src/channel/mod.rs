//! Definition of the [`Channel`] struct that provides isolated I/O on SSH channels.

use std::{collections::VecDeque, io, pin::Pin, sync::Arc, task};

use futures::{Stream, StreamExt};
use rsshd::packet::{
    connect::{
        ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelRequest,
        ChannelRequestContext, ChannelWindowAdjust,
    },
    Message, Packet,
};

use crate::{Error, Result};

mod request;
pub use request::Request;

mod window;
pub(crate) use window::{LocalWindow, RemoteWindow};

/// The `data_type` of the `stderr` extended data stream.
const STDERR: u32 = 1;

/// A message routed from the connection to a [`Channel`].
#[derive(Debug)]
pub(crate) enum Msg {
    Data(Vec<u8>),
    ExtendedData(Vec<u8>),
    Eof,
    Close,
    Request(ChannelRequest),
}

/// A message from a [`Channel`] to the peer, tagged with its origin.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub local_id: u32,
    pub serial: u64,
    pub packet: Packet,
}

/// The identifiers and flow-control state shared between a [`Channel`] and the connection.
#[derive(Debug)]
pub(crate) struct Shared {
    pub local_id: u32,
    pub remote_id: u32,
    pub serial: u64,
    pub remote_maximum_packet_size: u32,

    pub local_window: LocalWindow,
    pub remote_window: RemoteWindow,
}

/// A reference to an opened channel in the session, readable and writable
/// through [`futures::AsyncRead`] and [`futures::AsyncWrite`].
pub struct Channel {
    shared: Arc<Shared>,

    incoming: flume::r#async::RecvStream<'static, Msg>,
    outgoing: flume::Sender<Outgoing>,

    buffer: VecDeque<u8>,
    env: Vec<(String, String)>,

    /// Whether a shell, command or subsystem has been started.
    started: bool,

    /// Whether the peer will send no more data.
    eof: bool,
    /// Whether the peer closed the channel.
    closed: bool,

    eof_sent: bool,
    close_sent: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_id", &self.shared.local_id)
            .field("remote_id", &self.shared.remote_id)
            .field("started", &self.started)
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        shared: Arc<Shared>,
        incoming: flume::Receiver<Msg>,
        outgoing: flume::Sender<Outgoing>,
    ) -> Self {
        Self {
            shared,
            incoming: incoming.into_stream(),
            outgoing,
            buffer: Default::default(),
            env: Default::default(),
            started: false,
            eof: false,
            closed: false,
            eof_sent: false,
            close_sent: false,
        }
    }

    /// The local identifier of the channel.
    pub fn id(&self) -> u32 {
        self.shared.local_id
    }

    /// The environment variables the peer set through `env` requests.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Whether a shell, command or subsystem has been started on the channel.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn send(&self, message: &impl Message) -> Result<()> {
        self.outgoing
            .send(Outgoing {
                local_id: self.shared.local_id,
                serial: self.shared.serial,
                packet: message.to_packet()?,
            })
            .map_err(|_| Error::Cancelled)
    }

    /// Consume `message`, returning the request it holds if any.
    fn process(&mut self, message: Msg) -> Option<ChannelRequest> {
        match message {
            Msg::Data(data) => self.buffer.extend(data),
            Msg::ExtendedData(data) => {
                tracing::trace!(
                    "Discarded {} bytes of extended data on channel #{}",
                    data.len(),
                    self.shared.local_id
                );

                self.shared.local_window.release(data.len() as u32);
                self.refill();
            }
            Msg::Eof => self.eof = true,
            Msg::Close => self.closed = true,
            Msg::Request(request) => return Some(request),
        }

        None
    }

    /// Credit the peer's window with the bytes read so far, when they amount to enough.
    fn refill(&self) {
        if let Some(bytes_to_add) = self.shared.local_window.adjustable() {
            tracing::trace!(
                "Adjusted window by {bytes_to_add} bytes for channel #{}",
                self.shared.local_id
            );

            self.send(&ChannelWindowAdjust {
                recipient_channel: self.shared.remote_id,
                bytes_to_add,
            })
            .ok();
        }
    }

    /// Receive the next request of the peer on this channel, buffering data that arrives in between,
    /// `None` when the peer closed the channel.
    pub async fn request(&mut self) -> Result<Option<Request<'_>>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            let message = self.incoming.next().await.ok_or(Error::Cancelled)?;

            let Some(request) = self.process(message) else {
                continue;
            };

            if self.started && request.context.is_program() {
                tracing::debug!(
                    "Refused request `{}`, a program already runs on channel #{}",
                    request.context.name(),
                    self.shared.local_id
                );

                Request::new(self, request).reject()?;
                continue;
            }

            break Ok(Some(Request::new(self, request)));
        }
    }

    /// Report the `code` of the program that ran on the channel, then close it.
    pub fn exit(mut self, code: u32) -> Result<()> {
        if !self.closed {
            self.send(&ChannelRequest {
                recipient_channel: self.shared.remote_id,
                want_reply: false,
                context: ChannelRequestContext::ExitStatus { code },
            })?;
        }

        self.finish()
    }

    /// Send the end-of-file and close messages, if not already done.
    fn finish(&mut self) -> Result<()> {
        if !self.eof_sent && !self.closed {
            self.eof_sent = true;
            self.send(&ChannelEof {
                recipient_channel: self.shared.remote_id,
            })?;
        }

        if !self.close_sent {
            self.close_sent = true;
            self.send(&ChannelClose {
                recipient_channel: self.shared.remote_id,
            })?;
        }

        Ok(())
    }

    /// A writer to the `stderr` extended data stream of the channel.
    pub fn stderr(&mut self) -> Stderr<'_> {
        Stderr { channel: self }
    }

    fn poll_write_ext(
        &mut self,
        cx: &mut task::Context<'_>,
        buf: &[u8],
        ext: Option<u32>,
    ) -> task::Poll<io::Result<usize>> {
        if self.closed || self.close_sent || self.eof_sent {
            return task::Poll::Ready(Err(Error::ChannelClosed.into()));
        }
        if buf.is_empty() {
            return task::Poll::Ready(Ok(0));
        }

        let amount = u32::try_from(buf.len())
            .unwrap_or(u32::MAX)
            .min(self.shared.remote_maximum_packet_size);
        let size = futures::ready!(self.shared.remote_window.poll_reserve(cx, amount))? as usize;

        let data = buf[..size].to_vec();
        let recipient_channel = self.shared.remote_id;
        match ext {
            None => self.send(&ChannelData {
                recipient_channel,
                data,
            })?,
            Some(data_type) => self.send(&ChannelExtendedData {
                recipient_channel,
                data_type,
                data,
            })?,
        }

        task::Poll::Ready(Ok(size))
    }
}

impl futures::AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut [u8],
    ) -> task::Poll<io::Result<usize>> {
        let this = self.get_mut();

        while this.buffer.is_empty() && !this.eof && !this.closed {
            let Some(message) = futures::ready!(Pin::new(&mut this.incoming).poll_next(cx)) else {
                return task::Poll::Ready(Err(Error::Cancelled.into()));
            };

            if let Some(request) = this.process(message) {
                tracing::debug!(
                    "Refused request `{}` on running channel #{}",
                    request.context.name(),
                    this.shared.local_id
                );

                Request::new(this, request).reject()?;
            }
        }

        let count = buf.len().min(this.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(this.buffer.drain(..count)) {
            *slot = byte;
        }

        if count > 0 {
            this.shared.local_window.release(count as u32);
            this.refill();
        }

        task::Poll::Ready(Ok(count))
    }
}

impl futures::AsyncWrite for Channel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        self.poll_write_ext(cx, buf, None)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<io::Result<()>> {
        if !self.eof_sent && !self.closed && !self.close_sent {
            self.eof_sent = true;

            let recipient_channel = self.shared.remote_id;
            self.send(&ChannelEof { recipient_channel })?;
        }

        task::Poll::Ready(Ok(()))
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.close_sent {
            self.close_sent = true;
            self.send(&ChannelClose {
                recipient_channel: self.shared.remote_id,
            })
            .ok();
        }
    }
}

/// A writer to the `stderr` extended data stream of a [`Channel`].
pub struct Stderr<'c> {
    channel: &'c mut Channel,
}

impl futures::AsyncWrite for Stderr<'_> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        self.channel.poll_write_ext(cx, buf, Some(STDERR))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }
}
