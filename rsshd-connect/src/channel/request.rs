//! The _channel requests_ and responses.

use rsshd::packet::connect::{self, ChannelFailure, ChannelSuccess};

use super::Channel;
use crate::Result;

#[doc(no_inline)]
pub use connect::ChannelRequestContext;

/// A received _channel request_, rejected when dropped without a response.
pub struct Request<'c> {
    channel: &'c mut Channel,
    inner: Option<connect::ChannelRequest>,
}

impl<'c> Request<'c> {
    pub(super) fn new(channel: &'c mut Channel, inner: connect::ChannelRequest) -> Self {
        Self {
            channel,
            inner: Some(inner),
        }
    }

    /// Access the _context_ of the channel request.
    pub fn cx(&self) -> &ChannelRequestContext {
        &self
            .inner
            .as_ref()
            .expect("Inner value has been dropped before the outer structure")
            .context
    }

    /// Accept the channel request, which marks the channel as started for
    /// a shell, a command or a subsystem.
    pub fn accept(mut self) -> Result<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };

        match inner.context {
            ref context if context.is_program() => self.channel.started = true,
            ChannelRequestContext::Env { name, value } => self.channel.env.push((name, value)),
            _ => (),
        }

        if inner.want_reply {
            self.channel.send(&ChannelSuccess {
                recipient_channel: self.channel.shared.remote_id,
            })?;
        }

        Ok(())
    }

    /// Reject the channel request.
    pub fn reject(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) if inner.want_reply => self.channel.send(&ChannelFailure {
                recipient_channel: self.channel.shared.remote_id,
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if matches!(&self.inner, Some(inner) if inner.want_reply) {
            self.channel
                .send(&ChannelFailure {
                    recipient_channel: self.channel.shared.remote_id,
                })
                .ok();
        }
    }
}
