//! Messages of the connection protocol (RFC 4254).

use super::{
    arch::{read_bool, read_rest, write_bool},
    message_u32, CheckedSum, Decode, Encode, Message, Reader, Writer,
};
use crate::{Error, Result};

/// The `SSH_MSG_GLOBAL_REQUEST` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequest {
    /// The request name.
    pub request_type: String,

    /// Whether the peer expects a reply.
    pub want_reply: bool,

    /// Request-specific data.
    pub data: Vec<u8>,
}

impl Encode for GlobalRequest {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.request_type.encoded_len()?, 1, self.data.len()].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.request_type.encode(writer)?;
        write_bool(writer, self.want_reply)?;
        writer.write(&self.data)
    }
}

impl Decode for GlobalRequest {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            request_type: String::decode(reader)?,
            want_reply: read_bool(reader)?,
            data: read_rest(reader)?,
        })
    }
}

impl Message for GlobalRequest {
    const ID: u8 = 80;
}

/// The `SSH_MSG_REQUEST_FAILURE` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure;

impl Encode for RequestFailure {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        Ok(0)
    }

    fn encode(&self, _: &mut impl Writer) -> ssh_encoding::Result<()> {
        Ok(())
    }
}

impl Decode for RequestFailure {
    type Error = Error;

    fn decode(_: &mut impl Reader) -> Result<Self> {
        Ok(Self)
    }
}

impl Message for RequestFailure {
    const ID: u8 = 82;
}

/// The `SSH_MSG_CHANNEL_OPEN` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    /// The channel type, such as `session`.
    pub channel_type: String,

    /// The channel number on the sender side.
    pub sender_channel: u32,

    /// The initial window size of the sender.
    pub initial_window_size: u32,

    /// The maximum packet size the sender accepts.
    pub maximum_packet_size: u32,

    /// Channel-type specific data.
    pub data: Vec<u8>,
}

impl Encode for ChannelOpen {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.channel_type.encoded_len()?, 4 * 3, self.data.len()].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.channel_type.encode(writer)?;
        self.sender_channel.encode(writer)?;
        self.initial_window_size.encode(writer)?;
        self.maximum_packet_size.encode(writer)?;
        writer.write(&self.data)
    }
}

impl Decode for ChannelOpen {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            channel_type: String::decode(reader)?,
            sender_channel: u32::decode(reader)?,
            initial_window_size: u32::decode(reader)?,
            maximum_packet_size: u32::decode(reader)?,
            data: read_rest(reader)?,
        })
    }
}

impl Message for ChannelOpen {
    const ID: u8 = 90;
}

message_u32! {
    /// The `SSH_MSG_CHANNEL_OPEN_CONFIRMATION` message.
    ChannelOpenConfirmation = 91 {
        /// The channel number on the recipient side.
        recipient_channel,
        /// The channel number on the sender side.
        sender_channel,
        /// The initial window size of the sender.
        initial_window_size,
        /// The maximum packet size the sender accepts.
        maximum_packet_size,
    }

    /// The `SSH_MSG_CHANNEL_WINDOW_ADJUST` message.
    ChannelWindowAdjust = 93 {
        /// The channel number on the recipient side.
        recipient_channel,
        /// The count of bytes to add to the window.
        bytes_to_add,
    }

    /// The `SSH_MSG_CHANNEL_EOF` message.
    ChannelEof = 96 {
        /// The channel number on the recipient side.
        recipient_channel,
    }

    /// The `SSH_MSG_CHANNEL_CLOSE` message.
    ChannelClose = 97 {
        /// The channel number on the recipient side.
        recipient_channel,
    }

    /// The `SSH_MSG_CHANNEL_SUCCESS` message.
    ChannelSuccess = 99 {
        /// The channel number on the recipient side.
        recipient_channel,
    }

    /// The `SSH_MSG_CHANNEL_FAILURE` message.
    ChannelFailure = 100 {
        /// The channel number on the recipient side.
        recipient_channel,
    }
}

/// Reason codes of the `SSH_MSG_CHANNEL_OPEN_FAILURE` message.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOpenFailureReason {
    AdministrativelyProhibited,
    ConnectFailed,
    UnknownChannelType,
    ResourceShortage,
    Other(u32),
}

impl From<u32> for ChannelOpenFailureReason {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::AdministrativelyProhibited,
            2 => Self::ConnectFailed,
            3 => Self::UnknownChannelType,
            4 => Self::ResourceShortage,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelOpenFailureReason> for u32 {
    fn from(value: ChannelOpenFailureReason) -> Self {
        match value {
            ChannelOpenFailureReason::AdministrativelyProhibited => 1,
            ChannelOpenFailureReason::ConnectFailed => 2,
            ChannelOpenFailureReason::UnknownChannelType => 3,
            ChannelOpenFailureReason::ResourceShortage => 4,
            ChannelOpenFailureReason::Other(other) => other,
        }
    }
}

/// The `SSH_MSG_CHANNEL_OPEN_FAILURE` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// The channel number on the recipient side.
    pub recipient_channel: u32,

    /// The reason of the failure.
    pub reason: ChannelOpenFailureReason,

    /// Human-readable description.
    pub description: String,

    /// Language tag.
    pub language: String,
}

impl Encode for ChannelOpenFailure {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [
            4 * 2,
            self.description.encoded_len()?,
            self.language.encoded_len()?,
        ]
        .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.recipient_channel.encode(writer)?;
        u32::from(self.reason).encode(writer)?;
        self.description.encode(writer)?;
        self.language.encode(writer)
    }
}

impl Decode for ChannelOpenFailure {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            recipient_channel: u32::decode(reader)?,
            reason: u32::decode(reader)?.into(),
            description: String::decode(reader)?,
            language: String::decode(reader)?,
        })
    }
}

impl Message for ChannelOpenFailure {
    const ID: u8 = 92;
}

/// The `SSH_MSG_CHANNEL_DATA` message.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// The channel number on the recipient side.
    pub recipient_channel: u32,

    /// The data.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ChannelData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelData")
            .field("recipient_channel", &self.recipient_channel)
            .field("data", &format_args!("[{} bytes]", self.data.len()))
            .finish()
    }
}

impl Encode for ChannelData {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [4, self.data.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.recipient_channel.encode(writer)?;
        self.data.encode(writer)
    }
}

impl Decode for ChannelData {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            recipient_channel: u32::decode(reader)?,
            data: Vec::decode(reader)?,
        })
    }
}

impl Message for ChannelData {
    const ID: u8 = 94;
}

/// The `SSH_MSG_CHANNEL_EXTENDED_DATA` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    /// The channel number on the recipient side.
    pub recipient_channel: u32,

    /// The data type, `1` being `stderr`.
    pub data_type: u32,

    /// The data.
    pub data: Vec<u8>,
}

impl Encode for ChannelExtendedData {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [4 * 2, self.data.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.recipient_channel.encode(writer)?;
        self.data_type.encode(writer)?;
        self.data.encode(writer)
    }
}

impl Decode for ChannelExtendedData {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        Ok(Self {
            recipient_channel: u32::decode(reader)?,
            data_type: u32::decode(reader)?,
            data: Vec::decode(reader)?,
        })
    }
}

impl Message for ChannelExtendedData {
    const ID: u8 = 95;
}

/// The request-specific part of a [`ChannelRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestContext {
    /// Start the user's default shell.
    Shell,

    /// Execute a command.
    Exec {
        /// The command line.
        command: Vec<u8>,
    },

    /// Start a named subsystem.
    Subsystem {
        /// The subsystem name.
        name: String,
    },

    /// Set an environment variable.
    Env {
        /// The variable name.
        name: String,
        /// The variable value.
        value: String,
    },

    /// Request a pseudo-terminal.
    Pty {
        /// The `TERM` environment variable value.
        term: String,
        /// Terminal width, in characters.
        width_chars: u32,
        /// Terminal height, in rows.
        height_rows: u32,
        /// Terminal width, in pixels.
        width_px: u32,
        /// Terminal height, in pixels.
        height_px: u32,
        /// Encoded terminal modes.
        modes: Vec<u8>,
    },

    /// Terminal dimensions changed.
    WindowChange {
        /// Terminal width, in characters.
        width_chars: u32,
        /// Terminal height, in rows.
        height_rows: u32,
        /// Terminal width, in pixels.
        width_px: u32,
        /// Terminal height, in pixels.
        height_px: u32,
    },

    /// The program exited with a status code.
    ExitStatus {
        /// The exit code.
        code: u32,
    },

    /// Any other request, with its raw data.
    Other {
        /// The request name.
        name: String,
        /// Request-specific data.
        data: Vec<u8>,
    },
}

impl ChannelRequestContext {
    /// The request name, as sent on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Shell => "shell",
            Self::Exec { .. } => "exec",
            Self::Subsystem { .. } => "subsystem",
            Self::Env { .. } => "env",
            Self::Pty { .. } => "pty-req",
            Self::WindowChange { .. } => "window-change",
            Self::ExitStatus { .. } => "exit-status",
            Self::Other { name, .. } => name,
        }
    }

    /// Whether the request starts a program on the channel: a shell, a command or a subsystem.
    pub fn is_program(&self) -> bool {
        matches!(
            self,
            Self::Shell | Self::Exec { .. } | Self::Subsystem { .. }
        )
    }
}

/// The `SSH_MSG_CHANNEL_REQUEST` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// The channel number on the recipient side.
    pub recipient_channel: u32,

    /// Whether the peer expects a reply.
    pub want_reply: bool,

    /// The request and its specific data.
    pub context: ChannelRequestContext,
}

impl ChannelRequestContext {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        match self {
            Self::Shell => Ok(0),
            Self::Exec { command } => command.encoded_len(),
            Self::Subsystem { name } => name.encoded_len(),
            Self::Env { name, value } => [name.encoded_len()?, value.encoded_len()?].checked_sum(),
            Self::Pty { term, modes, .. } => {
                [term.encoded_len()?, 4 * 4, modes.encoded_len()?].checked_sum()
            }
            Self::WindowChange { .. } => Ok(4 * 4),
            Self::ExitStatus { .. } => Ok(4),
            Self::Other { data, .. } => Ok(data.len()),
        }
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        match self {
            Self::Shell => Ok(()),
            Self::Exec { command } => command.encode(writer),
            Self::Subsystem { name } => name.encode(writer),
            Self::Env { name, value } => {
                name.encode(writer)?;
                value.encode(writer)
            }
            Self::Pty {
                term,
                width_chars,
                height_rows,
                width_px,
                height_px,
                modes,
            } => {
                term.encode(writer)?;
                for value in [width_chars, height_rows, width_px, height_px] {
                    value.encode(writer)?;
                }
                modes.encode(writer)
            }
            Self::WindowChange {
                width_chars,
                height_rows,
                width_px,
                height_px,
            } => {
                for value in [width_chars, height_rows, width_px, height_px] {
                    value.encode(writer)?;
                }

                Ok(())
            }
            Self::ExitStatus { code } => code.encode(writer),
            Self::Other { data, .. } => writer.write(data),
        }
    }

    fn decode(name: String, reader: &mut impl Reader) -> Result<Self> {
        Ok(match name.as_str() {
            "shell" => Self::Shell,
            "exec" => Self::Exec {
                command: Vec::decode(reader)?,
            },
            "subsystem" => Self::Subsystem {
                name: String::decode(reader)?,
            },
            "env" => Self::Env {
                name: String::decode(reader)?,
                value: String::decode(reader)?,
            },
            "pty-req" => Self::Pty {
                term: String::decode(reader)?,
                width_chars: u32::decode(reader)?,
                height_rows: u32::decode(reader)?,
                width_px: u32::decode(reader)?,
                height_px: u32::decode(reader)?,
                modes: Vec::decode(reader)?,
            },
            "window-change" => Self::WindowChange {
                width_chars: u32::decode(reader)?,
                height_rows: u32::decode(reader)?,
                width_px: u32::decode(reader)?,
                height_px: u32::decode(reader)?,
            },
            "exit-status" => Self::ExitStatus {
                code: u32::decode(reader)?,
            },
            _ => Self::Other {
                data: read_rest(reader)?,
                name,
            },
        })
    }
}

impl Encode for ChannelRequest {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [
            4,
            self.context.name().encoded_len()?,
            1,
            self.context.encoded_len()?,
        ]
        .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.recipient_channel.encode(writer)?;
        self.context.name().encode(writer)?;
        write_bool(writer, self.want_reply)?;
        self.context.encode(writer)
    }
}

impl Decode for ChannelRequest {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        let recipient_channel = u32::decode(reader)?;
        let name = String::decode(reader)?;
        let want_reply = read_bool(reader)?;

        Ok(Self {
            recipient_channel,
            want_reply,
            context: ChannelRequestContext::decode(name, reader)?,
        })
    }
}

impl Message for ChannelRequest {
    const ID: u8 = 98;
}

/// Extract the recipient channel number of a channel-specific message
/// (message numbers 91 to 100), `None` for any other message.
pub fn recipient_channel(payload: &[u8]) -> Option<u32> {
    match payload {
        [91..=100, a, b, c, d, ..] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}
