use std::{fmt, str::FromStr};

use futures::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{error::ProtocolError, Result};

/// Maximum length of an identification line, CRLF included (RFC 4253 §4.2).
const MAX_LINE_SIZE: usize = 255;

/// Maximum count of lines the peer may send before its identification line.
const MAX_PRELUDE_LINES: usize = 32;

/// The SSH identification string, exchanged as the first line of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id {
    /// The protocol version, `2.0` (or the compatible `1.99`).
    pub protoversion: String,

    /// The software name and version of the peer.
    pub softwareversion: String,

    /// Optional free-form comments.
    pub comments: Option<String>,
}

impl Id {
    /// Create a version 2 identification string.
    pub fn v2(softwareversion: impl Into<String>, comments: Option<impl Into<String>>) -> Self {
        Self {
            protoversion: "2.0".into(),
            softwareversion: softwareversion.into(),
            comments: comments.map(Into::into),
        }
    }

    /// Read the peer's identification line, skipping the lines that do not start with `SSH-`.
    pub async fn from_async_reader(reader: &mut (impl AsyncBufRead + Unpin)) -> Result<Self> {
        let mut line = Vec::with_capacity(MAX_LINE_SIZE);

        for _ in 0..=MAX_PRELUDE_LINES {
            line.clear();

            let read = (&mut *reader)
                .take(MAX_LINE_SIZE as u64)
                .read_until(b'\n', &mut line)
                .await?;

            if read == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            if !line.ends_with(b"\n") {
                return Err(ProtocolError::BadIdentification.into());
            }

            if line.starts_with(b"SSH-") {
                let line = line
                    .strip_suffix(b"\r\n")
                    .ok_or(ProtocolError::BadIdentification)?;

                return std::str::from_utf8(line)
                    .map_err(|_| ProtocolError::BadIdentification)?
                    .parse();
            }
        }

        Err(ProtocolError::BadIdentification.into())
    }

    /// Write the identification line, terminated by CRLF.
    pub async fn to_async_writer(&self, writer: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        writer.write_all(format!("{self}\r\n").as_bytes()).await?;

        Ok(())
    }
}

impl FromStr for Id {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, comments) = match s.split_once(' ') {
            Some((id, comments)) => (id, Some(comments.to_string())),
            None => (s, None),
        };

        let mut parts = id.splitn(3, '-');
        let (Some("SSH"), Some(protoversion), Some(softwareversion)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ProtocolError::BadIdentification.into());
        };

        if !matches!(protoversion, "2.0" | "1.99")
            || softwareversion.is_empty()
            || !softwareversion.bytes().all(|b| b.is_ascii_graphic())
        {
            return Err(ProtocolError::BadIdentification.into());
        }

        Ok(Self {
            protoversion: protoversion.into(),
            softwareversion: softwareversion.into(),
            comments,
        })
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SSH-{}-{}", self.protoversion, self.softwareversion)?;

        if let Some(comments) = &self.comments {
            write!(f, " {comments}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::io::Cursor;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("SSH-2.0-OpenSSH_9.6\r\n", "SSH-2.0-OpenSSH_9.6")]
    #[case("SSH-1.99-JSCH_0.2 comment\r\n", "SSH-1.99-JSCH_0.2 comment")]
    #[case("banner line\r\nSSH-2.0-peer\r\n", "SSH-2.0-peer")]
    #[async_std::test]
    async fn parse_valid(#[case] input: &str, #[case] expected: &str) {
        let id = Id::from_async_reader(&mut Cursor::new(input.as_bytes()))
            .await
            .unwrap();

        assert_eq!(id.to_string(), expected);
    }

    #[rstest]
    #[case("SSH-2.0-peer\n")]
    #[case("SSH-1.5-peer\r\n")]
    #[case("SSH-2.0-\r\n")]
    #[async_std::test]
    async fn parse_malformed(#[case] input: &str) {
        let id = Id::from_async_reader(&mut Cursor::new(input.as_bytes())).await;

        assert!(matches!(
            id,
            Err(crate::Error::Protocol(ProtocolError::BadIdentification))
        ));
    }

    #[async_std::test]
    async fn overlong_line_is_rejected() {
        let line = format!("SSH-2.0-{}\r\n", "a".repeat(300));
        let id = Id::from_async_reader(&mut Cursor::new(line.into_bytes())).await;

        assert!(id.is_err());
    }
}
