//! Messages of the version 3 of the SFTP protocol (`draft-ietf-secsh-filexfer-02`).

use bitflags::bitflags;
use ssh_encoding::{Decode, Encode, Reader};

use crate::{attrs::FileAttributes, Error, Result};

/// The protocol version implemented by this crate.
pub const VERSION: u32 = 3;

/// The extension renaming files atomically, overwriting the target.
pub const POSIX_RENAME: &str = "posix-rename@openssh.com";

#[allow(missing_docs)]
pub mod kind {
    pub const INIT: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const OPEN: u8 = 3;
    pub const CLOSE: u8 = 4;
    pub const READ: u8 = 5;
    pub const WRITE: u8 = 6;
    pub const LSTAT: u8 = 7;
    pub const FSTAT: u8 = 8;
    pub const SETSTAT: u8 = 9;
    pub const FSETSTAT: u8 = 10;
    pub const OPENDIR: u8 = 11;
    pub const READDIR: u8 = 12;
    pub const REMOVE: u8 = 13;
    pub const MKDIR: u8 = 14;
    pub const RMDIR: u8 = 15;
    pub const REALPATH: u8 = 16;
    pub const STAT: u8 = 17;
    pub const RENAME: u8 = 18;
    pub const READLINK: u8 = 19;
    pub const SYMLINK: u8 = 20;
    pub const STATUS: u8 = 101;
    pub const HANDLE: u8 = 102;
    pub const DATA: u8 = 103;
    pub const NAME: u8 = 104;
    pub const ATTRS: u8 = 105;
    pub const EXTENDED: u8 = 200;
    pub const EXTENDED_REPLY: u8 = 201;
}

bitflags! {
    /// The `pflags` of an `SSH_FXP_OPEN` request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// `SSH_FXF_READ`
        const READ = 0x00000001;
        /// `SSH_FXF_WRITE`
        const WRITE = 0x00000002;
        /// `SSH_FXF_APPEND`
        const APPEND = 0x00000004;
        /// `SSH_FXF_CREAT`
        const CREAT = 0x00000008;
        /// `SSH_FXF_TRUNC`
        const TRUNC = 0x00000010;
        /// `SSH_FXF_EXCL`
        const EXCL = 0x00000020;
    }
}

/// Status codes of `SSH_FXP_STATUS` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    /// `SSH_FX_OK`
    Ok = 0,
    /// `SSH_FX_EOF`
    Eof = 1,
    /// `SSH_FX_NO_SUCH_FILE`
    NoSuchFile = 2,
    /// `SSH_FX_PERMISSION_DENIED`
    PermissionDenied = 3,
    /// `SSH_FX_FAILURE`
    Failure = 4,
    /// `SSH_FX_BAD_MESSAGE`
    BadMessage = 5,
    /// `SSH_FX_NO_CONNECTION`
    NoConnection = 6,
    /// `SSH_FX_CONNECTION_LOST`
    ConnectionLost = 7,
    /// `SSH_FX_OP_UNSUPPORTED`
    OpUnsupported = 8,
}

impl StatusCode {
    /// The message accompanying the code in responses.
    pub fn message(self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation unsupported",
        }
    }
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Io(err) => match err.kind() {
                std::io::ErrorKind::NotFound => Self::NoSuchFile,
                std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
                std::io::ErrorKind::UnexpectedEof => Self::Eof,
                std::io::ErrorKind::Unsupported => Self::OpUnsupported,
                _ => Self::Failure,
            },
            Error::PathEscape(_) => Self::PermissionDenied,
            Error::BadMessage(_) => Self::BadMessage,
            Error::Cancelled => Self::ConnectionLost,
        }
    }
}

/// A request from the client, with its identifier stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Request {
    Open {
        path: String,
        flags: OpenFlags,
        attrs: FileAttributes,
    },
    Close {
        handle: Vec<u8>,
    },
    Read {
        handle: Vec<u8>,
        offset: u64,
        len: u32,
    },
    Write {
        handle: Vec<u8>,
        offset: u64,
        data: Vec<u8>,
    },
    Lstat {
        path: String,
    },
    Fstat {
        handle: Vec<u8>,
    },
    Setstat {
        path: String,
        attrs: FileAttributes,
    },
    Fsetstat {
        handle: Vec<u8>,
        attrs: FileAttributes,
    },
    Opendir {
        path: String,
    },
    Readdir {
        handle: Vec<u8>,
    },
    Remove {
        path: String,
    },
    Mkdir {
        path: String,
        attrs: FileAttributes,
    },
    Rmdir {
        path: String,
    },
    Realpath {
        path: String,
    },
    Stat {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
    Readlink {
        path: String,
    },
    /// Created at `link`, pointing to `target`, in the argument order of OpenSSH.
    Symlink {
        target: String,
        link: String,
    },
    PosixRename {
        from: String,
        to: String,
    },
    Extended {
        name: String,
    },
    Unknown {
        kind: u8,
    },
}

impl Request {
    /// Decode a request of `kind` from the `reader`, which starts after the request identifier.
    pub fn decode(kind: u8, reader: &mut impl Reader) -> Result<Self> {
        Ok(match kind {
            kind::OPEN => Self::Open {
                path: String::decode(reader)?,
                flags: OpenFlags::from_bits_retain(u32::decode(reader)?),
                attrs: FileAttributes::decode(reader)?,
            },
            kind::CLOSE => Self::Close {
                handle: Vec::decode(reader)?,
            },
            kind::READ => Self::Read {
                handle: Vec::decode(reader)?,
                offset: u64::decode(reader)?,
                len: u32::decode(reader)?,
            },
            kind::WRITE => Self::Write {
                handle: Vec::decode(reader)?,
                offset: u64::decode(reader)?,
                data: Vec::decode(reader)?,
            },
            kind::LSTAT => Self::Lstat {
                path: String::decode(reader)?,
            },
            kind::FSTAT => Self::Fstat {
                handle: Vec::decode(reader)?,
            },
            kind::SETSTAT => Self::Setstat {
                path: String::decode(reader)?,
                attrs: FileAttributes::decode(reader)?,
            },
            kind::FSETSTAT => Self::Fsetstat {
                handle: Vec::decode(reader)?,
                attrs: FileAttributes::decode(reader)?,
            },
            kind::OPENDIR => Self::Opendir {
                path: String::decode(reader)?,
            },
            kind::READDIR => Self::Readdir {
                handle: Vec::decode(reader)?,
            },
            kind::REMOVE => Self::Remove {
                path: String::decode(reader)?,
            },
            kind::MKDIR => Self::Mkdir {
                path: String::decode(reader)?,
                attrs: FileAttributes::decode(reader)?,
            },
            kind::RMDIR => Self::Rmdir {
                path: String::decode(reader)?,
            },
            kind::REALPATH => Self::Realpath {
                path: String::decode(reader)?,
            },
            kind::STAT => Self::Stat {
                path: String::decode(reader)?,
            },
            kind::RENAME => Self::Rename {
                from: String::decode(reader)?,
                to: String::decode(reader)?,
            },
            kind::READLINK => Self::Readlink {
                path: String::decode(reader)?,
            },
            kind::SYMLINK => Self::Symlink {
                target: String::decode(reader)?,
                link: String::decode(reader)?,
            },
            kind::EXTENDED => match String::decode(reader)?.as_str() {
                POSIX_RENAME => Self::PosixRename {
                    from: String::decode(reader)?,
                    to: String::decode(reader)?,
                },
                name => Self::Extended { name: name.into() },
            },
            kind => Self::Unknown { kind },
        })
    }
}

/// A name entry of an `SSH_FXP_NAME` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    /// The file name, or full path for `realpath` and `readlink`.
    pub filename: String,

    /// The `ls -l` description of the file.
    pub longname: String,

    /// The attributes of the file.
    pub attrs: FileAttributes,
}

/// A response to the client, with its request identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Response {
    Status(StatusCode),
    Handle(Vec<u8>),
    Data(Vec<u8>),
    Name(Vec<Name>),
    Attrs(FileAttributes),
}

impl Response {
    /// Serialize the response for the request `id`, with its length prefix.
    pub fn to_packet(&self, id: u32) -> Result<Vec<u8>> {
        let mut body = Vec::new();

        match self {
            Self::Status(code) => {
                kind::STATUS.encode(&mut body)?;
                id.encode(&mut body)?;
                (*code as u32).encode(&mut body)?;
                code.message().encode(&mut body)?;
                "".encode(&mut body)?;
            }
            Self::Handle(handle) => {
                kind::HANDLE.encode(&mut body)?;
                id.encode(&mut body)?;
                handle.encode(&mut body)?;
            }
            Self::Data(data) => {
                kind::DATA.encode(&mut body)?;
                id.encode(&mut body)?;
                data.encode(&mut body)?;
            }
            Self::Name(names) => {
                kind::NAME.encode(&mut body)?;
                id.encode(&mut body)?;
                names.len().encode(&mut body)?;

                for name in names {
                    name.filename.encode(&mut body)?;
                    name.longname.encode(&mut body)?;
                    name.attrs.encode(&mut body)?;
                }
            }
            Self::Attrs(attrs) => {
                kind::ATTRS.encode(&mut body)?;
                id.encode(&mut body)?;
                attrs.encode(&mut body)?;
            }
        }

        frame(body)
    }
}

/// Serialize the `SSH_FXP_VERSION` response, advertising our extensions.
pub fn version(version: u32) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    kind::VERSION.encode(&mut body)?;
    version.encode(&mut body)?;
    POSIX_RENAME.encode(&mut body)?;
    "1".encode(&mut body)?;

    frame(body)
}

/// Prefix the `body` with its length.
fn frame(body: Vec<u8>) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(body.encoded_len()?);
    body.encode(&mut packet)?;

    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_framed() {
        let packet = Response::Status(StatusCode::Eof).to_packet(7).unwrap();

        let mut reader = packet.as_slice();
        assert_eq!(u32::decode(&mut reader).unwrap() as usize, packet.len() - 4);
        assert_eq!(u8::decode(&mut reader).unwrap(), kind::STATUS);
        assert_eq!(u32::decode(&mut reader).unwrap(), 7);
        assert_eq!(u32::decode(&mut reader).unwrap(), 1);
        assert_eq!(String::decode(&mut reader).unwrap(), "End of file");
    }

    fn body(fields: &[&str]) -> Vec<u8> {
        let mut body = Vec::new();
        for field in fields {
            field.encode(&mut body).unwrap();
        }

        body
    }

    #[test]
    fn posix_rename_is_recognized() {
        let body = body(&[POSIX_RENAME, "/a", "/b"]);

        assert_eq!(
            Request::decode(kind::EXTENDED, &mut body.as_slice()).unwrap(),
            Request::PosixRename {
                from: "/a".into(),
                to: "/b".into()
            }
        );
    }

    #[test]
    fn truncated_requests_are_bad_messages() {
        let body = body(&["/path"]);

        assert!(matches!(
            Request::decode(kind::RENAME, &mut body.as_slice()),
            Err(Error::BadMessage(_))
        ));
    }

    #[test]
    fn invalid_utf8_paths_are_bad_messages() {
        let mut body = Vec::new();
        [0xffu8, 0xfe].as_slice().encode(&mut body).unwrap();

        assert!(matches!(
            Request::decode(kind::STAT, &mut body.as_slice()),
            Err(Error::BadMessage("invalid UTF-8 string"))
        ));
    }
}
