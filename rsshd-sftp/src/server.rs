//! The SFTP server, serving the requests of a peer over a byte stream.

use std::{
    collections::{HashMap, VecDeque},
    fs::{FileTimes, Permissions},
    io::{self, SeekFrom},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use ssh_encoding::Decode;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt, AsyncWriteExt as _};

use crate::{
    attrs::FileAttributes,
    protocol::{self, kind, Name, OpenFlags, Request, Response, StatusCode},
    Error, Result, Root,
};

/// The maximum length of an incoming packet.
const MAX_PACKET_LEN: usize = 256 * 1024;

/// The maximum amount of data returned by a single read.
const MAX_READ_LEN: u64 = 64 * 1024;

/// The maximum count of simultaneously opened handles.
const MAX_HANDLES: usize = 512;

/// The count of names returned by a single directory read.
const READDIR_BATCH: usize = 100;

enum Handle {
    File {
        file: tokio::fs::File,
        path: PathBuf,
    },
    Dir {
        entries: VecDeque<Name>,
    },
}

/// An SFTP server, confined to a [`Root`], holding the handles opened by the peer.
///
/// The handles are released when the server is dropped, at the end of [`Sftp::serve`].
pub struct Sftp {
    root: Root,

    handles: HashMap<u32, Handle>,
    next_handle: u32,
}

impl Sftp {
    /// Create a server for the files under `root`.
    pub fn new(root: Root) -> Self {
        Self {
            root,
            handles: Default::default(),
            next_handle: 0,
        }
    }

    /// Serve requests from `io` until the peer closes it.
    pub async fn serve<IO>(mut self, io: &mut IO) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let Some((kind::INIT, body)) = read_packet(io).await? else {
            return Err(Error::BadMessage("expected SSH_FXP_INIT"));
        };
        let version = u32::decode(&mut body.as_slice())?.min(protocol::VERSION);

        tracing::debug!("Serving SFTP version {version} from `{}`", self.root.path().display());

        write_packet(io, &protocol::version(version)?).await?;

        while let Some((kind, body)) = read_packet(io).await? {
            let mut reader = body.as_slice();
            let id = u32::decode(&mut reader)?;

            let response = match Request::decode(kind, &mut reader) {
                Ok(request) => {
                    tracing::trace!("#{id} <- {request:?}");

                    match self.process(request).await {
                        Ok(response) => response,
                        Err(err) => {
                            tracing::debug!("#{id} failed: {err}");

                            Response::Status((&err).into())
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!("#{id} is malformed: {err}");

                    Response::Status(StatusCode::BadMessage)
                }
            };

            write_packet(io, &response.to_packet(id)?).await?;
        }

        tracing::debug!("SFTP session ended, releasing {} handles", self.handles.len());

        Ok(())
    }

    fn insert(&mut self, handle: Handle) -> Result<Response> {
        if self.handles.len() >= MAX_HANDLES {
            return Err(io::Error::new(io::ErrorKind::Other, "too many opened handles").into());
        }

        while self.handles.contains_key(&self.next_handle) {
            self.next_handle = self.next_handle.wrapping_add(1);
        }

        let id = self.next_handle;
        self.handles.insert(id, handle);
        self.next_handle = self.next_handle.wrapping_add(1);

        Ok(Response::Handle(id.to_be_bytes().to_vec()))
    }

    fn handle(&mut self, handle: &[u8]) -> Result<&mut Handle> {
        <[u8; 4]>::try_from(handle)
            .ok()
            .map(u32::from_be_bytes)
            .and_then(|id| self.handles.get_mut(&id))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid handle").into())
    }

    fn file(&mut self, handle: &[u8]) -> Result<(&mut tokio::fs::File, &Path)> {
        match self.handle(handle)? {
            Handle::File { file, path } => Ok((file, path)),
            Handle::Dir { .. } => {
                Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file handle").into())
            }
        }
    }

    async fn process(&mut self, request: Request) -> Result<Response> {
        let ok = Response::Status(StatusCode::Ok);

        Ok(match request {
            Request::Open { path, flags, attrs } => {
                let real = self.root.resolve(&path).await?;

                let mut options = tokio::fs::OpenOptions::new();
                options
                    .read(flags.contains(OpenFlags::READ) || !flags.contains(OpenFlags::WRITE))
                    .write(flags.contains(OpenFlags::WRITE))
                    .append(flags.contains(OpenFlags::APPEND))
                    .truncate(flags.contains(OpenFlags::TRUNC))
                    .mode(attrs.permissions.map(|mode| mode & 0o7777).unwrap_or(0o666));
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    options.create_new(true);
                } else if flags.contains(OpenFlags::CREAT) {
                    options.create(true);
                }

                let file = options.open(&real).await?;

                self.insert(Handle::File { file, path: real })?
            }
            Request::Close { handle } => {
                self.handle(&handle)?;

                if let Some(id) = <[u8; 4]>::try_from(handle.as_slice()).ok().map(u32::from_be_bytes) {
                    self.handles.remove(&id);
                }

                ok
            }
            Request::Read {
                handle,
                offset,
                len,
            } => {
                let (file, _) = self.file(&handle)?;

                file.seek(SeekFrom::Start(offset)).await?;

                let mut data = Vec::new();
                file.take(u64::from(len).min(MAX_READ_LEN))
                    .read_to_end(&mut data)
                    .await?;

                if data.is_empty() {
                    Response::Status(StatusCode::Eof)
                } else {
                    Response::Data(data)
                }
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                let (file, _) = self.file(&handle)?;

                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(&data).await?;

                ok
            }
            Request::Lstat { path } => {
                let real = self.root.resolve_link(&path).await?;

                Response::Attrs((&tokio::fs::symlink_metadata(real).await?).into())
            }
            Request::Stat { path } => {
                let real = self.root.resolve(&path).await?;

                Response::Attrs((&tokio::fs::metadata(real).await?).into())
            }
            Request::Fstat { handle } => {
                let (file, _) = self.file(&handle)?;

                Response::Attrs((&file.metadata().await?).into())
            }
            Request::Setstat { path, attrs } => {
                let real = self.root.resolve(&path).await?;
                setstat(&real, &attrs).await?;

                ok
            }
            Request::Fsetstat { handle, attrs } => {
                let (file, path) = self.file(&handle)?;

                if let Some(size) = attrs.size {
                    file.set_len(size).await?;
                }

                let path = path.to_path_buf();
                setstat(
                    &path,
                    &FileAttributes {
                        size: None,
                        ..attrs
                    },
                )
                .await?;

                ok
            }
            Request::Opendir { path } => {
                let real = self.root.resolve(&path).await?;
                let entries = self.read_dir(&real).await?;

                self.insert(Handle::Dir { entries })?
            }
            Request::Readdir { handle } => match self.handle(&handle)? {
                Handle::Dir { entries } if entries.is_empty() => Response::Status(StatusCode::Eof),
                Handle::Dir { entries } => {
                    let count = entries.len().min(READDIR_BATCH);

                    Response::Name(entries.drain(..count).collect())
                }
                Handle::File { .. } => {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a directory handle").into())
                }
            },
            Request::Remove { path } => {
                tokio::fs::remove_file(self.root.resolve_entry(&path).await?).await?;

                ok
            }
            Request::Mkdir { path, attrs } => {
                let real = self.root.resolve(&path).await?;

                tokio::fs::DirBuilder::new()
                    .mode(attrs.permissions.map(|mode| mode & 0o7777).unwrap_or(0o777))
                    .create(real)
                    .await?;

                ok
            }
            Request::Rmdir { path } => {
                tokio::fs::remove_dir(self.root.resolve_entry(&path).await?).await?;

                ok
            }
            Request::Realpath { path } => {
                let path = self.root.realpath(&path).await?;

                Response::Name(vec![Name {
                    longname: path.clone(),
                    filename: path,
                    attrs: Default::default(),
                }])
            }
            Request::Rename { from, to } => {
                let from = self.root.resolve_entry(&from).await?;
                let to = self.root.resolve_entry(&to).await?;

                if tokio::fs::symlink_metadata(&to).await.is_ok() {
                    return Err(io::Error::from(io::ErrorKind::AlreadyExists).into());
                }

                tokio::fs::rename(from, to).await?;

                ok
            }
            Request::PosixRename { from, to } => {
                let from = self.root.resolve_entry(&from).await?;
                let to = self.root.resolve_entry(&to).await?;

                tokio::fs::rename(from, to).await?;

                ok
            }
            Request::Readlink { path } => {
                let target = tokio::fs::read_link(self.root.resolve_link(&path).await?).await?;

                let target = if target.is_absolute() {
                    self.root.to_virtual(&target)?
                } else {
                    target.to_string_lossy().into_owned()
                };

                Response::Name(vec![Name {
                    longname: target.clone(),
                    filename: target,
                    attrs: Default::default(),
                }])
            }
            Request::Symlink { target, link } => {
                let real = self.root.resolve_entry(&link).await?;
                let target = self.root.link_target(&link, &target);

                tokio::fs::symlink(target, real).await?;

                ok
            }
            Request::Extended { name } => {
                tracing::debug!("Unsupported extension `{name}`");

                Response::Status(StatusCode::OpUnsupported)
            }
            Request::Unknown { kind } => {
                tracing::debug!("Unsupported request type #{kind}");

                Response::Status(StatusCode::OpUnsupported)
            }
        })
    }

    async fn read_dir(&self, real: &Path) -> Result<VecDeque<Name>> {
        let mut entries = VecDeque::new();
        let mut dir = tokio::fs::read_dir(real).await?;

        let parent = match real.parent() {
            Some(parent) if real != self.root.path() => parent,
            _ => real,
        };

        for (name, path) in [(".", real), ("..", parent)] {
            let attrs = FileAttributes::from(&tokio::fs::symlink_metadata(path).await?);

            entries.push_back(Name {
                filename: name.into(),
                longname: attrs.longname(name, 1),
                attrs,
            });
        }

        while let Some(entry) = dir.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::debug!("Skipped unreadable entry `{filename}`: {err}");

                    continue;
                }
            };

            let attrs = FileAttributes::from(&metadata);
            entries.push_back(Name {
                longname: attrs.longname(&filename, std::os::unix::fs::MetadataExt::nlink(&metadata)),
                filename,
                attrs,
            });
        }

        Ok(entries)
    }
}

/// Apply the `attrs` to the file at `path`.
pub(crate) async fn setstat(path: &Path, attrs: &FileAttributes) -> Result<()> {
    if let Some(size) = attrs.size {
        tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await?
            .set_len(size)
            .await?;
    }

    if let Some(mode) = attrs.permissions {
        tokio::fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).await?;
    }

    let owner = attrs.uid_gid;
    let times = attrs.times();
    if owner.is_some() || times.is_some() {
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            if let Some((uid, gid)) = owner {
                std::os::unix::fs::chown(&path, Some(uid), Some(gid))?;
            }
            if let Some((accessed, modified)) = times {
                std::fs::File::open(&path)?
                    .set_times(FileTimes::new().set_accessed(accessed).set_modified(modified))?;
            }

            Ok(())
        })
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;
    }

    Ok(())
}

/// Read a packet from `io`, `None` when the peer ended the stream.
async fn read_packet<IO: AsyncRead + Unpin>(io: &mut IO) -> Result<Option<(u8, Vec<u8>)>> {
    let mut len = [0u8; 4];
    match io.read_exact(&mut len).await {
        Ok(()) => (),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(Error::stream(err)),
    }

    let len = u32::from_be_bytes(len) as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(Error::BadMessage("packet length out of bounds"));
    }

    let mut packet = vec![0; len];
    io.read_exact(&mut packet).await.map_err(Error::stream)?;

    let body = packet.split_off(1);

    Ok(Some((packet[0], body)))
}

async fn write_packet<IO: AsyncWrite + Unpin>(io: &mut IO, packet: &[u8]) -> Result<()> {
    io.write_all(packet).await.map_err(Error::stream)?;
    io.flush().await.map_err(Error::stream)
}
