//! The remote side of `scp`, receiving (`-t`) or sending (`-f`) files over the
//! standard streams of an `exec` request.
//!
//! Each record is a single line: `C<mode> <size> <name>` for files, `D<mode> 0 <name>`
//! and `E` around directories, `T<mtime> 0 <atime> 0` for times, each acknowledged by
//! the receiving side with a `\0`, or a `\x01` (warning) or `\x02` (fatal) followed by a message.

use std::{
    collections::VecDeque,
    fs::{Metadata, Permissions},
    io,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::PathBuf,
};

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

use crate::{attrs::FileAttributes, server::setstat, Error, Result, Root};

const MAX_LINE_LEN: usize = 4096;
const CHUNK_LEN: usize = 32 * 1024;

/// The direction of the transfer, from the remote side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `-t`, receiving files from the peer.
    Sink,

    /// `-f`, sending files to the peer.
    Source,
}

/// A parsed `scp` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scp {
    /// Whether files are received or sent.
    pub direction: Direction,

    /// `-r`, allow directories.
    pub recursive: bool,

    /// `-p`, preserve modes and times.
    pub preserve: bool,

    /// `-d`, the target must be a directory.
    pub target_directory: bool,

    /// `-v`, log every transferred file.
    pub verbose: bool,

    /// The target of a sink, or the sources of a source.
    pub paths: Vec<String>,
}

impl Scp {
    /// Parse the `command` of an `exec` request, `scp` with its options and paths.
    pub fn parse(command: &str) -> Result<Self> {
        let mut words = words(command)?.into_iter();

        match words.next() {
            Some(program) if program == "scp" || program.ends_with("/scp") => (),
            _ => return Err(Error::BadMessage("not an scp command")),
        }

        let (mut sink, mut source) = (false, false);
        let mut scp = Self {
            direction: Direction::Sink,
            recursive: false,
            preserve: false,
            target_directory: false,
            verbose: false,
            paths: Vec::new(),
        };

        let mut options = true;
        for word in words {
            if options && word == "--" {
                options = false;
            } else if options && word.len() > 1 && word.starts_with('-') {
                for flag in word.chars().skip(1) {
                    match flag {
                        't' => sink = true,
                        'f' => source = true,
                        'r' => scp.recursive = true,
                        'p' => scp.preserve = true,
                        'd' => scp.target_directory = true,
                        'v' => scp.verbose = true,
                        _ => return Err(Error::BadMessage("unsupported scp option")),
                    }
                }
            } else {
                options = false;
                scp.paths.push(word);
            }
        }

        scp.direction = match (sink, source) {
            (true, false) => Direction::Sink,
            (false, true) => Direction::Source,
            _ => return Err(Error::BadMessage("exactly one of `-t` and `-f` is required")),
        };

        match (scp.direction, scp.paths.len()) {
            (_, 0) => Err(Error::BadMessage("missing path")),
            (Direction::Sink, 2..) => Err(Error::BadMessage("a single target is allowed")),
            _ => Ok(scp),
        }
    }

    /// Run the transfer over `io`, returning the exit status of the command.
    pub async fn run<IO>(&self, root: &Root, io: &mut IO) -> Result<u32>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!("Running scp as a {:?} of {:?}", self.direction, self.paths);

        let result = match self.direction {
            Direction::Sink => self.sink(root, io).await,
            Direction::Source => self.source(root, io).await,
        };

        match result {
            Err(Error::BadMessage(message)) => {
                fatal(io, message).await?;

                Ok(1)
            }
            result => result,
        }
    }

    fn transferred(&self, path: &str, size: u64) {
        if self.verbose {
            tracing::info!("scp: transferred `{path}` ({size} bytes)");
        } else {
            tracing::debug!("scp: transferred `{path}` ({size} bytes)");
        }
    }

    async fn sink<IO>(&self, root: &Root, io: &mut IO) -> Result<u32>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let target = Root::normalize(&self.paths[0]);
        let target_is_dir = match root.resolve(&target).await {
            Ok(real) => tokio::fs::metadata(&real)
                .await
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false),
            Err(err) => {
                fatal(io, &format!("{target}: {}", describe(&err))).await?;

                return Ok(1);
            }
        };

        if self.target_directory && !target_is_dir {
            fatal(io, &format!("{target}: Not a directory")).await?;

            return Ok(1);
        }

        ack(io).await?;

        let mut directories: Vec<(String, Option<(u32, u32)>)> = Vec::new();
        let mut times = None;
        let mut status = 0;

        while let Some(line) = read_line(io).await? {
            let Some((&record, rest)) = line.split_first() else {
                return Err(Error::BadMessage("empty record"));
            };
            let rest = std::str::from_utf8(rest).map_err(|_| Error::BadMessage("record is not UTF-8"))?;

            match record {
                b'\x01' | b'\x02' => {
                    tracing::warn!("scp peer reported: {rest}");
                    status = 1;

                    if record == b'\x02' {
                        break;
                    }
                }
                b'T' => {
                    times = Some(parse_times(rest)?);

                    ack(io).await?;
                }
                b'E' => {
                    let Some((path, times)) = directories.pop() else {
                        return Err(Error::BadMessage("unexpected end of directory"));
                    };

                    if let (true, Some(times)) = (self.preserve, times) {
                        let attrs = FileAttributes {
                            atime_mtime: Some(times),
                            ..Default::default()
                        };

                        let result = match root.resolve(&path).await {
                            Ok(real) => setstat(&real, &attrs).await,
                            Err(err) => Err(err),
                        };
                        if let Err(err) = result {
                            tracing::debug!("Unable to set times of `{path}`: {err}");
                        }
                    }

                    ack(io).await?;
                }
                b'C' | b'D' => {
                    let (mode, size, name) = parse_entry(rest)?;
                    let destination = match directories.last() {
                        Some((directory, _)) => Root::normalize(&format!("{directory}/{name}")),
                        None if target_is_dir => Root::normalize(&format!("{target}/{name}")),
                        None => target.clone(),
                    };
                    let times = times.take();

                    if record == b'D' {
                        if !self.recursive {
                            return Err(Error::BadMessage("received a directory without `-r`"));
                        }

                        if let Err(err) = self.enter(root, &destination, mode).await {
                            fatal(io, &format!("{destination}: {}", describe(&err))).await?;

                            return Ok(1);
                        }

                        directories.push((destination, times));
                        ack(io).await?;
                    } else if !self.receive(root, io, &destination, mode, size, times).await? {
                        status = 1;
                    }
                }
                _ => return Err(Error::BadMessage("unexpected scp record")),
            }
        }

        Ok(status)
    }

    async fn enter(&self, root: &Root, path: &str, mode: u32) -> Result<()> {
        let real = root.resolve(path).await?;

        match tokio::fs::metadata(&real).await {
            Ok(metadata) if metadata.is_dir() => (),
            Ok(_) => return Err(io::Error::new(io::ErrorKind::AlreadyExists, "Not a directory").into()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tokio::fs::DirBuilder::new()
                    .mode(mode | 0o700)
                    .create(&real)
                    .await?;
            }
            Err(err) => return Err(err.into()),
        }

        if self.preserve {
            tokio::fs::set_permissions(&real, Permissions::from_mode(mode)).await?;
        }

        Ok(())
    }

    /// Receive the `size` bytes of a file, `false` when a warning was reported.
    async fn receive<IO>(
        &self,
        root: &Root,
        io: &mut IO,
        path: &str,
        mode: u32,
        size: u64,
        times: Option<(u32, u32)>,
    ) -> Result<bool>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let opened = match root.resolve(path).await {
            Ok(real) => tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&real)
                .await
                .map(|file| (file, real))
                .map_err(Error::from),
            Err(err) => Err(err),
        };
        let (file, real) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                warn(io, &format!("{path}: {}", describe(&err))).await?;

                return Ok(false);
            }
        };

        ack(io).await?;

        let mut file = Some(file);
        let mut failure: Option<Error> = None;
        let mut buffer = vec![0; CHUNK_LEN];
        let mut remaining = size;

        while remaining > 0 {
            let len = remaining.min(CHUNK_LEN as u64) as usize;
            io.read_exact(&mut buffer[..len]).await.map_err(closed)?;

            if let Some(writer) = &mut file {
                if let Err(err) = writer.write_all(&buffer[..len]).await {
                    failure = Some(err.into());
                    file = None;
                }
            }

            remaining -= len as u64;
        }

        if let Some(mut writer) = file {
            if let Err(err) = writer.flush().await {
                failure = Some(err.into());
            }
        }

        let mut delivered = true;
        match read_ack(io).await? {
            Ack::Ok => (),
            Ack::Warning(message) | Ack::Fatal(message) => {
                tracing::warn!("scp peer reported: {message}");
                delivered = false;
            }
        }

        if failure.is_none() && self.preserve {
            let attrs = FileAttributes {
                permissions: Some(mode),
                atime_mtime: times,
                ..Default::default()
            };

            failure = setstat(&real, &attrs).await.err();
        }

        match failure {
            Some(err) => {
                warn(io, &format!("{path}: {}", describe(&err))).await?;

                Ok(false)
            }
            None => {
                ack(io).await?;
                self.transferred(path, size);

                Ok(delivered)
            }
        }
    }

    async fn source<IO>(&self, root: &Root, io: &mut IO) -> Result<u32>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        if !acked(io).await? {
            return Ok(1);
        }

        let mut status = 0;

        for path in &self.paths {
            let path = Root::normalize(path);

            let sent = match inspect(root, &path).await {
                Ok((real, metadata)) if metadata.is_dir() => {
                    if self.recursive {
                        self.send_tree(root, io, &path, real, &metadata).await?
                    } else {
                        warn(io, &format!("{path}: not a regular file")).await?;

                        false
                    }
                }
                Ok((real, metadata)) if metadata.is_file() => {
                    self.send_file(io, &path, real, &metadata).await?
                }
                Ok(_) => {
                    warn(io, &format!("{path}: not a regular file")).await?;

                    false
                }
                Err(err) => {
                    warn(io, &format!("{path}: {}", describe(&err))).await?;

                    false
                }
            };

            if !sent {
                status = 1;
            }
        }

        Ok(status)
    }

    async fn send_times<IO>(&self, io: &mut IO, metadata: &Metadata) -> Result<bool>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.preserve {
            return Ok(true);
        }

        send(
            io,
            format!("T{} 0 {} 0\n", metadata.mtime(), metadata.atime()).as_bytes(),
        )
        .await?;

        acked(io).await
    }

    async fn send_file<IO>(
        &self,
        io: &mut IO,
        path: &str,
        real: PathBuf,
        metadata: &Metadata,
    ) -> Result<bool>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let mut file = match tokio::fs::File::open(&real).await {
            Ok(file) => file,
            Err(err) => {
                warn(io, &format!("{path}: {}", describe(&err.into()))).await?;

                return Ok(false);
            }
        };

        if !self.send_times(io, metadata).await? {
            return Ok(false);
        }

        let size = metadata.len();
        send(
            io,
            format!("C{:04o} {size} {}\n", metadata.mode() & 0o7777, file_name(path)).as_bytes(),
        )
        .await?;

        if !acked(io).await? {
            return Ok(false);
        }

        let mut failure = None;
        let mut buffer = vec![0; CHUNK_LEN];
        let mut remaining = size;

        while remaining > 0 {
            let chunk = &mut buffer[..remaining.min(CHUNK_LEN as u64) as usize];

            // A file shrinking while sent is padded to its announced size.
            if failure.is_some() {
                chunk.fill(0);
            } else if let Err(err) = file.read_exact(chunk).await {
                chunk.fill(0);
                failure = Some(err);
            }

            io.write_all(chunk).await.map_err(Error::stream)?;
            remaining -= chunk.len() as u64;
        }

        let complete = failure.is_none();
        match failure {
            None => ack(io).await?,
            Some(err) => warn(io, &format!("{path}: {err}")).await?,
        }

        if acked(io).await? && complete {
            self.transferred(path, size);

            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn send_tree<IO>(
        &self,
        root: &Root,
        io: &mut IO,
        path: &str,
        real: PathBuf,
        metadata: &Metadata,
    ) -> Result<bool>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stack = Vec::new();
        if !self.send_directory(io, &mut stack, path, real, metadata).await? {
            return Ok(false);
        }

        let mut complete = true;

        while let Some((_, entries)) = stack.last_mut() {
            let Some(path) = entries.pop_front() else {
                stack.pop();

                send(io, b"E\n").await?;
                complete &= acked(io).await?;

                continue;
            };

            complete &= match inspect(root, &path).await {
                Ok((real, metadata)) if metadata.is_dir() => {
                    self.send_directory(io, &mut stack, &path, real, &metadata)
                        .await?
                }
                Ok((real, metadata)) if metadata.is_file() => {
                    self.send_file(io, &path, real, &metadata).await?
                }
                Ok(_) => {
                    warn(io, &format!("{path}: not a regular file")).await?;

                    false
                }
                Err(err) => {
                    warn(io, &format!("{path}: {}", describe(&err))).await?;

                    false
                }
            };
        }

        Ok(complete)
    }

    /// Announce a directory and push its entries on the `stack`.
    async fn send_directory<IO>(
        &self,
        io: &mut IO,
        stack: &mut Vec<(PathBuf, VecDeque<String>)>,
        path: &str,
        real: PathBuf,
        metadata: &Metadata,
    ) -> Result<bool>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        if stack.iter().any(|(directory, _)| *directory == real) {
            warn(io, &format!("{path}: directory loop")).await?;

            return Ok(false);
        }

        let mut names = Vec::new();
        let listed = async {
            let mut entries = tokio::fs::read_dir(&real).await?;
            while let Some(entry) = entries.next_entry().await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }

            Ok::<_, io::Error>(())
        };
        if let Err(err) = listed.await {
            warn(io, &format!("{path}: {}", describe(&err.into()))).await?;

            return Ok(false);
        }
        names.sort();

        if !self.send_times(io, metadata).await? {
            return Ok(false);
        }

        send(
            io,
            format!("D{:04o} 0 {}\n", metadata.mode() & 0o7777, file_name(path)).as_bytes(),
        )
        .await?;

        if !acked(io).await? {
            return Ok(false);
        }

        stack.push((
            real,
            names
                .into_iter()
                .map(|name| Root::normalize(&format!("{path}/{name}")))
                .collect(),
        ));

        Ok(true)
    }
}

/// Split a command line into words, honoring the quoting of a POSIX shell.
fn words(command: &str) -> Result<Vec<String>> {
    const UNTERMINATED: Error = Error::BadMessage("unterminated quoting");

    let mut words = Vec::new();
    let mut word: Option<String> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => words.extend(word.take()),
            '\'' => {
                let word = word.get_or_insert_with(String::new);

                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(UNTERMINATED),
                    }
                }
            }
            '"' => {
                let word = word.get_or_insert_with(String::new);

                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err(UNTERMINATED),
                        },
                        Some(c) => word.push(c),
                        None => return Err(UNTERMINATED),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(c) => word.get_or_insert_with(String::new).push(c),
                None => return Err(UNTERMINATED),
            },
            c => word.get_or_insert_with(String::new).push(c),
        }
    }
    words.extend(word);

    Ok(words)
}

/// Parse the `<mode> <size> <name>` of a `C` or `D` record.
fn parse_entry(record: &str) -> Result<(u32, u64, &str)> {
    const MALFORMED: Error = Error::BadMessage("malformed scp record");

    let mut fields = record.splitn(3, ' ');
    let (Some(mode), Some(size), Some(name)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(MALFORMED);
    };

    let mode = u32::from_str_radix(mode, 8).map_err(|_| MALFORMED)?;
    let size = size.parse().map_err(|_| MALFORMED)?;

    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::BadMessage("unexpected file name"));
    }

    Ok((mode & 0o7777, size, name))
}

/// Parse the `<mtime> 0 <atime> 0` of a `T` record, as `(atime, mtime)`.
fn parse_times(record: &str) -> Result<(u32, u32)> {
    const MALFORMED: Error = Error::BadMessage("malformed scp times");

    let fields = record
        .split(' ')
        .map(|field| field.parse::<u32>().map_err(|_| MALFORMED))
        .collect::<Result<Vec<_>>>()?;

    match fields[..] {
        [mtime, _, atime, _] => Ok((atime, mtime)),
        _ => Err(MALFORMED),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(".")
}

fn describe(err: &Error) -> String {
    match err {
        Error::Io(err) => match err.kind() {
            io::ErrorKind::NotFound => "No such file or directory".into(),
            io::ErrorKind::PermissionDenied => "Permission denied".into(),
            _ => err.to_string(),
        },
        Error::PathEscape(_) => "Permission denied".into(),
        err => err.to_string(),
    }
}

async fn inspect(root: &Root, path: &str) -> Result<(PathBuf, Metadata)> {
    let real = root.resolve(path).await?;
    let metadata = tokio::fs::metadata(&real).await?;

    Ok((real, metadata))
}

fn closed(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::Cancelled,
        _ => Error::stream(err),
    }
}

enum Ack {
    Ok,
    Warning(String),
    Fatal(String),
}

async fn read_ack<IO: AsyncRead + Unpin>(io: &mut IO) -> Result<Ack> {
    let mut code = [0u8];
    io.read_exact(&mut code).await.map_err(closed)?;

    let message = |line: Option<Vec<u8>>| String::from_utf8_lossy(&line.unwrap_or_default()).into_owned();

    match code[0] {
        0 => Ok(Ack::Ok),
        1 => Ok(Ack::Warning(message(read_line(io).await?))),
        2 => Ok(Ack::Fatal(message(read_line(io).await?))),
        _ => Err(Error::BadMessage("unexpected scp response")),
    }
}

/// Wait for the peer's acknowledgement, `false` on a warning.
async fn acked<IO: AsyncRead + Unpin>(io: &mut IO) -> Result<bool> {
    match read_ack(io).await? {
        Ack::Ok => Ok(true),
        Ack::Warning(message) => {
            tracing::debug!("scp peer warned: {message}");

            Ok(false)
        }
        Ack::Fatal(message) => {
            tracing::warn!("scp peer aborted: {message}");

            Err(Error::Cancelled)
        }
    }
}

/// Read a line without its terminating `\n`, `None` when the peer ended the stream.
async fn read_line<IO: AsyncRead + Unpin>(io: &mut IO) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0u8];

        match io.read(&mut byte).await.map_err(Error::stream)? {
            0 if line.is_empty() => break Ok(None),
            0 => break Err(Error::Cancelled),
            _ if byte[0] == b'\n' => break Ok(Some(line)),
            _ if line.len() >= MAX_LINE_LEN => break Err(Error::BadMessage("scp record too long")),
            _ => line.push(byte[0]),
        }
    }
}

async fn send<IO: AsyncWrite + Unpin>(io: &mut IO, bytes: &[u8]) -> Result<()> {
    io.write_all(bytes).await.map_err(Error::stream)?;
    io.flush().await.map_err(Error::stream)
}

async fn ack<IO: AsyncWrite + Unpin>(io: &mut IO) -> Result<()> {
    send(io, b"\0").await
}

async fn warn<IO: AsyncWrite + Unpin>(io: &mut IO, message: &str) -> Result<()> {
    tracing::debug!("scp: {message}");

    send(io, format!("\x01scp: {message}\n").as_bytes()).await
}

async fn fatal<IO: AsyncWrite + Unpin>(io: &mut IO, message: &str) -> Result<()> {
    tracing::debug!("scp: {message}");

    send(io, format!("\x02scp: {message}\n").as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_parsed() {
        let scp = Scp::parse("scp -t -- /upload").unwrap();
        assert_eq!(scp.direction, Direction::Sink);
        assert_eq!(scp.paths, ["/upload"]);
        assert!(!scp.recursive);

        let scp = Scp::parse("/usr/bin/scp -prf 'my file' \"other \\\"one\\\"\" plain\\ name").unwrap();
        assert_eq!(scp.direction, Direction::Source);
        assert!(scp.recursive && scp.preserve);
        assert_eq!(scp.paths, ["my file", "other \"one\"", "plain name"]);
    }

    #[test]
    fn invalid_commands_are_refused() {
        for command in [
            "scp /path",
            "scp -t -f /path",
            "scp -t",
            "scp -t a b",
            "scp -x -t a",
            "scp -t 'open",
            "sftp -t a",
        ] {
            assert!(Scp::parse(command).is_err(), "{command}");
        }
    }

    #[test]
    fn records_are_parsed() {
        assert_eq!(parse_entry("0644 12 notes.txt").unwrap(), (0o644, 12, "notes.txt"));
        assert_eq!(parse_entry("0755 0 with space").unwrap(), (0o755, 0, "with space"));
        assert!(parse_entry("0644 12 ../escape").is_err());
        assert!(parse_entry("0644 12 a/b").is_err());
        assert!(parse_entry("0999 12 x").is_err());

        assert_eq!(parse_times("1700000000 0 1600000000 0").unwrap(), (1600000000, 1700000000));
        assert!(parse_times("1 0 2").is_err());
    }
}
