#![allow(dead_code)]

use std::path::Path;

use async_compat::Compat;
use futures::{AsyncReadExt, AsyncWriteExt};
use tokio::{io::DuplexStream, task::JoinHandle};

use ssh_encoding::{Decode, Encode};
use rsshd_sftp::{
    attrs::FileAttributes,
    protocol::{kind, OpenFlags},
    Root, Sftp,
};

pub type Io = Compat<DuplexStream>;

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// A response from the server, as seen by the client.
#[derive(Debug)]
pub enum Reply {
    Status(u32),
    Handle(Vec<u8>),
    Data(Vec<u8>),
    Name(Vec<(String, String, FileAttributes)>),
    Attrs(FileAttributes),
}

/// A minimal SFTP client, talking to a server over an in-memory pipe.
pub struct Client {
    io: Io,
    id: u32,
}

/// Start a server confined to `root` and negotiate the protocol version.
pub async fn start(root: &Path) -> (Client, JoinHandle<rsshd_sftp::Result<()>>) {
    init();

    let root = Root::new(root).await.unwrap();
    let (server, client) = tokio::io::duplex(1024 * 1024);

    let task = tokio::spawn(async move { Sftp::new(root).serve(&mut Compat::new(server)).await });

    let mut client = Client {
        io: Compat::new(client),
        id: 0,
    };

    let mut init = vec![kind::INIT];
    3u32.encode(&mut init).unwrap();
    client.write(init).await;

    let body = client.read().await;
    let mut reader = body.as_slice();
    assert_eq!(u8::decode(&mut reader).unwrap(), kind::VERSION);
    assert_eq!(u32::decode(&mut reader).unwrap(), 3);
    assert_eq!(String::decode(&mut reader).unwrap(), "posix-rename@openssh.com");

    (client, task)
}

impl Client {
    async fn write(&mut self, body: Vec<u8>) {
        let mut packet = Vec::new();
        body.encode(&mut packet).unwrap();

        self.io.write_all(&packet).await.unwrap();
        self.io.flush().await.unwrap();
    }

    async fn read(&mut self) -> Vec<u8> {
        let mut len = [0; 4];
        self.io.read_exact(&mut len).await.unwrap();

        let mut body = vec![0; u32::from_be_bytes(len) as usize];
        self.io.read_exact(&mut body).await.unwrap();

        body
    }

    /// Send a request of `kind`, with its fields written by `fill`.
    pub async fn request(&mut self, kind: u8, fill: impl FnOnce(&mut Vec<u8>)) -> Reply {
        self.id += 1;

        let mut body = vec![kind];
        self.id.encode(&mut body).unwrap();
        fill(&mut body);
        self.write(body).await;

        let body = self.read().await;
        let mut reader = body.as_slice();
        let kind = u8::decode(&mut reader).unwrap();
        assert_eq!(u32::decode(&mut reader).unwrap(), self.id);

        match kind {
            kind::STATUS => Reply::Status(u32::decode(&mut reader).unwrap()),
            kind::HANDLE => Reply::Handle(Vec::decode(&mut reader).unwrap()),
            kind::DATA => Reply::Data(Vec::decode(&mut reader).unwrap()),
            kind::NAME => Reply::Name(
                (0..u32::decode(&mut reader).unwrap())
                    .map(|_| {
                        (
                            String::decode(&mut reader).unwrap(),
                            String::decode(&mut reader).unwrap(),
                            FileAttributes::decode(&mut reader).unwrap(),
                        )
                    })
                    .collect(),
            ),
            kind::ATTRS => Reply::Attrs(FileAttributes::decode(&mut reader).unwrap()),
            kind => panic!("unexpected response #{kind}"),
        }
    }

    pub async fn open(&mut self, path: &str, flags: OpenFlags) -> Reply {
        self.request(kind::OPEN, |writer| {
            path.encode(writer).unwrap();
            flags.bits().encode(writer).unwrap();
            FileAttributes::default().encode(writer).unwrap();
        })
        .await
    }

    pub async fn handle(&mut self, path: &str, flags: OpenFlags) -> Vec<u8> {
        match self.open(path, flags).await {
            Reply::Handle(handle) => handle,
            reply => panic!("unexpected reply to open: {reply:?}"),
        }
    }

    pub async fn write_at(&mut self, handle: &[u8], offset: u64, data: &[u8]) -> Reply {
        self.request(kind::WRITE, |writer| {
            handle.encode(writer).unwrap();
            offset.encode(writer).unwrap();
            data.encode(writer).unwrap();
        })
        .await
    }

    pub async fn read_at(&mut self, handle: &[u8], offset: u64, len: u32) -> Reply {
        self.request(kind::READ, |writer| {
            handle.encode(writer).unwrap();
            offset.encode(writer).unwrap();
            len.encode(writer).unwrap();
        })
        .await
    }

    pub async fn close(&mut self, handle: &[u8]) -> Reply {
        self.request(kind::CLOSE, |writer| {
            handle.encode(writer).unwrap();
        })
        .await
    }

    pub async fn path(&mut self, kind: u8, path: &str) -> Reply {
        self.request(kind, |writer| {
            path.encode(writer).unwrap();
        })
        .await
    }

    pub async fn two_paths(&mut self, kind: u8, first: &str, second: &str) -> Reply {
        self.request(kind, |writer| {
            first.encode(writer).unwrap();
            second.encode(writer).unwrap();
        })
        .await
    }

    /// Put `data` in a new file at `path`.
    pub async fn put(&mut self, path: &str, data: &[u8]) {
        let handle = self
            .handle(path, OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC)
            .await;

        assert!(matches!(self.write_at(&handle, 0, data).await, Reply::Status(0)));
        assert!(matches!(self.close(&handle).await, Reply::Status(0)));
    }
}
