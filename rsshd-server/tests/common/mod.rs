#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use async_compat::Compat;
use futures::io::BufReader;
use tokio::{io::DuplexStream, task::JoinHandle};

use rsshd::{
    algorithm::{HostKey, Key},
    packet::{
        connect::{
            ChannelData, ChannelOpen, ChannelOpenConfirmation, ChannelRequest,
            ChannelRequestContext,
        },
        trans::{ServiceAccept, ServiceRequest},
        userauth::{Method, PublickeySignature, Request, Success},
        Packet,
    },
    side::{client::Client, server::Server},
    Session,
};
use rsshd_sftp::Root;
use rsshd_server::{server, Config};
use ssh_key::{Algorithm, PrivateKey};

pub type Io = BufReader<Compat<DuplexStream>>;

/// The channel number the client uses for its first channel.
pub const CLIENT_CHANNEL: u32 = 3;

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn keypair() -> HostKey {
    PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
        .unwrap()
        .into()
}

/// A configuration serving `root`, authorizing the `user` key.
pub async fn config(root: &Path, user: &HostKey) -> Config {
    let transport = Server {
        keys: vec![keypair()],
        ..Default::default()
    };

    Config {
        authorized_keys: user.key.public_key().to_openssh().unwrap().parse().unwrap(),
        ..Config::new(transport, Root::new(root).await.unwrap())
    }
}

/// Serve a connection with `config` in the background, returning the connected client.
pub async fn start(config: Config) -> (Session<Io, Client>, JoinHandle<rsshd_server::Result<()>>) {
    init();

    let (server, client) = tokio::io::duplex(256 * 1024);
    let handle = tokio::spawn(server::connection(
        Arc::new(config),
        BufReader::new(Compat::new(server)),
    ));

    let client = Session::new(BufReader::new(Compat::new(client)), Client::default())
        .await
        .unwrap();

    (client, handle)
}

/// Request the authentication service from the client side.
pub async fn request_service(client: &mut Session<Io, Client>) {
    client
        .send(&ServiceRequest {
            service_name: "ssh-userauth".into(),
        })
        .await
        .unwrap();

    let accept: ServiceAccept = client.recv().await.unwrap().to().unwrap();
    assert_eq!(accept.service_name, "ssh-userauth");
}

/// A signed `publickey` request for `user`.
pub fn publickey(client: &Session<Io, Client>, user: &str, key: &HostKey) -> Request {
    let blob = key.blob(&Key::Ed25519).unwrap();
    let data = PublickeySignature {
        session_id: client.session_id().unwrap(),
        username: user,
        service_name: "ssh-connection",
        algorithm: Key::Ed25519.as_ref(),
        blob: &blob,
    }
    .to_vec()
    .unwrap();

    Request {
        username: user.into(),
        service_name: "ssh-connection".into(),
        method: Method::Publickey {
            algorithm: Key::Ed25519.as_ref().into(),
            signature: Some(key.sign(&Key::Ed25519, &data).unwrap()),
            blob,
        },
    }
}

pub fn password(user: &str, password: &str) -> Request {
    Request {
        username: user.into(),
        service_name: "ssh-connection".into(),
        method: Method::Password {
            password: password.into(),
            new: None,
        },
    }
}

/// Log in as `user` with its `key`.
pub async fn login(client: &mut Session<Io, Client>, user: &str, key: &HostKey) {
    request_service(client).await;

    let request = publickey(client, user, key);
    client.send(&request).await.unwrap();
    client.recv().await.unwrap().to::<Success>().unwrap();
}

/// Open a `session` channel, returning the server's channel number.
pub async fn open(client: &mut Session<Io, Client>) -> u32 {
    client
        .send(&ChannelOpen {
            channel_type: "session".into(),
            sender_channel: CLIENT_CHANNEL,
            initial_window_size: 1024 * 1024,
            maximum_packet_size: 32768,
            data: Vec::new(),
        })
        .await
        .unwrap();

    let confirmation: ChannelOpenConfirmation = client.recv().await.unwrap().to().unwrap();
    assert_eq!(confirmation.recipient_channel, CLIENT_CHANNEL);

    confirmation.sender_channel
}

/// Send a channel request expecting a reply.
pub async fn request(
    client: &mut Session<Io, Client>,
    recipient_channel: u32,
    context: ChannelRequestContext,
) -> Packet {
    client
        .send(&ChannelRequest {
            recipient_channel,
            want_reply: true,
            context,
        })
        .await
        .unwrap();

    client.recv().await.unwrap()
}

/// Receive the next data sent on the channel, skipping the window adjustments.
pub async fn data(client: &mut Session<Io, Client>) -> Vec<u8> {
    loop {
        let packet = client.recv().await.unwrap();

        if let Ok(data) = packet.to::<ChannelData>() {
            assert_eq!(data.recipient_channel, CLIENT_CHANNEL);

            break data.data;
        }
    }
}
