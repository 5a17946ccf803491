#![allow(dead_code)]

use async_compat::Compat;
use futures::io::BufReader;
use tokio::io::DuplexStream;

use rsshd::{
    packet::{
        connect::{ChannelOpen, ChannelRequest, ChannelRequestContext},
        Packet,
    },
    side::{client::Client, server::Server},
    Session,
};
use ssh_key::{Algorithm, PrivateKey};

pub type Io = BufReader<Compat<DuplexStream>>;

/// The channel number the client uses for its first channel.
pub const CLIENT_CHANNEL: u32 = 7;

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Establish a pair of sessions over an in-memory pipe.
pub async fn connect() -> (Session<Io, Server>, Session<Io, Client>) {
    init();

    let (server, client) = tokio::io::duplex(256 * 1024);
    let config = Server {
        keys: vec![PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .unwrap()
            .into()],
        ..Default::default()
    };

    let (server, client) = futures::join!(
        Session::new(BufReader::new(Compat::new(server)), config),
        Session::new(BufReader::new(Compat::new(client)), Client::default()),
    );

    (server.unwrap(), client.unwrap())
}

/// Request a channel of `channel_type` from the client side, returning the server's answer.
pub async fn open(
    client: &mut Session<Io, Client>,
    channel_type: &str,
    sender_channel: u32,
    initial_window_size: u32,
) -> Packet {
    client
        .send(&ChannelOpen {
            channel_type: channel_type.into(),
            sender_channel,
            initial_window_size,
            maximum_packet_size: 32768,
            data: Vec::new(),
        })
        .await
        .unwrap();

    client.recv().await.unwrap()
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
