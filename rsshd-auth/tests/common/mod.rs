#![allow(dead_code)]

use async_compat::Compat;
use futures::io::BufReader;
use tokio::io::DuplexStream;

use rsshd::{
    algorithm::{HostKey, Key},
    packet::{
        trans::{ServiceAccept, ServiceRequest},
        userauth::{Method, PublickeySignature, Request},
    },
    side::{client::Client, server::Server},
    Session,
};
use ssh_key::{Algorithm, PrivateKey};

pub type Io = BufReader<Compat<DuplexStream>>;

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn keypair() -> PrivateKey {
    PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap()
}

/// Establish a pair of sessions over an in-memory pipe, with the client requesting the authentication service.
pub async fn connect() -> (Session<Io, Server>, Session<Io, Client>) {
    init();

    let (server, client) = tokio::io::duplex(256 * 1024);
    let config = Server {
        keys: vec![keypair().into()],
        ..Default::default()
    };

    let (server, client) = futures::join!(
        Session::new(BufReader::new(Compat::new(server)), config),
        Session::new(BufReader::new(Compat::new(client)), Client::default()),
    );

    (server.unwrap(), client.unwrap())
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

/// Build a `publickey` request for `user`, signed when `sign` is set.
pub fn publickey(
    client: &Session<Io, Client>,
    user: &str,
    key: &HostKey,
    algorithm: Key,
    sign: bool,
) -> Request {
    let blob = key.blob(&algorithm).unwrap();

    let signature = sign.then(|| {
        let data = PublickeySignature {
            session_id: client.session_id().unwrap(),
            username: user,
            service_name: "ssh-connection",
            algorithm: algorithm.as_ref(),
            blob: &blob,
        }
        .to_vec()
        .unwrap();

        key.sign(&algorithm, &data).unwrap()
    });

    Request {
        username: user.into(),
        service_name: "ssh-connection".into(),
        method: Method::Publickey {
            algorithm: algorithm.as_ref().into(),
            blob,
            signature,
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
