use std::net::SocketAddr;

use async_std::{net::TcpListener, stream::StreamExt};
use futures::io::BufReader;

use rsshd::{
    packet::{
        connect::ChannelData,
        trans::{ServiceAccept, ServiceRequest},
    },
    side::server::Server,
    Error, Result, Session,
};

pub fn host_key() -> rsshd::algorithm::HostKey {
    ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519)
        .unwrap()
        .into()
}

async fn serve(socket: TcpListener, config: Server) -> Result<()> {
    let stream = socket
        .incoming()
        .next()
        .await
        .ok_or(Error::Timeout)??;
    let mut session = Session::new(BufReader::new(stream), config).await?;

    let request: ServiceRequest = session.recv().await?.to()?;
    session
        .send(&ServiceAccept {
            service_name: request.service_name,
        })
        .await?;
    session.enable_delayed_compression();

    loop {
        let packet = session.recv().await?;

        if let Ok(data) = packet.to::<ChannelData>() {
            session.send(&data).await?;
        } else {
            session.unimplemented().await?;
        }
    }
}

/// Spawn a server echoing the channel data it receives, until the peer disconnects.
pub async fn server(config: Server) -> Result<(SocketAddr, impl futures::Future<Output = Result<()>>)> {
    let socket = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = socket.local_addr()?;

    let handle = async_std::task::spawn_local(serve(socket, config));

    Ok((addr, handle))
}
