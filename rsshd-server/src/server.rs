//! Accept connections and serve them until the peers disconnect.

use std::sync::Arc;

use async_compat::CompatExt;
use futures::{
    io::{BufReader, BufWriter},
    TryFutureExt,
};
use rsshd::{
    service,
    side::server::Server,
    Pipe, Session,
};
use rsshd_auth::{Auth, Principal};
use rsshd_connect::Connect;
use tokio::{net::TcpListener, task};

use crate::{program, Config, Result};

/// Accept connections on the `listener` forever, serving each in a task of its own.
pub async fn listen(config: Arc<Config>, listener: TcpListener) -> Result<()> {
    tracing::info!("Listening on `{}`", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::debug!("Accepted a connection from `{addr}`");

        let stream = BufReader::new(BufWriter::new(stream.compat()));

        task::spawn(connection(config.clone(), stream).inspect_err(move |err| {
            tracing::error!("Session with `{addr}` ended with an error: {err}")
        }));
    }
}

/// Serve a single connection over the `stream`: establish the transport,
/// authenticate the peer and run the programs it requests on its channels.
pub async fn connection<IO: Pipe + 'static>(config: Arc<Config>, stream: IO) -> Result<()> {
    let mut session = Session::new(stream, config.transport.clone()).await?;

    tracing::info!("Successfully connected to `{}`", session.peer_id());

    let principal = Arc::new(authenticate(&mut session, &config).await?);

    tracing::info!(
        "User `{}` logged in with the `{}` method",
        principal.user,
        principal.method.as_str()
    );

    Connect::new(&mut session, config.connect.clone())
        .run(|channel| {
            task::spawn(program::run(channel, config.clone(), principal.clone()));
        })
        .await?;

    tracing::info!("User `{}` disconnected", principal.user);

    Ok(())
}

async fn authenticate<IO: Pipe>(
    session: &mut Session<IO, Server>,
    config: &Config,
) -> Result<Principal> {
    let mut auth = Auth::new()
        .max_attempts(config.max_auth_attempts)
        .algorithms(config.signatures.clone())
        .publickey(config.authorized_keys.clone());

    if let Some(banner) = &config.banner {
        auth = auth.banner(banner.clone());
    }

    let principal = if config.passwords.is_empty() {
        service::handle(session, auth).await?
    } else {
        service::handle(session, auth.password(config.passwords.clone())).await?
    };

    Ok(principal)
}
