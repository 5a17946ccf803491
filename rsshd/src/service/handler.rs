use futures::Future;

use crate::{
    packet::trans::{DisconnectReason, ServiceAccept, ServiceRequest},
    session::Session,
    side::Side,
    Error, Pipe,
};

/// A service handler in the transport protocol.
pub trait Handler {
    /// The errorneous outcome of the [`Handler`].
    type Err: From<crate::Error>;
    /// The successful outcome of the [`Handler`].
    type Ok<'s, IO: Pipe + 's, S: Side + 's>;

    /// The handled service _identifier_.
    const SERVICE_NAME: &'static str;

    /// The service callback, this is called when we receive a service request from the peer.
    fn on_request<'s, IO, S>(
        &mut self,
        session: &'s mut Session<IO, S>,
    ) -> impl Future<Output = Result<Self::Ok<'s, IO, S>, Self::Err>> + Send
    where
        IO: Pipe,
        S: Side;
}

/// Handle a _service_ request from the peer, disconnecting it when asking for another service.
pub async fn handle<IO, S, H>(
    session: &mut Session<IO, S>,
    mut service: H,
) -> Result<H::Ok<'_, IO, S>, H::Err>
where
    IO: Pipe,
    S: Side,
    H: Handler,
{
    let ServiceRequest { service_name } = match session.recv().await?.to() {
        Ok(message) => message,
        Err(err) => {
            session
                .disconnect(
                    DisconnectReason::ProtocolError,
                    "Unexpected message outside of a service request, aborting.",
                )
                .await?;

            return Err(err.into());
        }
    };

    if service_name == H::SERVICE_NAME {
        session.send(&ServiceAccept { service_name }).await?;

        service.on_request(session).await
    } else {
        tracing::warn!("Peer requested the unknown service `{service_name}`");

        session
            .disconnect(
                DisconnectReason::ServiceNotAvailable,
                "Requested service is unknown, aborting.",
            )
            .await?;

        Err(Error::UnknownService.into())
    }
}
