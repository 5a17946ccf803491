//! Authentication _handling_ mechanics.

use std::str::FromStr;

use enumset::EnumSet;
use rsshd::{
    algorithm::{
        key::{decode_blob, verify},
        Catalog, Key,
    },
    packet::{
        trans::DisconnectReason,
        userauth::{self, PublickeySignature},
        NameList,
    },
    service::Handler,
    side::Side,
    Error, Pipe, Result, Session,
};

use crate::{Method, Principal, Restrictions};

pub mod password;
pub mod publickey;

/// The response of a method implementation to an authentication request.
#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    /// _Accept_ the authentication request, with the restrictions of the user.
    Accept(Restrictions),

    /// _Reject_ the authentication request.
    Reject,
}

#[derive(Debug)]
enum Attempt {
    Success(Restrictions),
    Failure,
    Continue,
}

/// Default number of failed attempts after which the peer is disconnected.
const MAX_ATTEMPTS: usize = 6;

/// The authentication service [`Handler`] for sessions,
/// yielding the authenticated [`Principal`] to start the connection service with.
#[derive(Debug)]
pub struct Auth<P = (), PK = ()> {
    banner: Option<String>,
    methods: EnumSet<Method>,
    algorithms: Vec<Key>,

    max_attempts: usize,
    failures: usize,

    password: P,
    publickey: PK,
}

impl Default for Auth {
    fn default() -> Self {
        Self::new()
    }
}

impl Auth {
    /// Create an [`Auth`] layer, rejecting all authentication by default.
    pub fn new() -> Self {
        Self {
            banner: Default::default(),
            methods: Method::None.into(), // always insert the `none` method
            algorithms: Key::defaults(),

            max_attempts: MAX_ATTEMPTS,
            failures: 0,

            password: (),
            publickey: (),
        }
    }
}

impl<P, PK> Auth<P, PK>
where
    P: password::Password,
    PK: publickey::Publickey,
{
    /// Set the authentication banner text to be displayed upon authentication (the string should be `\r\n` terminated).
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());

        self
    }

    /// Set the number of failed `publickey` or `password` attempts tolerated before disconnecting the peer.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;

        self
    }

    /// Set the signature algorithms accepted for the `publickey` method.
    pub fn algorithms(mut self, algorithms: Vec<Key>) -> Self {
        self.algorithms = algorithms;

        self
    }

    /// Set the authentication handler for the `password` method, enabling it.
    pub fn password<T: password::Password>(self, password: T) -> Auth<T, PK> {
        let Self {
            banner,
            mut methods,
            algorithms,
            max_attempts,
            failures,
            password: _,
            publickey,
        } = self;

        methods |= Method::Password;

        Auth {
            banner,
            methods,
            algorithms,
            max_attempts,
            failures,
            password,
            publickey,
        }
    }

    /// Set the authentication handler for the `publickey` method, enabling it.
    pub fn publickey<T: publickey::Publickey>(self, publickey: T) -> Auth<P, T> {
        let Self {
            banner,
            mut methods,
            algorithms,
            max_attempts,
            failures,
            password,
            publickey: _,
        } = self;

        methods |= Method::Publickey;

        Auth {
            banner,
            methods,
            algorithms,
            max_attempts,
            failures,
            password,
            publickey,
        }
    }

    /// The methods that may continue the authentication, `none` excluded.
    fn continue_with(&self) -> NameList {
        self.methods
            .iter()
            .filter(|method| *method != Method::None)
            .map(Method::as_str)
            .collect()
    }

    async fn handle_attempt<IO: Pipe, S: Side>(
        &self,
        session: &mut Session<IO, S>,
        username: &str,
        service_name: &str,
        method: userauth::Method,
    ) -> Result<Attempt> {
        Ok(match method {
            userauth::Method::None | userauth::Method::Other(_) => Attempt::Failure,

            userauth::Method::Publickey {
                algorithm,
                blob,
                signature,
            } => {
                tracing::debug!(
                    "Attempt using method `publickey` (signed: {}, algorithm: {algorithm}) for user `{username}`",
                    signature.is_some(),
                );

                let Some(key) = Key::from_str(&algorithm)
                    .ok()
                    .filter(|key| self.algorithms.contains(key))
                else {
                    return Ok(Attempt::Failure);
                };

                let (data, certificate) = match decode_blob(&key, &blob) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        tracing::debug!("Unable to decode the public key blob: {err}");

                        return Ok(Attempt::Failure);
                    }
                };

                let Response::Accept(restrictions) =
                    self.publickey
                        .process(username, &data, certificate.as_ref())
                else {
                    return Ok(Attempt::Failure);
                };

                match signature {
                    None => {
                        session.send(&userauth::PkOk { algorithm, blob }).await?;

                        Attempt::Continue
                    }
                    Some(signature) => {
                        let message = PublickeySignature {
                            session_id: session.session_id().unwrap_or_default(),
                            username,
                            service_name,
                            algorithm: &algorithm,
                            blob: &blob,
                        };

                        match verify(&data, &key, &message.to_vec()?, &signature) {
                            Ok(()) => Attempt::Success(restrictions),
                            Err(err) => {
                                tracing::warn!(
                                    "Invalid `publickey` signature for user `{username}`: {err}"
                                );

                                Attempt::Failure
                            }
                        }
                    }
                }
            }

            userauth::Method::Password { password, new } => {
                tracing::debug!(
                    "Attempt using method `password` (update: {}) for user `{username}`",
                    new.is_some(),
                );

                match (new, self.password.process(username, &password)) {
                    (None, Response::Accept(restrictions)) => Attempt::Success(restrictions),
                    _ => Attempt::Failure,
                }
            }
        })
    }
}

impl<P, PK> Handler for Auth<P, PK>
where
    P: password::Password,
    PK: publickey::Publickey,
{
    type Err = Error;
    type Ok<'s, IO: Pipe + 's, S: Side + 's> = Principal;

    const SERVICE_NAME: &'static str = crate::SERVICE_NAME;

    async fn on_request<'s, IO, S>(
        &mut self,
        session: &'s mut Session<IO, S>,
    ) -> Result<Self::Ok<'s, IO, S>, Self::Err>
    where
        IO: Pipe,
        S: Side,
    {
        if let Some(message) = self.banner.take() {
            session
                .send(&userauth::Banner {
                    message,
                    language: Default::default(),
                })
                .await?;
        }

        loop {
            let userauth::Request {
                username,
                service_name,
                method,
            } = match session.recv().await?.to() {
                Ok(request) => request,
                Err(err) => {
                    session
                        .disconnect(
                            DisconnectReason::ProtocolError,
                            format!(
                                "Unexpected message in the context of the `{}` service request.",
                                Self::SERVICE_NAME
                            ),
                        )
                        .await?;

                    break Err(err);
                }
            };

            if service_name != crate::CONNECTION_SERVICE_NAME {
                tracing::warn!("Peer requested the unknown service `{service_name}` upon authentication");

                session
                    .disconnect(
                        DisconnectReason::ServiceNotAvailable,
                        "Requested service is unknown, aborting.",
                    )
                    .await?;

                break Err(Error::UnknownService);
            }

            let counted = matches!(
                method,
                userauth::Method::Publickey { .. } | userauth::Method::Password { .. }
            );
            let kind = Method::of(&method).filter(|kind| self.methods.contains(*kind));
            let attempt = match kind {
                Some(_) => {
                    self.handle_attempt(session, &username, &service_name, method)
                        .await?
                }
                None => Attempt::Failure,
            };

            match (attempt, kind) {
                (Attempt::Success(restrictions), Some(kind)) => {
                    tracing::info!("User `{username}` authenticated with method `{}`", kind.as_str());

                    session.send(&userauth::Success).await?;
                    session.enable_delayed_compression();

                    break Ok(Principal {
                        user: username,
                        method: kind,
                        restrictions,
                    });
                }
                (Attempt::Continue, _) => (),
                _ => {
                    if counted {
                        self.failures += 1;
                    }

                    if self.failures > self.max_attempts {
                        tracing::warn!(
                            "User `{username}` exceeded the {} allowed authentication attempts",
                            self.max_attempts
                        );

                        session
                            .disconnect(
                                DisconnectReason::NoMoreAuthMethodsAvailable,
                                "Too many authentication failures",
                            )
                            .await?;

                        break Err(Error::AuthExhausted);
                    }

                    session
                        .send(&userauth::Failure {
                            continue_with: self.continue_with(),
                            partial_success: false,
                        })
                        .await?;
                }
            }
        }
    }
}
