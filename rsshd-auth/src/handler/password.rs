//! The `password` authentication method, disabled unless explicitly set on the handler.

use std::{collections::HashMap, sync::Arc};

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use super::Response;

/// An interface to the `password` authentication method.
pub trait Password: Send + Sync {
    /// Process the authentication request.
    fn process(&self, user: &str, password: &str) -> Response;
}

impl<T: Fn(&str, &str) -> Response + Send + Sync> Password for T {
    fn process(&self, user: &str, password: &str) -> Response {
        (self)(user, password)
    }
}

/// A default implementation of the method that rejects all requests.
impl Password for () {
    fn process(&self, _: &str, _: &str) -> Response {
        Response::Reject
    }
}

/// A static set of user passwords, compared in constant time.
#[derive(Debug, Clone, Default)]
pub struct Passwords {
    users: HashMap<String, Arc<SecretString>>,
}

impl Passwords {
    /// Set the `password` of `user`, replacing any previous one.
    pub fn insert(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.users
            .insert(user.into(), Arc::new(SecretString::from(password.into())));
    }

    /// Whether no password has been set.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Password for Passwords {
    fn process(&self, user: &str, password: &str) -> Response {
        match self.users.get(user) {
            Some(expected)
                if bool::from(
                    expected
                        .expose_secret()
                        .as_bytes()
                        .ct_eq(password.as_bytes()),
                ) =>
            {
                Response::Accept(Default::default())
            }
            _ => Response::Reject,
        }
    }
}
