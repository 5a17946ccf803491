//! The `publickey` authentication method.

#[doc(no_inline)]
pub use ssh_key::{public::KeyData, Certificate};

use super::Response;
use crate::AuthorizedKeys;

/// An interface to the `publickey` authentication method.
pub trait Publickey: Send + Sync {
    /// Process the authentication request, the `certificate` being already decoded
    /// when the user presented one in place of a plain key.
    fn process(&self, user: &str, key: &KeyData, certificate: Option<&Certificate>) -> Response;
}

impl<T: Fn(&str, &KeyData, Option<&Certificate>) -> Response + Send + Sync> Publickey for T {
    fn process(&self, user: &str, key: &KeyData, certificate: Option<&Certificate>) -> Response {
        (self)(user, key, certificate)
    }
}

impl Publickey for AuthorizedKeys {
    fn process(&self, user: &str, key: &KeyData, certificate: Option<&Certificate>) -> Response {
        self.authorize(user, key, certificate)
            .map_or(Response::Reject, Response::Accept)
    }
}

/// A default implementation of the method that rejects all requests.
impl Publickey for () {
    fn process(&self, _: &str, _: &KeyData, _: Option<&Certificate>) -> Response {
        Response::Reject
    }
}
