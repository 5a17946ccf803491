//! Supported algorithms for **compression**, **encryption**, **integrity**, **host keys** and **key-exchange**.
//!
//! Every category lists its algorithms from the most to the least preferred;
//! legacy algorithms are only ever advertised when explicitly enabled.

use std::str::FromStr;

use crate::{
    error::NegotiationError,
    packet::{trans::KexInit, NameList},
    Result,
};

pub(crate) trait Negociate<S = ()>: Sized + FromStr {
    const ERR: NegotiationError;

    fn field(kex: &KexInit) -> &NameList;

    /// Pick the first algorithm of the client's list that the server supports.
    fn negociate(clientkex: &KexInit, serverkex: &KexInit) -> Result<Self> {
        Ok(Self::field(clientkex)
            .preferred_in(Self::field(serverkex))
            .ok_or(Self::ERR)?
            .parse()
            .map_err(|_| Self::ERR)?)
    }
}

/// Common behavior of the algorithm catalogs.
pub trait Catalog: Sized + AsRef<str> + Clone + 'static {
    /// All the implemented algorithms, by order of preference.
    fn all() -> Vec<Self>;

    /// Whether the algorithm is part of the legacy set, disabled unless explicitly enabled.
    fn is_legacy(&self) -> bool;

    /// The algorithms enabled by default, by order of preference.
    fn defaults() -> Vec<Self> {
        Self::all()
            .into_iter()
            .filter(|algorithm| !algorithm.is_legacy())
            .collect()
    }

    /// The algorithms to advertise, by order of preference, including the legacy ones if `legacy` is set.
    fn enabled(legacy: bool) -> Vec<Self> {
        if legacy {
            Self::all()
        } else {
            Self::defaults()
        }
    }
}

mod cipher;
pub use cipher::Cipher;
pub(crate) use cipher::CipherState;

mod compress;
pub use compress::Compress;
pub(crate) use compress::CompressState;

mod hmac;
pub use hmac::Hmac;

pub mod kex;
pub use kex::Kex;

pub mod key;
pub use key::{HostKey, Key};
