#![doc = concat!(
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![crates.io](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
#![warn(missing_docs, clippy::unwrap_used, clippy::panic, clippy::todo)]
#![forbid(unsafe_code)]

const SERVICE_NAME: &str = "ssh-userauth";
const CONNECTION_SERVICE_NAME: &str = "ssh-connection";

mod error;
pub use error::{Error, Result};

mod methods;
pub use methods::Method;

mod principal;
pub use principal::{Principal, Restrictions};

pub mod authorized_keys;
pub use authorized_keys::AuthorizedKeys;

pub mod handler;
pub use handler::Auth;
