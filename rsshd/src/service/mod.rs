//! Service handling facilities on [`Session`](crate::session::Session).

mod handler;
pub use handler::{handle, Handler};
