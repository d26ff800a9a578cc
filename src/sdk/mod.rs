//! Client side of the request traits: a remote RPC [`Client`] and
//! [`new`], which decides once whether to use it or open the repo locally.
pub mod client;
pub mod discovery;

pub use client::Client;
pub use discovery::{local, new};
