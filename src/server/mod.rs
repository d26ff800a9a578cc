//! RPC daemon side: the [`Router`] accepts TCP connections and dispatches
//! `CALL Component.Method <json>` lines to a [`Requests`](crate::Requests)
//! implementation.
pub mod router;

pub use router::{dispatch, handle_connection, Router};
