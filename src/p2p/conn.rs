use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::identity::PeerId;
use crate::profile::Profile;
use crate::wire::LineConn;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote peer dialed us.
    Inbound,
    /// We dialed the remote peer.
    Outbound,
}

const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// A live, handshaken connection to a remote peer.
///
/// Only outbound connections carry a request stream; inbound ones are served
/// by the listener task that accepted them.
pub struct Connection {
    id: u64,
    peer_id: PeerId,
    profile: Profile,
    remote_addr: String,
    direction: Direction,
    stream: Option<Mutex<LineConn>>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        peer_id: PeerId,
        profile: Profile,
        remote_addr: String,
        direction: Direction,
        stream: Option<LineConn>,
    ) -> Self {
        Self {
            id,
            peer_id,
            profile,
            remote_addr,
            direction,
            stream: stream.map(Mutex::new),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The profile the remote presented during the handshake.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_outbound(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) async fn call<P: Serialize, R: DeserializeOwned>(&self, command: &str, params: &P) -> Result<R> {
        let stream = self.stream.as_ref().ok_or_else(|| {
            Error::Network(format!("connection {} to {} is inbound only", self.id, self.peer_id))
        })?;
        stream.lock().await.call(command, params).await
    }

    /// Checks that the remote still answers on an outbound stream. Inbound
    /// connections are closed by their serving task and always report alive.
    pub(crate) async fn is_alive(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return true;
        };
        let mut stream = stream.lock().await;
        match timeout(PING_TIMEOUT, stream.round_trip("PING")).await {
            Ok(Ok(resp)) => resp.trim() == "PONG",
            _ => false,
        }
    }
}
