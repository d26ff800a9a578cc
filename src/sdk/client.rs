use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::dataset::DatasetRef;
use crate::identity::PeerId;
use crate::methods;
use crate::params::{ConnectParams, ListParams, LogParams, PeerInfoParams, PeerRefsParams, SaveParams};
use crate::profile::Profile;
use crate::repo::{Event, SearchParams, SearchResults};
use crate::wire::{parse_response, LineConn};
use crate::{
    DatasetRequests, Error, HistoryRequests, PeerRequests, ProfileRequests, RepoRequests, Result,
    SearchRequests,
};

/// Forwards every request to a daemon over RPC.
///
/// A dropped connection is re-dialed on the next call. A call that failed in
/// transit is never resent.
pub struct Client {
    addr: String,
    conn: Mutex<Option<LineConn>>,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self> {
        let conn = LineConn::connect(addr).await?;
        Ok(Self {
            addr: addr.to_string(),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn ping(&self) -> Result<()> {
        match self.send_and_receive("PING").await?.trim() {
            "PONG" => Ok(()),
            other => Err(Error::Network(format!("unexpected ping reply {:?}", other))),
        }
    }

    /// Invokes `method` with `params` on the daemon.
    pub async fn call<P: Serialize + ?Sized, R: DeserializeOwned>(&self, method: &str, params: &P) -> Result<R> {
        let line = format!("CALL {} {}", method, serde_json::to_string(params)?);
        let resp = self.send_and_receive(&line).await?;
        parse_response(&resp)
    }

    async fn send_and_receive(&self, line: &str) -> Result<String> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(LineConn::connect(&self.addr).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(Error::Internal("rpc connection unavailable".to_string()));
        };
        match conn.round_trip(line).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PeerRequests for Client {
    async fn list(&self, p: &ListParams) -> Result<Vec<Profile>> {
        self.call(methods::PEERS_LIST, p).await
    }

    async fn info(&self, p: &PeerInfoParams) -> Result<Profile> {
        self.call(methods::PEERS_INFO, p).await
    }

    async fn get_references(&self, p: &PeerRefsParams) -> Result<Vec<DatasetRef>> {
        self.call(methods::PEERS_GET_REFERENCES, p).await
    }

    async fn connected_peers(&self, limit: usize) -> Result<Vec<PeerId>> {
        self.call(methods::PEERS_CONNECTED, &limit).await
    }

    async fn connected_profiles(&self, limit: usize) -> Result<Vec<Profile>> {
        self.call(methods::PEERS_CONNECTED_PROFILES, &limit).await
    }

    async fn connect_to_peer(&self, p: &ConnectParams) -> Result<Profile> {
        self.call(methods::PEERS_CONNECT, p).await
    }
}

#[async_trait]
impl HistoryRequests for Client {
    async fn log(&self, p: &LogParams) -> Result<Vec<DatasetRef>> {
        self.call(methods::HISTORY_LOG, p).await
    }
}

#[async_trait]
impl DatasetRequests for Client {
    async fn list(&self, p: &ListParams) -> Result<Vec<DatasetRef>> {
        self.call(methods::DATASETS_LIST, p).await
    }

    async fn get(&self, r: &DatasetRef) -> Result<DatasetRef> {
        self.call(methods::DATASETS_GET, r).await
    }

    async fn save(&self, p: &SaveParams) -> Result<DatasetRef> {
        self.call(methods::DATASETS_SAVE, p).await
    }

    async fn remove(&self, r: &DatasetRef) -> Result<DatasetRef> {
        self.call(methods::DATASETS_REMOVE, r).await
    }
}

#[async_trait]
impl SearchRequests for Client {
    async fn search(&self, p: &SearchParams) -> Result<SearchResults> {
        self.call(methods::SEARCH, p).await
    }
}

#[async_trait]
impl ProfileRequests for Client {
    async fn get_profile(&self) -> Result<Profile> {
        self.call(methods::PROFILE_GET, &()).await
    }

    async fn set_profile(&self, p: &Profile) -> Result<Profile> {
        self.call(methods::PROFILE_SET, p).await
    }
}

#[async_trait]
impl RepoRequests for Client {
    async fn events(&self, p: &ListParams) -> Result<Vec<Event>> {
        self.call(methods::REPO_EVENTS, p).await
    }

    async fn dangling_refs(&self) -> Result<Vec<DatasetRef>> {
        self.call(methods::REPO_DANGLING, &()).await
    }

    async fn prune_dangling_refs(&self) -> Result<Vec<DatasetRef>> {
        self.call(methods::REPO_PRUNE, &()).await
    }

    async fn reindex(&self) -> Result<usize> {
        self.call(methods::REPO_REINDEX, &()).await
    }
}
