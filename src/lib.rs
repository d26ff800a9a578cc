//! dsrepo is a peer-to-peer dataset versioning repository.
//!
//! Dataset versions live in a content-addressed store; refs give them
//! mutable, peer-scoped names. A node serves its repo to other peers over a
//! small line protocol and to local tools over RPC.
//!
//! ## Core Components
//! - [`repo`]: the repo aggregate (refs, profiles, event log, search, graph).
//! - [`p2p`]: live peer connections and cross-peer dataset listing.
//! - [`node`]: the in-process implementation of every request trait.
//! - [`sdk`]: the remote RPC client and local/remote mode discovery.
//! - [`server`]: the RPC daemon's TCP router.

pub mod cafs;
pub mod config;
pub mod dataset;
pub mod error;
pub mod identity;
pub mod node;
pub mod p2p;
pub mod params;
pub mod profile;
pub mod repo;
pub mod sdk;
pub mod server;
pub mod wire;

use async_trait::async_trait;

pub use dataset::{Dataset, DatasetRef};
pub use error::{Error, ErrorKind, Result};
pub use identity::{PeerId, ProfileId};
pub use node::Node;
pub use profile::Profile;
pub use repo::{Event, Repo, SearchParams, SearchResults};

use params::{ConnectParams, ListParams, LogParams, PeerInfoParams, PeerRefsParams, SaveParams};

/// Stable `Component.Method` names of every RPC call.
pub mod methods {
    pub const PEERS_LIST: &str = "PeerRequests.List";
    pub const PEERS_INFO: &str = "PeerRequests.Info";
    pub const PEERS_GET_REFERENCES: &str = "PeerRequests.GetReferences";
    pub const PEERS_CONNECTED: &str = "PeerRequests.ConnectedPeers";
    pub const PEERS_CONNECTED_PROFILES: &str = "PeerRequests.ConnectedQriProfiles";
    pub const PEERS_CONNECT: &str = "PeerRequests.ConnectToPeer";
    pub const HISTORY_LOG: &str = "HistoryRequests.Log";
    pub const DATASETS_LIST: &str = "DatasetRequests.List";
    pub const DATASETS_GET: &str = "DatasetRequests.Get";
    pub const DATASETS_SAVE: &str = "DatasetRequests.Save";
    pub const DATASETS_REMOVE: &str = "DatasetRequests.Remove";
    pub const SEARCH: &str = "SearchRequests.Search";
    pub const PROFILE_GET: &str = "ProfileRequests.GetProfile";
    pub const PROFILE_SET: &str = "ProfileRequests.SetProfile";
    pub const REPO_EVENTS: &str = "RepoRequests.Events";
    pub const REPO_DANGLING: &str = "RepoRequests.DanglingRefs";
    pub const REPO_PRUNE: &str = "RepoRequests.PruneDanglingRefs";
    pub const REPO_REINDEX: &str = "RepoRequests.Reindex";
}

/// Queries about other peers.
#[async_trait]
pub trait PeerRequests: Send + Sync {
    /// Known peer profiles, excluding this node's own, up to `p.limit`.
    async fn list(&self, p: &ListParams) -> Result<Vec<Profile>>;
    /// The first known profile matching by id or peername.
    async fn info(&self, p: &PeerInfoParams) -> Result<Profile>;
    /// Asks a peer for a page of its named datasets.
    async fn get_references(&self, p: &PeerRefsParams) -> Result<Vec<DatasetRef>>;
    async fn connected_peers(&self, limit: usize) -> Result<Vec<PeerId>>;
    async fn connected_profiles(&self, limit: usize) -> Result<Vec<Profile>>;
    /// Dials a peer's p2p address and returns the profile it presented.
    async fn connect_to_peer(&self, p: &ConnectParams) -> Result<Profile>;
}

/// Dataset version history.
#[async_trait]
pub trait HistoryRequests: Send + Sync {
    async fn log(&self, p: &LogParams) -> Result<Vec<DatasetRef>>;
}

#[async_trait]
pub trait DatasetRequests: Send + Sync {
    /// This node's refs, ordered by `peername/name`.
    async fn list(&self, p: &ListParams) -> Result<Vec<DatasetRef>>;
    /// Resolves a ref and loads its dataset.
    async fn get(&self, r: &DatasetRef) -> Result<DatasetRef>;
    async fn save(&self, p: &SaveParams) -> Result<DatasetRef>;
    async fn remove(&self, r: &DatasetRef) -> Result<DatasetRef>;
}

#[async_trait]
pub trait SearchRequests: Send + Sync {
    async fn search(&self, p: &SearchParams) -> Result<SearchResults>;
}

#[async_trait]
pub trait ProfileRequests: Send + Sync {
    /// This node's own profile, without private key material.
    async fn get_profile(&self) -> Result<Profile>;
    /// Updates the editable fields of this node's profile. The id never
    /// changes.
    async fn set_profile(&self, p: &Profile) -> Result<Profile>;
}

/// Repo maintenance, run only when explicitly asked for.
#[async_trait]
pub trait RepoRequests: Send + Sync {
    /// Refstore mutations, oldest first.
    async fn events(&self, p: &ListParams) -> Result<Vec<Event>>;
    /// Refs whose content the store cannot produce.
    async fn dangling_refs(&self) -> Result<Vec<DatasetRef>>;
    /// Deletes every dangling ref and returns what was removed.
    async fn prune_dangling_refs(&self) -> Result<Vec<DatasetRef>>;
    /// Creates the search index if needed and rebuilds it from every ref.
    /// Returns how many refs were indexed.
    async fn reindex(&self) -> Result<usize>;
}

/// Every capability a node offers.
///
/// Implemented by [`Node`] in-process and by [`sdk::Client`] over RPC;
/// callers hold an `Arc<dyn Requests>` and cannot tell which.
pub trait Requests:
    PeerRequests + HistoryRequests + DatasetRequests + SearchRequests + ProfileRequests + RepoRequests
{
}

impl<T> Requests for T where
    T: PeerRequests
        + HistoryRequests
        + DatasetRequests
        + SearchRequests
        + ProfileRequests
        + RepoRequests
{
}
