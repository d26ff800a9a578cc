//! The in-process implementation of every request trait.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::info;

use crate::cafs::FileStore;
use crate::config::Config;
use crate::dataset::{validate_name, DatasetRef, ME};
use crate::identity::{PeerId, ProfileId};
use crate::p2p::PeerNetwork;
use crate::params::{
    ConnectParams, DatasetsListParams, ListParams, LogParams, PeerInfoParams, PeerRefsParams,
    SaveParams,
};
use crate::profile::Profile;
use crate::repo::{Event, Repo, SearchParams, SearchResults};
use crate::{
    DatasetRequests, Error, HistoryRequests, PeerRequests, ProfileRequests, RepoRequests, Result,
    SearchRequests,
};

/// A repo and the peer network serving it.
pub struct Node {
    repo: Arc<Repo>,
    network: Arc<PeerNetwork>,
}

impl Node {
    pub fn new(repo: Arc<Repo>, network: Arc<PeerNetwork>) -> Self {
        Self { repo, network }
    }

    /// Opens the repo under `base` with a file-backed content store, using
    /// the identity from `config`. The network starts offline.
    ///
    /// With search enabled, a repo that has no index gets one built here.
    pub async fn open<P: AsRef<Path>>(base: P, config: &Config) -> Result<Self> {
        let base = base.as_ref();
        let key = config.profile.decode_private_key()?;
        let id = ProfileId::from_public_key(&key.verifying_key());
        let peer_id = PeerId::from_public_key(&key.verifying_key());

        let store = Arc::new(FileStore::new(base.join("store"))?);
        let repo = Arc::new(Repo::open(store, base, id)?);
        repo.set_private_key(key);
        info!("opened repo at {} ({} refs)", base.display(), repo.ref_count());
        if config.search.enabled && !repo.has_search_index() {
            repo.enable_search().await?;
        }

        let network = Arc::new(PeerNetwork::new(repo.clone(), peer_id));
        Ok(Self::new(repo, network))
    }

    pub fn repo(&self) -> &Arc<Repo> {
        &self.repo
    }

    pub fn network(&self) -> &Arc<PeerNetwork> {
        &self.network
    }

    fn own_profile(&self) -> Result<Profile> {
        self.repo.profile()?.ok_or(Error::NotFound)
    }

    /// Replaces `me` or a missing peername with the local one.
    fn localize(&self, r: &DatasetRef) -> Result<DatasetRef> {
        let mut r = r.clone();
        if r.peername == ME || (r.peername.is_empty() && r.has_name()) {
            r.peername = self.own_profile()?.peername;
        }
        Ok(r)
    }
}

#[async_trait]
impl PeerRequests for Node {
    async fn list(&self, p: &ListParams) -> Result<Vec<Profile>> {
        let me = self.own_profile()?.id;
        let mut peers = Vec::new();
        for profile in self.repo.profiles().list()?.into_iter().filter(|pro| pro.id != me).skip(p.offset) {
            if peers.len() >= p.limit {
                break;
            }
            peers.push(profile.public());
        }
        Ok(peers)
    }

    async fn info(&self, p: &PeerInfoParams) -> Result<Profile> {
        if p.peername.is_empty() && p.profile_id.is_none() {
            return Err(Error::InvalidInput("peername or profile id required".to_string()));
        }
        self.repo
            .profiles()
            .list()?
            .into_iter()
            .find(|pro| {
                p.profile_id.as_ref() == Some(&pro.id)
                    || (!p.peername.is_empty() && pro.peername == p.peername)
            })
            .map(|pro| pro.public())
            .ok_or(Error::NotFound)
    }

    async fn get_references(&self, p: &PeerRefsParams) -> Result<Vec<DatasetRef>> {
        let peer = PeerId::decode(&p.peer_id)?;
        self.network
            .request_datasets_list(
                &peer,
                DatasetsListParams {
                    limit: p.limit,
                    offset: p.offset,
                },
            )
            .await
    }

    async fn connected_peers(&self, limit: usize) -> Result<Vec<PeerId>> {
        self.network.drop_closed().await;
        Ok(self.network.connected_peers().into_iter().take(limit).collect())
    }

    async fn connected_profiles(&self, limit: usize) -> Result<Vec<Profile>> {
        self.network.drop_closed().await;
        Ok(self.network.connected_profiles().into_iter().take(limit).collect())
    }

    async fn connect_to_peer(&self, p: &ConnectParams) -> Result<Profile> {
        if p.address.is_empty() {
            return Err(Error::InvalidInput("peer address required".to_string()));
        }
        self.network.connect(&p.address).await
    }
}

#[async_trait]
impl HistoryRequests for Node {
    async fn log(&self, p: &LogParams) -> Result<Vec<DatasetRef>> {
        let r = &p.dataset_ref;
        if !r.has_name() && r.path.is_empty() {
            return Err(Error::InvalidInput("name of dataset or path needed".to_string()));
        }
        self.repo.log(r, p.list.limit, p.list.offset).await
    }
}

#[async_trait]
impl DatasetRequests for Node {
    async fn list(&self, p: &ListParams) -> Result<Vec<DatasetRef>> {
        if p.peername.is_empty() {
            return self.repo.refs(p.limit, p.offset);
        }
        let peername = if p.peername == ME {
            self.own_profile()?.peername
        } else {
            p.peername.clone()
        };
        Ok(self
            .repo
            .refs(usize::MAX, 0)?
            .into_iter()
            .filter(|r| r.peername == peername)
            .skip(p.offset)
            .take(p.limit)
            .collect())
    }

    async fn get(&self, r: &DatasetRef) -> Result<DatasetRef> {
        let mut r = r.clone();
        self.repo.resolve_ref(&mut r).await?;
        let dataset = self.repo.load_dataset(&r.path).await?;
        r.dataset = Some(Box::new(dataset));
        Ok(r)
    }

    async fn save(&self, p: &SaveParams) -> Result<DatasetRef> {
        self.repo.save_dataset(&p.name, p.dataset.clone()).await
    }

    async fn remove(&self, r: &DatasetRef) -> Result<DatasetRef> {
        if !r.has_name() && r.path.is_empty() {
            return Err(Error::InvalidInput("name of dataset or path needed".to_string()));
        }
        self.repo.delete_ref(&self.localize(r)?)
    }
}

#[async_trait]
impl SearchRequests for Node {
    async fn search(&self, p: &SearchParams) -> Result<SearchResults> {
        self.repo.search(p).await
    }
}

#[async_trait]
impl ProfileRequests for Node {
    async fn get_profile(&self) -> Result<Profile> {
        Ok(self.own_profile()?.public())
    }

    async fn set_profile(&self, p: &Profile) -> Result<Profile> {
        let updated = self.repo.update_profile(|current| {
            if !p.peername.is_empty() && p.peername != current.peername {
                validate_name(&p.peername)?;
                let moved = self.repo.rename_peer_refs(&current.peername, &p.peername)?;
                info!("renamed {} -> {} ({} refs)", current.peername, p.peername, moved);
                current.peername = p.peername.clone();
            }
            for addr in &p.addresses {
                if !current.addresses.contains(addr) {
                    current.addresses.push(addr.clone());
                }
            }
            current.updated = Some(Utc::now());
            Ok(())
        })?;
        Ok(updated.public())
    }
}

#[async_trait]
impl RepoRequests for Node {
    async fn events(&self, p: &ListParams) -> Result<Vec<Event>> {
        self.repo.events(p.limit, p.offset)
    }

    async fn dangling_refs(&self) -> Result<Vec<DatasetRef>> {
        self.repo.dangling_refs().await
    }

    async fn prune_dangling_refs(&self) -> Result<Vec<DatasetRef>> {
        let pruned = self.repo.prune_dangling_refs().await?;
        if !pruned.is_empty() {
            self.repo.invalidate_graph().await;
        }
        Ok(pruned)
    }

    async fn reindex(&self) -> Result<usize> {
        self.repo.enable_search().await
    }
}
