//! The repo: refs, profiles, event log, search index and dataset graph over
//! one content store, persisted under a single base directory.

pub mod eventlog;
pub mod graph;
pub mod persistence;
pub mod profiles;
pub mod refstore;
pub mod search;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use ed25519_dalek::SigningKey;
use futures::future::try_join_all;
use log::{debug, info, warn};

use crate::cafs::ContentStore;
use crate::dataset::{validate_name, Dataset, DatasetRef, ME};
use crate::identity::{self, ProfileId};
use crate::profile::Profile;
use crate::{Error, Result};

pub use eventlog::{Event, EventKind, EventLog};
pub use graph::{DatasetGraph, GraphCache, GraphNode, Link, LinkKind};
pub use persistence::{Persistence, RepoFile, DATASET_ARTIFACT};
pub use profiles::ProfileStore;
pub use refstore::Refstore;
pub use search::{SearchIndex, SearchParams, SearchResults, SoftFailure};

pub struct Repo {
    store: Arc<dyn ContentStore>,
    persistence: Arc<Persistence>,
    refstore: Refstore,
    ref_cache: Refstore,
    event_log: EventLog,
    profiles: ProfileStore,
    index: RwLock<Option<SearchIndex>>,
    graph: GraphCache,
    private_key: RwLock<Option<SigningKey>>,
    profile_lock: Mutex<()>,
}

impl Repo {
    /// Opens (or creates) the repo rooted at `base` for the peer `id`.
    ///
    /// The search index is loaded before this returns. An absent or corrupt
    /// index leaves search unsupported rather than failing the open.
    pub fn open<P: AsRef<Path>>(store: Arc<dyn ContentStore>, base: P, id: ProfileId) -> Result<Self> {
        let persistence = Arc::new(Persistence::new(base)?);
        let replaced = ensure_profile(&persistence, &id)?;

        let index = match persistence.read_file::<SearchIndex>(RepoFile::SearchIndex) {
            Ok(index) => index,
            Err(e) => {
                warn!("search index unavailable: {}", e);
                None
            }
        };

        let repo = Repo {
            store,
            refstore: Refstore::load(persistence.clone(), RepoFile::Refstore)?,
            ref_cache: Refstore::load(persistence.clone(), RepoFile::RefCache)?,
            event_log: EventLog::new(persistence.filepath(RepoFile::EventLog)),
            profiles: ProfileStore::load(persistence.clone())?,
            persistence,
            index: RwLock::new(index),
            graph: GraphCache::default(),
            private_key: RwLock::new(None),
            profile_lock: Mutex::new(()),
        };

        if let Some(old) = replaced {
            match repo.profiles.delete_profile(&old) {
                Ok(()) => info!("dropped stale profile {}", old),
                Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(p) = repo.profile()? {
            repo.profiles.put_profile(&p)?;
        }
        Ok(repo)
    }

    pub fn base(&self) -> &Path {
        self.persistence.base()
    }

    /// This repo's own profile, or `None` if none has been written yet.
    pub fn profile(&self) -> Result<Option<Profile>> {
        self.persistence.read_file(RepoFile::Profile)
    }

    pub fn set_profile(&self, p: &Profile) -> Result<()> {
        let _guard = self.profile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_profile(p)
    }

    /// Reads the profile, applies `f` and writes the result. Updates run one
    /// at a time, so none is lost to a concurrent writer.
    pub fn update_profile(&self, f: impl FnOnce(&mut Profile) -> Result<()>) -> Result<Profile> {
        let _guard = self.profile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut p = self.profile()?.ok_or(Error::NotFound)?;
        f(&mut p)?;
        self.write_profile(&p)?;
        Ok(p)
    }

    fn write_profile(&self, p: &Profile) -> Result<()> {
        self.persistence.save_file(RepoFile::Profile, p)?;
        self.profiles.put_profile(p)
    }

    /// The local peername, used when a ref names the peer as `me` or not at all.
    fn peername(&self) -> Result<String> {
        Ok(self.profile()?.map(|p| p.peername).unwrap_or_default())
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn store(&self) -> Arc<dyn ContentStore> {
        self.store.clone()
    }

    pub fn ref_cache(&self) -> &Refstore {
        &self.ref_cache
    }

    pub fn set_private_key(&self, key: SigningKey) {
        *self.private_key.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
    }

    pub fn private_key(&self) -> Option<SigningKey> {
        self.private_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn put_ref(&self, r: DatasetRef) -> Result<()> {
        let previous = self.refstore.put_ref(r.clone())?;
        let kind = if previous.is_some() {
            EventKind::RefUpdated
        } else {
            EventKind::RefCreated
        };
        self.event_log.append(kind, &r)?;
        self.update_index(|index| index.index(&r, r.dataset.as_deref()));
        Ok(())
    }

    pub fn get_ref(&self, r: &DatasetRef) -> Result<DatasetRef> {
        self.refstore.get_ref(r)
    }

    pub fn delete_ref(&self, r: &DatasetRef) -> Result<DatasetRef> {
        let removed = self.refstore.delete_ref(r)?;
        self.event_log.append(EventKind::RefRemoved, &removed)?;
        self.update_index(|index| index.remove(&removed.key()));
        Ok(removed)
    }

    /// Moves every ref under peername `from` to `to`, as when the local peer
    /// is renamed. The move is one refstore commit. Returns how many refs
    /// moved.
    pub fn rename_peer_refs(&self, from: &str, to: &str) -> Result<usize> {
        let moved = self.refstore.rename_peer(from, to)?;
        for (old, new) in &moved {
            self.event_log.append(EventKind::RefRemoved, old)?;
            self.event_log.append(EventKind::RefCreated, new)?;
        }
        self.update_index(|index| {
            for (old, new) in &moved {
                index.rekey(old, new);
            }
        });
        Ok(moved.len())
    }

    pub fn refs(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>> {
        self.refstore.refs(limit, offset)
    }

    pub fn ref_count(&self) -> usize {
        self.refstore.ref_count()
    }

    pub fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>> {
        self.event_log.events(limit, offset)
    }

    /// Fills in a ref's missing path (or names, for a bare path) from the
    /// refstore, then checks the content is retrievable.
    pub async fn resolve_ref(&self, r: &mut DatasetRef) -> Result<()> {
        if r.peername == ME || (r.peername.is_empty() && r.has_name()) {
            r.peername = self.peername()?;
        }

        if r.has_name() {
            let got = self.refstore.get_ref(r)?;
            if r.path.is_empty() {
                r.path = got.path;
            }
            r.profile_id = got.profile_id;
        } else if r.path.is_empty() {
            return Err(Error::InvalidInput("name of dataset or path needed".to_string()));
        } else if let Ok(got) = self.refstore.get_ref(r) {
            r.peername = got.peername;
            r.name = got.name;
            r.profile_id = got.profile_id;
        }

        if !self.store.has(&r.path).await? {
            return Err(Error::DanglingRef(r.to_string()));
        }
        Ok(())
    }

    pub async fn load_dataset(&self, path: &str) -> Result<Dataset> {
        let data = self.store.get(path).await?;
        serde_json::from_slice(&data).map_err(|source| Error::Corrupt {
            artifact: DATASET_ARTIFACT,
            source,
        })
    }

    /// Writes `dataset` to the content store and points the local peer's
    /// `name` at it. An existing ref under that name becomes the new
    /// version's previous path.
    pub async fn save_dataset(&self, name: &str, mut dataset: Dataset) -> Result<DatasetRef> {
        validate_name(name)?;
        let peer = self
            .profile()?
            .ok_or_else(|| Error::Internal("repo has no profile".to_string()))?;

        let mut r = DatasetRef::new(peer.peername.clone(), name);
        r.profile_id = Some(peer.id.clone());
        if dataset.previous_path.is_empty() {
            if let Ok(prev) = self.refstore.get_ref(&r) {
                dataset.previous_path = prev.path;
            }
        }
        if dataset.timestamp.is_none() {
            dataset.timestamp = Some(Utc::now());
        }

        r.path = self.store.put(serde_json::to_vec(&dataset)?).await?;
        r.dataset = Some(Box::new(dataset));
        self.put_ref(r.clone())?;
        info!("saved {}", r);
        Ok(r)
    }

    /// Prior versions of a dataset, newest first, following previous paths.
    pub async fn log(&self, r: &DatasetRef, limit: usize, offset: usize) -> Result<Vec<DatasetRef>> {
        if !r.has_name() && r.path.is_empty() {
            return Err(Error::InvalidInput("name of dataset or path needed".to_string()));
        }
        let mut head = r.clone();
        self.resolve_ref(&mut head).await?;

        let mut versions = Vec::new();
        let mut next = head.path.clone();
        while !next.is_empty() && versions.len() < offset.saturating_add(limit) {
            let ds = self.load_dataset(&next).await?;
            let prev = ds.previous_path.clone();
            versions.push(DatasetRef {
                peername: head.peername.clone(),
                name: head.name.clone(),
                path: next,
                profile_id: head.profile_id.clone(),
                dataset: Some(Box::new(ds)),
            });
            next = prev;
        }
        Ok(versions.into_iter().skip(offset).collect())
    }

    /// The dataset graph, computed on first use and cached until
    /// [`invalidate_graph`](Self::invalidate_graph).
    pub async fn graph(&self) -> Result<Arc<DatasetGraph>> {
        let refstore = &self.refstore;
        let store = self.store.clone();
        self.graph
            .get_or_compute(move || async move {
                let refs = refstore.refs(usize::MAX, 0)?;
                graph::build(&refs, store.as_ref()).await.map_err(|e| {
                    debug!("building graph: {}", e);
                    e
                })
            })
            .await
    }

    pub async fn invalidate_graph(&self) {
        self.graph.invalidate().await;
    }

    #[cfg(test)]
    pub(crate) fn graph_computations(&self) -> usize {
        self.graph.computations()
    }

    /// Queries the search index. Paths are refreshed from the refstore and
    /// each match's dataset is loaded; a failed load is recorded in
    /// `failures` and the ref is still returned.
    pub async fn search(&self, p: &SearchParams) -> Result<SearchResults> {
        let matches = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index.as_ref().ok_or(Error::SearchUnsupported)?.search(p)
        };

        let mut results = SearchResults::default();
        for mut r in matches {
            match self.refstore.get_ref(&r) {
                Ok(got) => r.path = got.path,
                Err(e) => debug!("search hit {} is not in the refstore: {}", r, e),
            }

            if r.path.is_empty() {
                results.failures.push(SoftFailure {
                    dataset_ref: r.clone(),
                    error: "ref has no path".to_string(),
                });
            } else {
                match self.load_dataset(&r.path).await {
                    Ok(ds) => r.dataset = Some(Box::new(ds)),
                    Err(e) => {
                        warn!("reading dataset {} for search: {}", r, e);
                        results.failures.push(SoftFailure {
                            dataset_ref: r.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            results.refs.push(r);
        }
        Ok(results)
    }

    pub fn has_search_index(&self) -> bool {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Rebuilds the search index from every ref, reading metadata from
    /// `store`. Returns how many refs were indexed.
    pub async fn update_search_index(&self, store: &dyn ContentStore) -> Result<usize> {
        if !self.has_search_index() {
            return Err(Error::SearchUnsupported);
        }

        let mut fresh = SearchIndex::new();
        for r in self.refstore.refs(usize::MAX, 0)? {
            let dataset = match store.get(&r.path).await {
                Ok(data) => serde_json::from_slice::<Dataset>(&data).ok(),
                Err(e) => {
                    warn!("indexing {} without metadata: {}", r, e);
                    None
                }
            };
            fresh.index(&r, dataset.as_ref());
        }

        let indexed = fresh.len();
        let mut guard = self.index.write().unwrap_or_else(PoisonError::into_inner);
        self.persistence.save_file(RepoFile::SearchIndex, &fresh)?;
        *guard = Some(fresh);
        info!("search index rebuilt with {} refs", indexed);
        Ok(indexed)
    }

    /// Creates a search index if none exists, then fills it. Returns how many
    /// refs were indexed.
    pub async fn enable_search(&self) -> Result<usize> {
        {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            if index.is_none() {
                *index = Some(SearchIndex::new());
            }
        }
        let store = self.store.clone();
        self.update_search_index(store.as_ref()).await
    }

    /// Refs whose content the store cannot produce.
    pub async fn dangling_refs(&self) -> Result<Vec<DatasetRef>> {
        let refs = self.refstore.refs(usize::MAX, 0)?;
        let present = try_join_all(refs.iter().map(|r| self.store.has(&r.path))).await?;
        Ok(refs
            .into_iter()
            .zip(present)
            .filter(|(_, has)| !has)
            .map(|(r, _)| r)
            .collect())
    }

    /// Deletes every dangling ref, returning what was removed.
    pub async fn prune_dangling_refs(&self) -> Result<Vec<DatasetRef>> {
        let dangling = self.dangling_refs().await?;
        for r in &dangling {
            self.delete_ref(r)?;
            info!("pruned dangling ref {}", r);
        }
        Ok(dangling)
    }

    /// Irreversibly removes all persisted repo state.
    pub fn destroy(&self) -> Result<()> {
        self.persistence.destroy()
    }

    fn update_index(&self, f: impl FnOnce(&mut SearchIndex)) {
        let mut guard = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = guard.as_mut() {
            f(index);
            if let Err(e) = self.persistence.save_file(RepoFile::SearchIndex, index) {
                warn!("saving search index: {}", e);
            }
        }
    }
}

/// Makes sure a profile file exists for `id`, correcting a stored profile
/// whose id no longer matches the node's key. Returns the id it replaced.
pub(crate) fn ensure_profile(persistence: &Persistence, id: &ProfileId) -> Result<Option<ProfileId>> {
    let stored: Option<Profile> = persistence.read_file(RepoFile::Profile)?;
    match stored {
        None => {
            persistence.save_file(
                RepoFile::Profile,
                &Profile::new(id.clone(), identity::nickname(id.as_str())),
            )?;
            Ok(None)
        }
        Some(mut p) if &p.id != id => {
            info!("correcting profile id {} -> {}", p.id, id);
            let old = std::mem::replace(&mut p.id, id.clone());
            if p.peername.is_empty() {
                p.peername = identity::nickname(id.as_str());
            }
            p.updated = Some(Utc::now());
            persistence.save_file(RepoFile::Profile, &p)?;
            Ok(Some(old))
        }
        Some(_) => Ok(None),
    }
}
