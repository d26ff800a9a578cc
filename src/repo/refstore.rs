use std::sync::{Arc, PoisonError, RwLock};

use crate::dataset::DatasetRef;
use crate::repo::persistence::{Persistence, RepoFile};
use crate::{Error, Result};

/// Persisted set of dataset refs, unique by `peername/name`.
///
/// The whole set lives in memory behind a lock and is written through to disk
/// on every mutation while the write lock is held, so readers only ever see
/// committed states and writers to one key serialize with the last one winning.
pub struct Refstore {
    persistence: Arc<Persistence>,
    file: RepoFile,
    refs: RwLock<Vec<DatasetRef>>,
}

impl Refstore {
    pub(crate) fn load(persistence: Arc<Persistence>, file: RepoFile) -> Result<Self> {
        let mut refs: Vec<DatasetRef> = persistence.load_file(file)?;
        refs.sort_by_key(|r| r.key());
        Ok(Self {
            persistence,
            file,
            refs: RwLock::new(refs),
        })
    }

    /// Commits `r`, returning the ref it replaced if the name already existed.
    pub fn put_ref(&self, r: DatasetRef) -> Result<Option<DatasetRef>> {
        if r.peername.is_empty() || r.name.is_empty() {
            return Err(Error::InvalidInput(
                "ref must have both a peername and a name".to_string(),
            ));
        }
        if r.path.is_empty() {
            return Err(Error::InvalidInput(format!("ref {} has no path", r.key())));
        }

        let r = r.bare();
        let key = r.key();
        self.mutate(|refs| match refs.binary_search_by(|probe| probe.key().cmp(&key)) {
            Ok(i) => Ok(Some(std::mem::replace(&mut refs[i], r))),
            Err(i) => {
                refs.insert(i, r);
                Ok(None)
            }
        })
    }

    /// Looks a ref up by name, or by path when the ref carries no name.
    pub fn get_ref(&self, r: &DatasetRef) -> Result<DatasetRef> {
        let refs = self.refs.read().unwrap_or_else(PoisonError::into_inner);
        if r.has_name() {
            let key = r.key();
            return refs
                .binary_search_by(|probe| probe.key().cmp(&key))
                .map(|i| refs[i].clone())
                .map_err(|_| Error::NotFound);
        }
        if r.path.is_empty() {
            return Err(Error::NotFound);
        }
        refs.iter()
            .find(|got| got.path == r.path)
            .cloned()
            .ok_or(Error::NotFound)
    }

    pub fn delete_ref(&self, r: &DatasetRef) -> Result<DatasetRef> {
        let found = self.get_ref(r)?;
        let key = found.key();
        self.mutate(|refs| {
            let i = refs
                .binary_search_by(|probe| probe.key().cmp(&key))
                .map_err(|_| Error::NotFound)?;
            Ok(refs.remove(i))
        })
    }

    pub fn refs(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>> {
        let refs = self.refs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(refs.iter().skip(offset).take(limit).cloned().collect())
    }

    /// Every ref belonging to `peername`.
    pub fn peer_refs(&self, peername: &str) -> Vec<DatasetRef> {
        let refs = self.refs.read().unwrap_or_else(PoisonError::into_inner);
        refs.iter().filter(|r| r.peername == peername).cloned().collect()
    }

    pub fn ref_count(&self) -> usize {
        self.refs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Commits a batch of refs in one write, skipping unnamed or unresolved ones.
    pub fn put_refs(&self, batch: &[DatasetRef]) -> Result<()> {
        self.mutate(|refs| {
            for r in batch {
                if r.peername.is_empty() || r.name.is_empty() || r.path.is_empty() {
                    continue;
                }
                let r = r.bare();
                let key = r.key();
                match refs.binary_search_by(|probe| probe.key().cmp(&key)) {
                    Ok(i) => refs[i] = r,
                    Err(i) => refs.insert(i, r),
                }
            }
            Ok(())
        })
    }

    /// Moves every ref under `from` to peername `to` in one commit. A ref
    /// already stored under the new name is replaced. Returns each moved ref
    /// as `(old, new)`.
    pub fn rename_peer(&self, from: &str, to: &str) -> Result<Vec<(DatasetRef, DatasetRef)>> {
        if to.is_empty() {
            return Err(Error::InvalidInput("new peername is empty".to_string()));
        }
        self.mutate(|refs| {
            let (moving, mut kept): (Vec<DatasetRef>, Vec<DatasetRef>) =
                refs.drain(..).partition(|r| r.peername == from);
            let mut moved = Vec::with_capacity(moving.len());
            for old in moving {
                let mut r = old.clone();
                r.peername = to.to_string();
                let key = r.key();
                match kept.binary_search_by(|probe| probe.key().cmp(&key)) {
                    Ok(i) => kept[i] = r.clone(),
                    Err(i) => kept.insert(i, r.clone()),
                }
                moved.push((old, r));
            }
            *refs = kept;
            Ok(moved)
        })
    }

    /// Drops every ref.
    pub fn clear(&self) -> Result<()> {
        self.mutate(|refs| {
            refs.clear();
            Ok(())
        })
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<DatasetRef>) -> Result<T>) -> Result<T> {
        let mut guard = self.refs.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persistence.save_file(self.file, &next)?;
        *guard = next;
        Ok(out)
    }
}
