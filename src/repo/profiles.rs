use std::sync::{Arc, PoisonError, RwLock};

use crate::identity::{PeerId, ProfileId};
use crate::profile::Profile;
use crate::repo::persistence::{Persistence, RepoFile};
use crate::{Error, Result};

/// Directory of every peer profile this repo knows about, in the order they
/// were first seen.
pub struct ProfileStore {
    persistence: Arc<Persistence>,
    profiles: RwLock<Vec<Profile>>,
}

impl ProfileStore {
    pub(crate) fn load(persistence: Arc<Persistence>) -> Result<Self> {
        let profiles = persistence.load_file(RepoFile::Profiles)?;
        Ok(Self {
            persistence,
            profiles: RwLock::new(profiles),
        })
    }

    /// Inserts `p`, or merges its network details into the stored profile
    /// with the same id.
    pub fn put_profile(&self, p: &Profile) -> Result<()> {
        let p = p.public();
        let mut guard = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        match next.iter_mut().find(|existing| existing.id == p.id) {
            Some(existing) => existing.merge_network(&p),
            None => next.push(p),
        }
        self.persistence.save_file(RepoFile::Profiles, &next)?;
        *guard = next;
        Ok(())
    }

    pub fn get_profile(&self, id: &ProfileId) -> Result<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| &p.id == id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    pub fn delete_profile(&self, id: &ProfileId) -> Result<()> {
        let mut guard = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let before = next.len();
        next.retain(|p| &p.id != id);
        if next.len() == before {
            return Err(Error::NotFound);
        }
        self.persistence.save_file(RepoFile::Profiles, &next)?;
        *guard = next;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Profile>> {
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    /// Network identifiers a profile has been seen under, in the order
    /// they were recorded.
    pub fn peer_ids(&self, id: &ProfileId) -> Result<Vec<PeerId>> {
        Ok(self.get_profile(id)?.peer_ids)
    }

    /// The profile a network identifier belongs to.
    pub fn profile_for_peer(&self, peer: &PeerId) -> Result<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.peer_ids.contains(peer))
            .cloned()
            .ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_keypair;
    use tempfile::tempdir;

    fn profile(name: &str) -> (Profile, PeerId) {
        let key = generate_keypair();
        let mut p = Profile::new(ProfileId::from_public_key(&key.verifying_key()), name);
        let peer = PeerId::from_public_key(&key.verifying_key());
        p.peer_ids.push(peer.clone());
        p.privkey = Some("secret".to_string());
        (p, peer)
    }

    #[test]
    fn test_put_get_list() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::load(Arc::new(Persistence::new(dir.path()).unwrap())).unwrap();
        let (alice, alice_peer) = profile("alice");
        let (bob, _) = profile("bob");
        store.put_profile(&alice).unwrap();
        store.put_profile(&bob).unwrap();

        let got = store.get_profile(&alice.id).unwrap();
        assert_eq!(got.peername, "alice");
        assert!(got.privkey.is_none());
        assert_eq!(store.peer_ids(&alice.id).unwrap(), vec![alice_peer.clone()]);
        assert_eq!(store.profile_for_peer(&alice_peer).unwrap().id, alice.id);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|p| p.peername).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_delete_and_reload() {
        let dir = tempdir().unwrap();
        let persistence = Arc::new(Persistence::new(dir.path()).unwrap());
        let store = ProfileStore::load(persistence.clone()).unwrap();
        let (alice, _) = profile("alice");
        let (bob, _) = profile("bob");
        store.put_profile(&alice).unwrap();
        store.put_profile(&bob).unwrap();
        store.delete_profile(&alice.id).unwrap();
        assert!(matches!(store.delete_profile(&alice.id), Err(Error::NotFound)));

        let reloaded = ProfileStore::load(persistence).unwrap();
        assert_eq!(reloaded.list().unwrap().len(), 1);
        assert!(matches!(reloaded.get_profile(&alice.id), Err(Error::NotFound)));
    }
}
