use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{PeerId, ProfileId};

/// The identity record of a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    /// Human nickname. Not guaranteed to be unique across the network.
    #[serde(default)]
    pub peername: String,
    /// Base64 private key material. Only ever set for the local peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey: Option<String>,
    /// Network identifiers this profile has been seen under.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_ids: Vec<PeerId>,
    /// Dialable listen addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(id: ProfileId, peername: impl Into<String>) -> Self {
        let now = Utc::now();
        Profile {
            id,
            peername: peername.into(),
            privkey: None,
            peer_ids: Vec::new(),
            addresses: Vec::new(),
            created: Some(now),
            updated: Some(now),
        }
    }

    /// A copy safe to hand to other peers.
    pub fn public(&self) -> Profile {
        Profile {
            privkey: None,
            ..self.clone()
        }
    }

    /// Folds network details learned from `other` into this profile.
    pub(crate) fn merge_network(&mut self, other: &Profile) {
        for id in &other.peer_ids {
            if !self.peer_ids.contains(id) {
                self.peer_ids.push(id.clone());
            }
        }
        for addr in &other.addresses {
            if !self.addresses.contains(addr) {
                self.addresses.push(addr.clone());
            }
        }
        if !other.peername.is_empty() {
            self.peername = other.peername.clone();
        }
        self.updated = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_keypair;

    #[test]
    fn test_public_strips_private_key() {
        let key = generate_keypair();
        let mut p = Profile::new(ProfileId::from_public_key(&key.verifying_key()), "alice");
        p.privkey = Some("secret".to_string());
        let public = p.public();
        assert!(public.privkey.is_none());
        assert!(!serde_json::to_string(&public).unwrap().contains("privkey"));
    }

    #[test]
    fn test_merge_network_dedups() {
        let key = generate_keypair();
        let id = ProfileId::from_public_key(&key.verifying_key());
        let peer = PeerId::from_public_key(&key.verifying_key());

        let mut p = Profile::new(id.clone(), "");
        let mut seen = Profile::new(id, "bob");
        seen.peer_ids = vec![peer.clone()];
        seen.addresses = vec!["127.0.0.1:2505".to_string()];

        p.merge_network(&seen);
        p.merge_network(&seen);
        assert_eq!(p.peer_ids, vec![peer]);
        assert_eq!(p.addresses.len(), 1);
        assert_eq!(p.peername, "bob");
    }
}
