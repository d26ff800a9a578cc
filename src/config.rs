//! Node configuration, persisted as `config.json` in the repo directory.

use std::path::Path;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::identity::{self, PeerId, ProfileId};
use crate::repo::persistence::{load_json, save_json, RepoFile};
use crate::Result;

pub const DEFAULT_RPC_PORT: u16 = 2504;
pub const DEFAULT_P2P_PORT: u16 = 2505;

/// Identity section of the config: the local peer's key material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub peername: String,
    /// Base64 ed25519 private key.
    #[serde(default)]
    pub privkey: String,
}

impl ProfileConfig {
    /// Generates a profile with a fresh key pair, its derived id and nickname.
    pub fn default_profile() -> Self {
        let key = identity::generate_keypair();
        let id = ProfileId::from_public_key(&key.verifying_key());
        ProfileConfig {
            peername: identity::nickname(id.as_str()),
            id: id.to_string(),
            privkey: identity::encode_private_key(&key),
        }
    }

    pub fn decode_private_key(&self) -> Result<SigningKey> {
        identity::decode_private_key(&self.privkey)
    }

    /// The profile id, always derived from the key rather than the stored
    /// `id` field.
    pub fn profile_id(&self) -> Result<ProfileId> {
        let key = self.decode_private_key()?;
        Ok(ProfileId::from_public_key(&key.verifying_key()))
    }

    pub fn peer_id(&self) -> Result<PeerId> {
        let key = self.decode_private_key()?;
        Ok(PeerId::from_public_key(&key.verifying_key()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_P2P_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// Whether the node keeps a search index. When enabled and no index exists,
/// opening the node builds one from the refstore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub enabled: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub profile: ProfileConfig,
    #[serde(default)]
    pub p2p: P2pConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// A config with a freshly generated identity.
    pub fn default_config() -> Self {
        Config {
            profile: ProfileConfig::default_profile(),
            p2p: P2pConfig::default(),
            rpc: RpcConfig::default(),
            search: SearchConfig::default(),
        }
    }

    /// Loads `config.json` from `repo_dir`, writing a default one first if
    /// none exists.
    pub fn load_or_init<P: AsRef<Path>>(repo_dir: P) -> Result<Self> {
        let dir = repo_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(RepoFile::Config.filename());
        if let Some(cfg) = load_json::<Config>(&path, RepoFile::Config.artifact())? {
            return Ok(cfg);
        }
        let cfg = Config::default_config();
        log::info!("wrote new config with profile id {}", cfg.profile.id);
        save_json(&path, &cfg)?;
        Ok(cfg)
    }

    pub fn save<P: AsRef<Path>>(&self, repo_dir: P) -> Result<()> {
        save_json(&repo_dir.as_ref().join(RepoFile::Config.filename()), self)
    }
}
