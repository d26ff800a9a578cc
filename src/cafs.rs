//! Content-addressed byte storage.
//!
//! Addresses look like `/map/Qm...`: the base58 sha2-256 multihash of the
//! stored bytes behind a fixed prefix. Every `get` re-hashes what it returns.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::identity::{decode_multihash, sha2_multihash};
use crate::{Error, Result};

pub const PATH_PREFIX: &str = "/map/";

/// Opaque content-addressed blob store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `data` and returns its address.
    async fn put(&self, data: Vec<u8>) -> Result<String>;
    /// Returns the bytes stored at `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
    async fn has(&self, path: &str) -> Result<bool>;
}

/// Computes the address `data` would be stored under.
pub fn address(data: &[u8]) -> String {
    format!("{}{}", PATH_PREFIX, bs58::encode(sha2_multihash(data)).into_string())
}

/// Validates `path` and returns its multihash bytes.
pub fn parse_address(path: &str) -> Result<Vec<u8>> {
    let encoded = path
        .strip_prefix(PATH_PREFIX)
        .ok_or_else(|| Error::InvalidPath(format!("{:?} lacks the {} prefix", path, PATH_PREFIX)))?;
    decode_multihash(encoded).map_err(Error::InvalidPath)
}

fn verify(path: &str, data: &[u8]) -> Result<()> {
    if address(data) != path {
        return Err(Error::Integrity(path.to_string()));
    }
    Ok(())
}

/// In-memory store, mostly for tests and throwaway nodes.
#[derive(Default)]
pub struct MapStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops an object, leaving any ref that names it dangling.
    pub fn remove(&self, path: &str) -> bool {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }
}

#[async_trait]
impl ContentStore for MapStore {
    async fn put(&self, data: Vec<u8>) -> Result<String> {
        let path = address(&data);
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), data);
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        parse_address(path)?;
        let data = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ContentNotFound(path.to_string()))?;
        verify(path, &data)?;
        Ok(data)
    }

    async fn has(&self, path: &str) -> Result<bool> {
        parse_address(path)?;
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }
}

/// Store keeping one file per object, named by the hex multihash.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let mh = parse_address(path)?;
        Ok(self.dir.join(hex::encode(mh)))
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn put(&self, data: Vec<u8>) -> Result<String> {
        let path = address(&data);
        let file = self.object_path(&path)?;
        if !file.exists() {
            let temp = file.with_extension(format!("tmp.{:016x}", rand::random::<u64>()));
            tokio::fs::write(&temp, &data).await?;
            tokio::fs::rename(&temp, &file).await?;
        }
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.object_path(path)?;
        let data = match tokio::fs::read(&file).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ContentNotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        verify(path, &data)?;
        Ok(data)
    }

    async fn has(&self, path: &str) -> Result<bool> {
        Ok(self.object_path(path)?.exists())
    }
}
