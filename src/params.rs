//! Argument types shared by the local and remote request implementations.

use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, DatasetRef};
use crate::identity::ProfileId;

pub const DEFAULT_PAGE_SIZE: usize = 100;

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Pagination expressed as page number (1-based) and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peername: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            peername: String::new(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl ListParams {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            ..Default::default()
        }
    }

    /// Builds params from a page number and size; page numbers below one are
    /// treated as the first page.
    pub fn from_page(number: usize, size: usize) -> Self {
        let number = number.max(1);
        Self::new(size, (number - 1).saturating_mul(size))
    }

    pub fn page(&self) -> Page {
        let size = self.limit.max(1);
        Page {
            number: self.offset / size + 1,
            size: self.limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfoParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peername: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,
}

/// Arguments for listing a remote peer's refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRefsParams {
    pub peer_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// Pagination carried by the peer wire protocol's datasets list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetsListParams {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogParams {
    #[serde(flatten)]
    pub list: ListParams,
    #[serde(rename = "ref")]
    pub dataset_ref: DatasetRef,
}

impl LogParams {
    pub fn new(dataset_ref: DatasetRef) -> Self {
        Self {
            list: ListParams::default(),
            dataset_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveParams {
    pub name: String,
    pub dataset: Dataset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// `host:port` of the peer's p2p listener.
    pub address: String,
}
